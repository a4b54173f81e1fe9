//! SQL identifier validation.
//!
//! Table, column and alias names reach the generated SQL as text, so every
//! name that comes from a lookup key or a descriptor is checked here first.
//! Accepted parts match `[A-Za-z_][A-Za-z0-9_$]*`; a table name may carry one
//! schema qualifier (`public.users`).

use crate::error::{OrmError, OrmResult};

/// Validate a single identifier part (column, alias, relation name).
pub fn check_part(name: &str) -> OrmResult<&str> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(OrmError::lookup("identifier cannot be empty")),
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        Some(c) => {
            return Err(OrmError::lookup(format!(
                "invalid identifier start character '{c}' in \"{name}\""
            )));
        }
    }
    if let Some(c) = chars.find(|c| !(*c == '_' || *c == '$' || c.is_ascii_alphanumeric())) {
        return Err(OrmError::lookup(format!(
            "invalid character '{c}' in identifier \"{name}\""
        )));
    }
    Ok(name)
}

/// Validate a table name, optionally schema-qualified.
pub fn check_table(name: &str) -> OrmResult<&str> {
    match name.split_once('.') {
        Some((schema, table)) => {
            check_part(schema)?;
            check_part(table)?;
        }
        None => {
            check_part(name)?;
        }
    }
    Ok(name)
}

/// Render `qualifier.column`, or the bare column when no qualifier is set.
pub(crate) fn qualify(qualifier: Option<&str>, column: &str) -> String {
    match qualifier {
        Some(q) => format!("{q}.{column}"),
        None => column.to_string(),
    }
}
