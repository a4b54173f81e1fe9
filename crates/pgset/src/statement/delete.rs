//! DELETE statements.

use crate::error::{OrmError, OrmResult};
use crate::expr::Condition;
use crate::model::ModelDescriptor;
use crate::param::{CompiledStatement, ParamList};
use crate::record::Record;

/// Filtered DELETE; refuses to run without a predicate.
pub fn delete(model: &ModelDescriptor, filter: &Condition) -> OrmResult<CompiledStatement> {
    if filter.is_empty() {
        return Err(OrmError::UnrestrictedDelete);
    }
    let table = model.table()?;
    let mut params = ParamList::new();
    let predicate = filter.compile(None, &mut params);
    Ok(CompiledStatement::new(
        format!("DELETE FROM {table} WHERE {predicate}"),
        params,
    ))
}

/// DELETE the row matching a record's primary key.
pub fn delete_by_pk(model: &ModelDescriptor, record: &Record) -> OrmResult<CompiledStatement> {
    let pk = model.pk();
    match record.get(pk) {
        Some(value) if !value.is_null() => delete(model, &Condition::lookup(pk, value.clone())?),
        _ => Err(OrmError::lookup(format!(
            "cannot delete {} without a primary key value in \"{pk}\"",
            model.name()
        ))),
    }
}
