//! INSERT statements, single and batch.

use crate::error::{OrmError, OrmResult};
use crate::ident;
use crate::model::ModelDescriptor;
use crate::param::{CompiledStatement, ParamList};
use crate::record::Record;
use crate::value::Value;
use chrono::{DateTime, FixedOffset};

/// Conflict handling for batch inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// `ON CONFLICT [(target)] DO NOTHING`; an empty target matches any constraint.
    DoNothing { target: Vec<String> },
    /// `ON CONFLICT (target) DO UPDATE SET col = EXCLUDED.col, ...`
    Update {
        target: Vec<String>,
        columns: Vec<String>,
    },
}

impl Conflict {
    pub fn do_nothing() -> Self {
        Conflict::DoNothing { target: Vec::new() }
    }

    pub fn do_nothing_on<I, S>(target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Conflict::DoNothing {
            target: target.into_iter().map(Into::into).collect(),
        }
    }

    pub fn update<I, S, J, T>(target: I, columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Conflict::Update {
            target: target.into_iter().map(Into::into).collect(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    fn to_sql(&self, model: &ModelDescriptor) -> OrmResult<String> {
        let target_list = |target: &[String]| -> OrmResult<String> {
            for column in target {
                ident::check_part(column)?;
            }
            Ok(target.join(", "))
        };
        match self {
            Conflict::DoNothing { target } if target.is_empty() => {
                Ok(" ON CONFLICT DO NOTHING".to_string())
            }
            Conflict::DoNothing { target } => {
                Ok(format!(" ON CONFLICT ({}) DO NOTHING", target_list(target)?))
            }
            Conflict::Update { target, columns } => {
                if target.is_empty() || columns.is_empty() {
                    return Err(OrmError::lookup(
                        "conflict update needs both a target and columns to update",
                    ));
                }
                let mut set: Vec<&str> = Vec::new();
                for column in columns.iter().map(String::as_str).chain(model.auto_now_columns()) {
                    ident::check_part(column)?;
                    if !set.contains(&column) {
                        set.push(column);
                    }
                }
                let assignments: Vec<String> = set
                    .iter()
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect();
                Ok(format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    target_list(target)?,
                    assignments.join(", ")
                ))
            }
        }
    }
}

/// Drop auto-generated columns and fill the auto-populated timestamps.
///
/// `auto_now` columns always receive `now`; `auto_now_add` columns only when
/// the caller left them unset or NULL.
fn prepare(model: &ModelDescriptor, record: &Record, now: DateTime<FixedOffset>) -> Record {
    let mut row: Record = record
        .iter()
        .filter(|(column, _)| !model.is_auto_generated(column))
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect();
    for column in model.auto_now_add_columns() {
        if row.get(column).is_none_or(Value::is_null) {
            row.set(column, now);
        }
    }
    for column in model.auto_now_columns() {
        row.set(column, now);
    }
    row
}

/// Single-row INSERT returning the stored row.
pub fn insert(
    model: &ModelDescriptor,
    record: &Record,
    now: DateTime<FixedOffset>,
) -> OrmResult<CompiledStatement> {
    let table = model.table()?;
    let row = prepare(model, record, now);
    if row.is_empty() {
        return Ok(CompiledStatement::new(
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING *"),
            ParamList::new(),
        ));
    }
    let mut params = ParamList::new();
    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    for (column, value) in row.iter() {
        columns.push(ident::check_part(column)?);
        placeholders.push(params.placeholder(value.clone()));
    }
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(CompiledStatement::new(sql, params))
}

/// Multi-row INSERT as one statement.
///
/// The column list is the union of all rows' columns in first-seen order;
/// rows missing a column get `DEFAULT` in that slot.
pub fn bulk_insert(
    model: &ModelDescriptor,
    records: &[Record],
    conflict: Option<&Conflict>,
    now: DateTime<FixedOffset>,
) -> OrmResult<CompiledStatement> {
    if records.is_empty() {
        return Err(OrmError::NothingToCreate);
    }
    let table = model.table()?;
    let rows: Vec<Record> = records.iter().map(|r| prepare(model, r, now)).collect();

    let mut columns: Vec<&str> = Vec::new();
    for row in &rows {
        for column in row.columns() {
            if !columns.contains(&column) {
                columns.push(ident::check_part(column)?);
            }
        }
    }
    if columns.is_empty() {
        return Err(OrmError::lookup(
            "bulk insert rows carry no insertable columns",
        ));
    }

    let mut params = ParamList::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in &rows {
        let slots: Vec<String> = columns
            .iter()
            .map(|column| match row.get(column) {
                Some(value) => params.placeholder(value.clone()),
                None => "DEFAULT".to_string(),
            })
            .collect();
        tuples.push(format!("({})", slots.join(", ")));
    }

    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES {}",
        columns.join(", "),
        tuples.join(", ")
    );
    if let Some(conflict) = conflict {
        sql.push_str(&conflict.to_sql(model)?);
    }
    Ok(CompiledStatement::new(sql, params))
}
