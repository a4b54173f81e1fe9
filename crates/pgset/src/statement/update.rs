//! UPDATE statements and the update-key grammar.
//!
//! Keys follow `column[__op]`:
//!
//! | key                                   | SQL                                           |
//! |---------------------------------------|-----------------------------------------------|
//! | `col`                                 | `col = $n`                                    |
//! | `col__add` / `sub` / `mul` / `div`    | `col = col + $n` (etc.)                       |
//! | `col__jsonb`                          | `col = $n::jsonb`                             |
//! | `col__jsonb_set__a__b[__int]`         | `col = jsonb_set(col, $n::text[], $m::jsonb, true)` |
//! | `col__jsonb_remove`                   | `col = col - $n::text` (list value: `#- $n::text[]`) |
//! | `col__add_time` / `sub_time`          | `col = col + $n::text::interval`              |
//!
//! Several keys on the same column fold into one nested assignment, in the
//! order they were given.

use crate::error::{OrmError, OrmResult};
use crate::expr::Condition;
use crate::ident;
use crate::model::ModelDescriptor;
use crate::param::{CompiledStatement, ParamList};
use crate::record::Record;
use crate::value::Value;
use chrono::{DateTime, FixedOffset};
use serde_json::Value as Json;

const UPDATE_SUFFIXES: &[&str] = &[
    "add",
    "sub",
    "mul",
    "div",
    "jsonb",
    "jsonb_set",
    "jsonb_remove",
    "add_time",
    "sub_time",
];

/// How a `jsonb_set` value is coerced before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonCast {
    Json,
    Text,
    Int,
    Float,
    Bool,
}

impl JsonCast {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "json" => JsonCast::Json,
            "text" => JsonCast::Text,
            "int" => JsonCast::Int,
            "float" => JsonCast::Float,
            "bool" => JsonCast::Bool,
            _ => return None,
        })
    }

    fn apply(self, column: &str, value: &Value) -> OrmResult<Json> {
        let bad = || {
            OrmError::lookup(format!(
                "{column}: cannot store {} value as {self:?}",
                value.kind()
            ))
        };
        Ok(match (self, value) {
            (JsonCast::Json, v) => v.to_json(),
            (JsonCast::Text, Value::Text(s)) => Json::String(s.clone()),
            (JsonCast::Text, v) => match v.to_json() {
                Json::String(s) => Json::String(s),
                other => Json::String(other.to_string()),
            },
            (JsonCast::Int, Value::Int(i)) => Json::from(*i),
            (JsonCast::Int, Value::Text(s)) => Json::from(s.trim().parse::<i64>().map_err(|_| bad())?),
            (JsonCast::Float, Value::Float(f)) => Json::from(*f),
            (JsonCast::Float, Value::Int(i)) => Json::from(*i as f64),
            (JsonCast::Float, v @ Value::Decimal(_)) => v.to_json(),
            (JsonCast::Float, Value::Text(s)) => {
                Json::from(s.trim().parse::<f64>().map_err(|_| bad())?)
            }
            (JsonCast::Bool, Value::Bool(b)) => Json::Bool(*b),
            (JsonCast::Bool, Value::Text(s)) => match s.as_str() {
                "true" => Json::Bool(true),
                "false" => Json::Bool(false),
                _ => return Err(bad()),
            },
            _ => return Err(bad()),
        })
    }
}

/// Mutation applied to one column.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Jsonb,
    JsonbSet { path: Vec<String>, cast: JsonCast },
    JsonbRemove,
    AddTime,
    SubTime,
}

impl UpdateOp {
    fn parse(column: &str, suffix: Option<&str>) -> OrmResult<Self> {
        let Some(suffix) = suffix else {
            return Ok(UpdateOp::Assign);
        };
        Ok(match suffix {
            "add" => UpdateOp::Add,
            "sub" => UpdateOp::Sub,
            "mul" => UpdateOp::Mul,
            "div" => UpdateOp::Div,
            "jsonb" => UpdateOp::Jsonb,
            "jsonb_remove" => UpdateOp::JsonbRemove,
            "add_time" => UpdateOp::AddTime,
            "sub_time" => UpdateOp::SubTime,
            "jsonb_set" => {
                return Err(OrmError::lookup(format!(
                    "missing jsonb key name for \"{column}__jsonb_set\""
                )));
            }
            other => match other.strip_prefix("jsonb_set__") {
                Some(rest) => {
                    let mut path: Vec<String> = rest.split("__").map(str::to_string).collect();
                    let cast = match path.last().and_then(|last| JsonCast::parse(last)) {
                        Some(cast) if path.len() > 1 => {
                            path.pop();
                            cast
                        }
                        _ => JsonCast::Json,
                    };
                    if path.iter().any(String::is_empty) {
                        return Err(OrmError::lookup(format!(
                            "empty jsonb path segment in \"{column}__{other}\""
                        )));
                    }
                    UpdateOp::JsonbSet { path, cast }
                }
                None => return Err(OrmError::unsupported(other, "update", UPDATE_SUFFIXES)),
            },
        })
    }
}

/// One parsed `key => value` update entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub column: String,
    pub op: UpdateOp,
    pub value: Value,
}

impl Change {
    pub fn parse(key: &str, value: impl Into<Value>) -> OrmResult<Self> {
        let (column, suffix) = match key.split_once("__") {
            Some((column, suffix)) => (column, Some(suffix)),
            None => (key, None),
        };
        ident::check_part(column)?;
        let op = UpdateOp::parse(column, suffix)?;
        let value = value.into();

        match &op {
            UpdateOp::Add | UpdateOp::Sub | UpdateOp::Mul | UpdateOp::Div => {
                if !matches!(value, Value::Int(_) | Value::Float(_) | Value::Decimal(_)) {
                    return Err(OrmError::lookup(format!(
                        "{key} requires a number, got {}",
                        value.kind()
                    )));
                }
            }
            UpdateOp::AddTime | UpdateOp::SubTime => {
                if value.as_str().is_none() {
                    return Err(OrmError::lookup(format!(
                        "{key} requires an interval string such as \"3 days\""
                    )));
                }
            }
            UpdateOp::JsonbRemove => {
                let ok = match &value {
                    Value::Text(_) => true,
                    Value::Array(items) => {
                        !items.is_empty() && items.iter().all(|i| i.as_str().is_some())
                    }
                    _ => false,
                };
                if !ok {
                    return Err(OrmError::lookup(format!(
                        "{key} requires a key name or a non-empty list of path segments"
                    )));
                }
            }
            UpdateOp::JsonbSet { cast, .. } => {
                cast.apply(column, &value)?;
            }
            UpdateOp::Assign | UpdateOp::Jsonb => {}
        }

        Ok(Self {
            column: column.to_string(),
            op,
            value,
        })
    }

    /// Wrap `current` (the column or an earlier fold) in this mutation.
    fn render(&self, current: &str, params: &mut ParamList) -> OrmResult<String> {
        let operand = |current: &str| {
            if current == self.column {
                current.to_string()
            } else {
                format!("({current})")
            }
        };
        Ok(match &self.op {
            UpdateOp::Assign => params.placeholder(self.value.clone()),
            UpdateOp::Add => format!("{} + {}", operand(current), params.placeholder(self.value.clone())),
            UpdateOp::Sub => format!("{} - {}", operand(current), params.placeholder(self.value.clone())),
            UpdateOp::Mul => format!("{} * {}", operand(current), params.placeholder(self.value.clone())),
            UpdateOp::Div => format!("{} / {}", operand(current), params.placeholder(self.value.clone())),
            UpdateOp::Jsonb => format!("{}::jsonb", params.placeholder(self.value.to_json())),
            UpdateOp::JsonbSet { path, cast } => {
                let json = cast.apply(&self.column, &self.value)?;
                let path = params.placeholder(path.clone());
                let json = params.placeholder(json);
                format!("jsonb_set({current}, {path}::text[], {json}::jsonb, true)")
            }
            UpdateOp::JsonbRemove => match &self.value {
                Value::Array(items) => {
                    let path: Vec<String> = items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect();
                    format!("{} #- {}::text[]", operand(current), params.placeholder(path))
                }
                other => format!(
                    "{} - {}::text",
                    operand(current),
                    params.placeholder(other.as_str().unwrap_or_default().to_string())
                ),
            },
            UpdateOp::AddTime | UpdateOp::SubTime => {
                let sign = if self.op == UpdateOp::AddTime { "+" } else { "-" };
                let interval = self.value.as_str().unwrap_or_default().to_string();
                format!(
                    "{} {sign} {}::text::interval",
                    operand(current),
                    params.placeholder(interval)
                )
            }
        })
    }
}

/// An ordered list of update entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    entries: Vec<Change>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and append one `key => value` entry.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.entries.push(Change::parse(key, value)?);
        Ok(self)
    }

    /// Every record field becomes a plain assignment.
    pub fn assign_all(record: &Record) -> OrmResult<Self> {
        let mut changes = Self::new();
        for (column, value) in record.iter() {
            ident::check_part(column)?;
            changes.entries.push(Change {
                column: column.to_string(),
                op: UpdateOp::Assign,
                value: value.clone(),
            });
        }
        Ok(changes)
    }

    /// Parse every record field as an update key.
    pub fn from_record(record: &Record) -> OrmResult<Self> {
        let mut changes = Self::new();
        for (key, value) in record.iter() {
            changes.entries.push(Change::parse(key, value.clone())?);
        }
        Ok(changes)
    }

    pub fn entries(&self) -> &[Change] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `col = expr, ...` with caller changes to `auto_now` columns replaced by `now`.
    fn set_clause(
        &self,
        model: &ModelDescriptor,
        now: DateTime<FixedOffset>,
        params: &mut ParamList,
    ) -> OrmResult<String> {
        let auto_now: Vec<&str> = model.auto_now_columns().collect();
        let mut columns: Vec<&str> = Vec::new();
        for change in &self.entries {
            if !auto_now.contains(&change.column.as_str()) && !columns.contains(&change.column.as_str()) {
                columns.push(&change.column);
            }
        }

        let mut assignments = Vec::with_capacity(columns.len() + auto_now.len());
        for column in columns {
            let mut expr = column.to_string();
            for change in self.entries.iter().filter(|c| c.column == column) {
                expr = change.render(&expr, params)?;
            }
            assignments.push(format!("{column} = {expr}"));
        }
        for column in auto_now {
            ident::check_part(column)?;
            assignments.push(format!("{column} = {}", params.placeholder(Value::from(now))));
        }
        if assignments.is_empty() {
            return Err(OrmError::lookup("update requires at least one column to set"));
        }
        Ok(assignments.join(", "))
    }
}

/// Filtered UPDATE; refuses to run without a predicate.
pub fn update(
    model: &ModelDescriptor,
    filter: &Condition,
    changes: &Changes,
    now: DateTime<FixedOffset>,
) -> OrmResult<CompiledStatement> {
    if filter.is_empty() {
        return Err(OrmError::UnrestrictedUpdate);
    }
    let table = model.table()?;
    let mut params = ParamList::new();
    let set = changes.set_clause(model, now, &mut params)?;
    let predicate = filter.compile(None, &mut params);
    Ok(CompiledStatement::new(
        format!("UPDATE {table} SET {set} WHERE {predicate}"),
        params,
    ))
}

fn pk_filter(model: &ModelDescriptor, record: &Record) -> OrmResult<Condition> {
    let pk = model.pk();
    match record.get(pk) {
        Some(value) if !value.is_null() => Condition::lookup(pk, value.clone()),
        _ => Err(OrmError::lookup(format!(
            "cannot save {} without a primary key value in \"{pk}\"",
            model.name()
        ))),
    }
}

/// UPDATE one record by primary key, assigning every non-key column.
pub fn save(
    model: &ModelDescriptor,
    record: &Record,
    now: DateTime<FixedOffset>,
) -> OrmResult<CompiledStatement> {
    let pk = model.pk();
    let filter = pk_filter(model, record)?;
    let fields: Record = record
        .iter()
        .filter(|(column, _)| *column != pk && !model.is_auto_generated(column))
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect();
    let changes = Changes::assign_all(&fields)?;
    update(model, &filter, &changes, now)
}

/// UPDATE one record by primary key, writing only `columns` plus the
/// `auto_now` columns.
///
/// Every listed column must carry a value in `record`; the primary key and
/// columns the model does not declare are rejected.
pub fn save_columns<S: AsRef<str>>(
    model: &ModelDescriptor,
    record: &Record,
    columns: &[S],
    now: DateTime<FixedOffset>,
) -> OrmResult<CompiledStatement> {
    if columns.is_empty() {
        return Err(OrmError::lookup(format!(
            "save_columns on {} requires at least one column",
            model.name()
        )));
    }
    let filter = pk_filter(model, record)?;
    let declared = model.column_names();
    let mut fields = Record::new();
    for column in columns {
        let column = ident::check_part(column.as_ref())?;
        if column == model.pk() {
            return Err(OrmError::lookup(format!(
                "save_columns cannot rewrite the primary key \"{column}\""
            )));
        }
        if !declared.is_empty() && !declared.iter().any(|c| c == column) {
            return Err(OrmError::lookup(format!(
                "{} has no column \"{column}\"",
                model.name()
            )));
        }
        let Some(value) = record.get(column) else {
            return Err(OrmError::lookup(format!(
                "save_columns: record has no value for \"{column}\""
            )));
        };
        fields.set(column, value.clone());
    }
    let changes = Changes::assign_all(&fields)?;
    update(model, &filter, &changes, now)
}
