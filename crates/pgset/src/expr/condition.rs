//! Boolean condition trees.

use super::lookup::{FilterOp, split_key};
use crate::error::{OrmError, OrmResult};
use crate::ident;
use crate::param::ParamList;
use crate::value::Value;

/// One `column <op> value` test.
///
/// Only constructible through [`Condition::lookup`] / [`Condition::new`], so
/// the value always has the shape its operator requires.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    column: String,
    op: FilterOp,
    value: Value,
}

impl Lookup {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn compile(&self, qualifier: Option<&str>, params: &mut ParamList) -> String {
        let column = ident::qualify(qualifier, &self.column);
        match (self.op, &self.value) {
            (FilterOp::Exact, Value::Null) => format!("{column} IS NULL"),
            (FilterOp::Ne, Value::Null) => format!("{column} IS NOT NULL"),
            (FilterOp::IsNull, value) => {
                if value.as_bool() == Some(false) {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            (FilterOp::In, Value::Array(items)) => {
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| params.placeholder(item.clone()))
                    .collect();
                format!("{column} IN ({})", placeholders.join(", "))
            }
            (op, value) if op.is_pattern() => {
                let needle = match value {
                    Value::Text(s) => s.clone(),
                    Value::Int(i) => i.to_string(),
                    Value::Float(f) => f.to_string(),
                    Value::Decimal(d) => d.to_string(),
                    other => other.to_json().to_string(),
                };
                let idx = params.push(op.pattern(&needle));
                format!("{column} {} ${idx}", op.sql_operator())
            }
            (op, value) => {
                let idx = params.push(value.clone());
                format!("{column} {} ${idx}", op.sql_operator())
            }
        }
    }
}

fn check_value(column: &str, op: FilterOp, value: &Value) -> OrmResult<()> {
    match op {
        FilterOp::In => match value {
            Value::Array(items) if !items.is_empty() => Ok(()),
            Value::Array(_) => Err(OrmError::InvalidMembership(format!(
                "{column}__in requires a non-empty list"
            ))),
            other => Err(OrmError::InvalidMembership(format!(
                "{column}__in requires a list, got {}",
                other.kind()
            ))),
        },
        FilterOp::IsNull => match value {
            Value::Bool(_) => Ok(()),
            other => Err(OrmError::lookup(format!(
                "{column}__isnull requires a boolean, got {}",
                other.kind()
            ))),
        },
        op if op.is_pattern() => match value {
            Value::Text(_) | Value::Int(_) | Value::Float(_) | Value::Decimal(_) => Ok(()),
            other => Err(OrmError::lookup(format!(
                "{column} pattern match requires a string, got {}",
                other.kind()
            ))),
        },
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte if value.is_null() => Err(
            OrmError::lookup(format!("{column} cannot be compared with NULL; use __isnull")),
        ),
        _ => Ok(()),
    }
}

/// A predicate expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(Lookup),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::And(Vec::new())
    }
}

impl Condition {
    /// Parse a `column[__op]` key into a leaf.
    pub fn lookup(key: &str, value: impl Into<Value>) -> OrmResult<Self> {
        let (column, suffix) = split_key(key)?;
        Self::new(column, FilterOp::parse(suffix)?, value)
    }

    /// Build a leaf from an already-parsed operator.
    pub fn new(column: &str, op: FilterOp, value: impl Into<Value>) -> OrmResult<Self> {
        ident::check_part(column)?;
        let value = value.into();
        check_value(column, op, &value)?;
        Ok(Condition::Leaf(Lookup {
            column: column.to_string(),
            op,
            value,
        }))
    }

    /// AND of several `key => value` lookups, in iteration order.
    pub fn from_lookups<I, K, V>(lookups: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let leaves = lookups
            .into_iter()
            .map(|(k, v)| Condition::lookup(k.as_ref(), v))
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(Condition::all(leaves))
    }

    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    /// Combine with AND, flattening into an existing AND group.
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut items) => {
                items.push(other);
                Condition::And(items)
            }
            this => Condition::And(vec![this, other]),
        }
    }

    /// Combine with OR, flattening into an existing OR group.
    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut items) => {
                items.push(other);
                Condition::Or(items)
            }
            this => Condition::Or(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// True when the tree has no leaves and so restricts nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Leaf(_) => false,
            Condition::And(items) | Condition::Or(items) => items.iter().all(Condition::is_empty),
            Condition::Not(inner) => inner.is_empty(),
        }
    }

    /// Leaves in traversal order.
    pub fn leaves(&self) -> Vec<&Lookup> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Lookup>) {
        match self {
            Condition::Leaf(leaf) => out.push(leaf),
            Condition::And(items) | Condition::Or(items) => {
                items.iter().for_each(|c| c.collect_leaves(out))
            }
            Condition::Not(inner) => inner.collect_leaves(out),
        }
    }

    /// Render the predicate, pushing parameters onto `params`.
    ///
    /// Columns are prefixed with `qualifier.` when one is given. Empty
    /// groups are skipped; a tree with no leaves renders as `TRUE`.
    pub fn compile(&self, qualifier: Option<&str>, params: &mut ParamList) -> String {
        match self {
            Condition::Leaf(leaf) => leaf.compile(qualifier, params),
            Condition::And(items) => Self::join(items, " AND ", qualifier, params),
            Condition::Or(items) => Self::join(items, " OR ", qualifier, params),
            Condition::Not(inner) => {
                if inner.is_empty() {
                    return "TRUE".to_string();
                }
                format!("NOT ({})", inner.compile(qualifier, params))
            }
        }
    }

    fn join(
        items: &[Condition],
        sep: &str,
        qualifier: Option<&str>,
        params: &mut ParamList,
    ) -> String {
        let parts: Vec<String> = items
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| match c {
                Condition::And(_) | Condition::Or(_) => {
                    format!("({})", c.compile(qualifier, params))
                }
                _ => c.compile(qualifier, params),
            })
            .collect();
        match parts.len() {
            0 => "TRUE".to_string(),
            _ => parts.join(sep),
        }
    }
}
