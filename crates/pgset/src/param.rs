//! Bound parameters and compiled statements.

use std::fmt;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// A clone-friendly parameter wrapper using Arc.
#[derive(Clone)]
pub struct Param(Arc<dyn ToSql + Send + Sync>);

impl Param {
    pub fn new<T: ToSql + Send + Sync + 'static>(value: T) -> Self {
        Param(Arc::new(value))
    }

    /// Borrow as the trait object tokio-postgres expects.
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        &*self.0 as &(dyn ToSql + Sync)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ToSql values forward Debug, so this shows the bound value.
        write!(f, "{:?}", self.0)
    }
}

/// Ordered parameter list; positions map to `$1..$n` placeholders.
#[derive(Clone, Debug, Default)]
pub struct ParamList {
    params: Vec<Param>,
}

impl ParamList {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its 1-based index.
    pub fn push<T: ToSql + Send + Sync + 'static>(&mut self, value: T) -> usize {
        self.params.push(Param::new(value));
        self.params.len()
    }

    /// Add a parameter and return its `$n` placeholder.
    pub fn placeholder<T: ToSql + Send + Sync + 'static>(&mut self, value: T) -> String {
        format!("${}", self.push(value))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(Param::as_sql).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }
}

/// SQL text plus its ordered parameters.
///
/// Built fresh for every execution.
#[derive(Clone, Debug)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: ParamList,
}

impl CompiledStatement {
    pub fn new(sql: impl Into<String>, params: ParamList) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn params_ref(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.as_refs()
    }

    /// Append `RETURNING *` so a write hands back the affected rows.
    pub fn returning_all(mut self) -> Self {
        self.sql.push_str(" RETURNING *");
        self
    }
}

impl fmt::Display for CompiledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
