//! Hand-written SQL through the same routing, transaction and logging path
//! as compiled querysets.
//!
//! Parameters are positional (`$1`, `$2`, ...) and bound from [`Value`]s.

use crate::db::{Database, Route};
use crate::error::OrmResult;
use crate::record::Record;
use crate::value::Value;
use serde::de::DeserializeOwned;
use tokio_postgres::types::ToSql;

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// A raw SQL statement.
#[derive(Debug, Clone)]
pub struct RawQuery {
    sql: String,
    connection: Option<String>,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            connection: None,
        }
    }

    /// Pin reads to a named connection.
    pub fn using(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Another statement on the same pinned connection.
    pub(crate) fn with_sql(&self, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            connection: self.connection.clone(),
        }
    }

    pub(crate) fn read_route(&self) -> Route<'_> {
        Route::Read(self.connection.as_deref())
    }

    /// Run a row-returning statement on a read connection (or the open
    /// transaction).
    pub async fn fetch(&self, db: &Database, params: &[Value]) -> OrmResult<Vec<Record>> {
        db.check_route(self.read_route())?;
        db.query_raw(self.read_route(), &self.sql, &bind(params))
            .await?
            .iter()
            .map(Record::from_row)
            .collect()
    }

    pub async fn fetch_as<T: DeserializeOwned>(&self, db: &Database, params: &[Value]) -> OrmResult<Vec<T>> {
        self.fetch(db, params)
            .await?
            .iter()
            .map(Record::deserialize)
            .collect()
    }

    /// Run a statement on the write connection; returns the affected row count.
    pub async fn execute(&self, db: &Database, params: &[Value]) -> OrmResult<u64> {
        db.execute_raw(Route::Write, &self.sql, &bind(params)).await
    }

    /// Run the statement once per parameter set, all inside one transaction.
    ///
    /// Returns the total affected row count. Any failure rolls back every
    /// earlier execution of the batch.
    pub async fn execute_many(&self, db: &Database, param_sets: &[Vec<Value>]) -> OrmResult<u64> {
        if param_sets.is_empty() {
            return Ok(0);
        }
        db.atomic(|| async {
            let mut total = 0;
            for params in param_sets {
                total += db.execute_raw(Route::Write, &self.sql, &bind(params)).await?;
            }
            Ok(total)
        })
        .await
    }
}
