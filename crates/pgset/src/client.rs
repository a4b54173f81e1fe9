//! Generic client trait over the connection types the executor uses.

use crate::error::{OrmError, OrmResult};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// The subset of client operations the executor needs.
///
/// Implemented for a bare `tokio_postgres::Client` and for pooled
/// `deadpool_postgres::Client` objects, with server errors already mapped
/// through [`OrmError::from_db_error`].
pub trait GenericClient: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Run one or more parameterless statements (BEGIN / COMMIT / ROLLBACK).
    fn batch_execute(&self, sql: &str) -> impl std::future::Future<Output = OrmResult<()>> + Send;
}

impl GenericClient for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .map_err(OrmError::from_db_error)
    }
}

impl GenericClient for deadpool_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        // Object -> ClientWrapper -> tokio_postgres::Client
        GenericClient::query(&***self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        GenericClient::execute(&***self, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        GenericClient::batch_execute(&***self, sql).await
    }
}
