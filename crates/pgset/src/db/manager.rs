//! The [`Database`] handle and statement routing.

use super::config::{ConnectionKind, DatabaseSettings};
use super::pool;
use super::transaction;
use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use crate::log::QueryLogger;
use crate::param::CompiledStatement;
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use deadpool_postgres::Pool;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Where a statement should run when no transaction is open.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Route<'a> {
    /// A random read pool, or the named one.
    Read(Option<&'a str>),
    Write,
}

pub(crate) struct NamedPool {
    pub(crate) name: String,
    pub(crate) kind: ConnectionKind,
    pub(crate) pool: Pool,
}

struct Inner {
    reads: Vec<NamedPool>,
    write: NamedPool,
    tz: Tz,
    logger: QueryLogger,
}

/// Cheaply clonable handle to the configured pools.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field(
                "reads",
                &self.inner.reads.iter().map(|p| &p.name).collect::<Vec<_>>(),
            )
            .field("write", &self.inner.write.name)
            .field("time_zone", &self.inner.tz)
            .finish()
    }
}

enum Outcome {
    Rows(Vec<Row>),
    Affected(u64),
}

async fn run<C: GenericClient>(
    client: &C,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
    want_rows: bool,
) -> OrmResult<Outcome> {
    if want_rows {
        client.query(sql, params).await.map(Outcome::Rows)
    } else {
        client.execute(sql, params).await.map(Outcome::Affected)
    }
}

impl Database {
    /// Validate settings and build one lazily connecting pool per connection.
    pub fn new(settings: DatabaseSettings) -> OrmResult<Self> {
        settings.validate()?;
        let tz = settings.resolve_time_zone();
        let logger = QueryLogger::from_config(settings.query_logger.as_ref());

        let mut reads = Vec::new();
        let mut write = None;
        for (name, config) in &settings.databases {
            let named = NamedPool {
                name: name.clone(),
                kind: config.kind,
                pool: pool::create_pool(config)?,
            };
            match config.kind {
                ConnectionKind::Read => reads.push(named),
                ConnectionKind::Write => write = Some(named),
            }
        }
        let write = write.ok_or_else(|| OrmError::config("no WRITE connection configured"))?;
        tracing::debug!(
            target: "pgset.db",
            reads = reads.len(),
            write = %write.name,
            time_zone = %tz,
            "database pools created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                reads,
                write,
                tz,
                logger,
            }),
        })
    }

    /// Like [`Database::new`], then check every pool can hand out a connection.
    pub async fn connect(settings: DatabaseSettings) -> OrmResult<Self> {
        let db = Self::new(settings)?;
        for named in db.inner.reads.iter().chain(std::iter::once(&db.inner.write)) {
            let client = named.pool.get().await?;
            GenericClient::batch_execute(&client, "SELECT 1").await?;
            tracing::debug!(target: "pgset.db", connection = %named.name, "connected");
        }
        Ok(db)
    }

    /// Close every pool. Outstanding connections close when returned.
    pub fn close(&self) {
        for named in self.inner.reads.iter().chain(std::iter::once(&self.inner.write)) {
            named.pool.close();
        }
        tracing::debug!(target: "pgset.db", "database pools closed");
    }

    pub fn time_zone(&self) -> Tz {
        self.inner.tz
    }

    /// Current instant in the configured zone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.inner.tz).fixed_offset()
    }

    /// Names of all configured connections, reads first.
    pub fn connection_names(&self) -> Vec<&str> {
        self.inner
            .reads
            .iter()
            .chain(std::iter::once(&self.inner.write))
            .map(|p| p.name.as_str())
            .collect()
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn write_pool(&self) -> &NamedPool {
        &self.inner.write
    }

    /// Fail fast on an unknown pinned connection name.
    pub(crate) fn check_route(&self, route: Route<'_>) -> OrmResult<()> {
        self.target(route).map(|_| ())
    }

    fn target(&self, route: Route<'_>) -> OrmResult<&NamedPool> {
        match route {
            Route::Write => Ok(&self.inner.write),
            Route::Read(Some(name)) => self
                .inner
                .reads
                .iter()
                .chain(std::iter::once(&self.inner.write))
                .find(|p| p.name == name)
                .ok_or_else(|| {
                    OrmError::config(format!(
                        "invalid connection name \"{name}\". Options are {}",
                        self.connection_names().join(", ")
                    ))
                }),
            Route::Read(None) => match self.inner.reads.len() {
                0 => Err(OrmError::config("no READ connection available")),
                1 => Ok(&self.inner.reads[0]),
                n => Ok(&self.inner.reads[rand::rng().random_range(0..n)]),
            },
        }
    }

    async fn dispatch(
        &self,
        route: Route<'_>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        want_rows: bool,
    ) -> OrmResult<Outcome> {
        let logger = &self.inner.logger;

        if let Some(ctx) = transaction::current(self.id()) {
            let slot = ctx.slot.lock().await;
            if let Some(active) = slot.as_ref() {
                let name = self.inner.write.name.as_str();
                return logger
                    .observe(name, ConnectionKind::Write, sql, run(&active.client, sql, params, want_rows))
                    .await;
            }
        }

        let target = self.target(route)?;
        let client = target.pool.get().await?;
        logger
            .observe(&target.name, target.kind, sql, run(&client, sql, params, want_rows))
            .await
    }

    /// Run a row-returning statement.
    pub(crate) async fn query_raw(
        &self,
        route: Route<'_>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Vec<Row>> {
        match self.dispatch(route, sql, params, true).await? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Ok(Vec::new()),
        }
    }

    /// Run a statement and return the affected-row count.
    pub(crate) async fn execute_raw(
        &self,
        route: Route<'_>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<u64> {
        match self.dispatch(route, sql, params, false).await? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(rows) => Ok(rows.len() as u64),
        }
    }

    pub(crate) async fn query(
        &self,
        route: Route<'_>,
        stmt: &CompiledStatement,
    ) -> OrmResult<Vec<Row>> {
        self.query_raw(route, &stmt.sql, &stmt.params_ref()).await
    }

    pub(crate) async fn execute(
        &self,
        route: Route<'_>,
        stmt: &CompiledStatement,
    ) -> OrmResult<u64> {
        self.execute_raw(route, &stmt.sql, &stmt.params_ref()).await
    }
}
