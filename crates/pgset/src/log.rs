//! Statement logging via `tracing`.
//!
//! Every statement emits a `debug` event on target `pgset.sql`. With query
//! logging enabled, statements are also timed and an `info` event carries the
//! duration bucket, the configured title and the connection that ran it.

use crate::db::ConnectionKind;
use crate::db::QueryLoggerConfig;
use std::future::Future;
use std::time::{Duration, Instant};

/// Coarse execution-time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationBucket {
    LessThanOne,
    OneToFive,
    FiveToTen,
    MoreThanTen,
}

impl DurationBucket {
    pub fn from_duration(elapsed: Duration) -> Self {
        match elapsed.as_secs_f64() {
            s if s < 1.0 => DurationBucket::LessThanOne,
            s if s < 5.0 => DurationBucket::OneToFive,
            s if s < 10.0 => DurationBucket::FiveToTen,
            _ => DurationBucket::MoreThanTen,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DurationBucket::LessThanOne => "LT_1_SEC",
            DurationBucket::OneToFive => "1_5_SEC",
            DurationBucket::FiveToTen => "5_10_SEC",
            DurationBucket::MoreThanTen => "GT_10_SEC",
        }
    }
}

/// Optional per-statement timing.
#[derive(Debug, Clone)]
pub struct QueryLogger {
    enabled: bool,
    title: String,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    max_sql_length: Option<usize>,
}

impl Default for QueryLogger {
    fn default() -> Self {
        Self {
            enabled: false,
            title: "pgset".to_string(),
            max_sql_length: Some(500),
        }
    }
}

impl QueryLogger {
    pub fn from_config(config: Option<&QueryLoggerConfig>) -> Self {
        let mut logger = Self::default();
        if let Some(config) = config {
            logger.enabled = config.log_queries;
            if let Some(title) = &config.title {
                logger.title = title.clone();
            }
        }
        logger
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    fn truncate_sql<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_sql_length {
            Some(max) if sql.len() > max => {
                let mut end = max;
                while !sql.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &sql[..end]).into()
            }
            _ => sql.into(),
        }
    }

    /// Run `fut`, logging the statement and, when enabled, its duration.
    pub(crate) async fn observe<T, E, F>(
        &self,
        connection: &str,
        kind: ConnectionKind,
        sql: &str,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let sql = self.truncate_sql(sql);
        tracing::debug!(target: "pgset.sql", connection, kind = ?kind, sql = %sql);
        if !self.enabled {
            return fut.await;
        }

        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();
        let bucket = DurationBucket::from_duration(elapsed);
        match &result {
            Ok(_) => tracing::info!(
                target: "pgset.sql",
                title = %self.title,
                bucket = bucket.as_str(),
                connection,
                kind = ?kind,
                elapsed_secs = elapsed.as_secs_f64(),
                sql = %sql,
                "[{}][{}] {:.4}s",
                self.title,
                bucket.as_str(),
                elapsed.as_secs_f64(),
            ),
            Err(error) => tracing::info!(
                target: "pgset.sql",
                title = %self.title,
                bucket = bucket.as_str(),
                connection,
                kind = ?kind,
                elapsed_secs = elapsed.as_secs_f64(),
                sql = %sql,
                error = %error,
                "[{}][{}] {:.4}s failed",
                self.title,
                bucket.as_str(),
                elapsed.as_secs_f64(),
            ),
        }
        result
    }
}
