//! Connection & transaction manager.
//!
//! A [`Database`] owns one pool per configured connection: any number of
//! READ pools and exactly one WRITE pool. Reads go to a random read pool (or
//! the one pinned with `using(name)`), writes to the write pool, and anything
//! issued inside an open transaction goes to that transaction's connection.
//!
//! Transactions are scoped to the calling task through a task-local context,
//! so nested calls share the open transaction without it being passed around:
//!
//! ```ignore
//! db.atomic(|| async {
//!     authors.create(&db, &alice).await?;
//!     books.bulk_create(&db, &rows, None).await?;
//!     Ok(())
//! })
//! .await?;
//! ```

mod config;
mod manager;
mod pool;
mod transaction;

pub use config::{ConnectionConfig, ConnectionKind, DatabaseSettings, QueryLoggerConfig};
pub use manager::Database;
pub use pool::create_pool;

pub(crate) use manager::Route;
