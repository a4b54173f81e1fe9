//! # pgset
//!
//! A declarative, queryset-style query layer for PostgreSQL.
//!
//! ## Features
//!
//! - **Immutable querysets**: every chaining call returns a new [`QuerySet`];
//!   execution happens only in async terminal methods
//! - **Keyword lookups**: `column__op` filters and `column__op` update keys,
//!   compiled to fully parameterized SQL
//! - **Relation loading**: join loading and prefetch loading that produce the
//!   same nested [`Record`]s
//! - **Routing**: random READ pools, one WRITE pool, connection pinning
//! - **Context-scoped transactions**: scoped blocks, wrapped callables and
//!   explicit begin/commit/rollback, with rollback on error and on cancel
//! - **Safe defaults**: UPDATE and DELETE require a filter
//! - **Pagination** over querysets and raw SQL
//!
//! ## Example
//!
//! ```ignore
//! use pgset::prelude::*;
//! use std::sync::Arc;
//!
//! let db = Database::connect(DatabaseSettings::from_toml_str(CONFIG)?).await?;
//!
//! let mut registry = ModelRegistry::new();
//! let book = registry.register(
//!     ModelDescriptor::new("Book")
//!         .db_table("books")
//!         .columns(["id", "title", "price", "stock", "updated_at"])
//!         .auto_generated(["id"])
//!         .auto_now(["updated_at"]),
//! )?;
//!
//! let cheap = QuerySet::new(book.clone()).filter("price__lt", 10)?;
//! let rows = cheap.order_by(["-price"])?.limit(20).fetch(&db).await?;
//! cheap.update(&db, &Changes::new().set("stock__sub", 1)?).await?;
//! ```

pub mod client;
pub mod db;
pub mod error;
pub mod expr;
pub mod log;
pub mod model;
pub mod paginator;
pub mod param;
pub mod prelude;
pub mod queryset;
pub mod raw;
pub mod record;
pub mod statement;
pub mod value;

mod ident;
mod relation;

pub use client::GenericClient;
pub use db::{ConnectionConfig, ConnectionKind, Database, DatabaseSettings, QueryLoggerConfig};
pub use error::{OrmError, OrmResult};
pub use expr::{Condition, FilterOp, Lookup};
pub use log::{DurationBucket, QueryLogger};
pub use model::{ModelDescriptor, ModelRegistry, RelationDescriptor};
pub use paginator::{Page, PageSource, Paginator, RawPageQuery};
pub use param::{CompiledStatement, Param, ParamList};
pub use queryset::{Prefetch, QuerySet};
pub use raw::RawQuery;
pub use record::Record;
pub use statement::{Changes, Conflict, Direction, OrderBy};
pub use value::Value;
