//! Convenient imports for typical `pgset` usage.
//!
//! ```ignore
//! use pgset::prelude::*;
//! ```

pub use crate::{
    Changes, Condition, Conflict, Database, DatabaseSettings, ModelDescriptor, ModelRegistry,
    OrmError, OrmResult, Page, Paginator, Prefetch, QuerySet, RawPageQuery, RawQuery, Record,
    RelationDescriptor, Value,
};
