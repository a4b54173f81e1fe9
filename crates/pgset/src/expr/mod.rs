//! Expression compiler: lookups and condition trees → SQL predicates.
//!
//! Lookups use the `column[__operator]` key grammar. The operator suffix is
//! parsed once, into [`FilterOp`], when the condition is constructed; unknown
//! suffixes and malformed values are rejected right there.
//!
//! ```ignore
//! use pgset::expr::Condition;
//!
//! let cond = Condition::lookup("age__gte", 18)?
//!     .and(Condition::lookup("name__istartswith", "al")?)
//!     .or(Condition::lookup("id__in", vec![1, 2, 3])?);
//!
//! let mut params = ParamList::new();
//! let sql = cond.compile(Some("t"), &mut params);
//! // (t.age >= $1 AND t.name ILIKE $2) OR t.id IN ($3, $4, $5)
//! ```
//!
//! Placeholders are numbered in tree traversal order, left to right.

mod condition;
mod lookup;

pub use condition::{Condition, Lookup};
pub use lookup::{FilterOp, split_key};
