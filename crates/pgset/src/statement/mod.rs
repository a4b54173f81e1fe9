//! Statement builder: SELECT / INSERT / UPDATE / DELETE assembly.
//!
//! Every value reaches the server as a bound `$n` parameter, including
//! LIMIT/OFFSET, JSON paths and interval literals. Identifiers are validated
//! before they are formatted into the SQL text.
//!
//! ```ignore
//! let stmt = statement::update(
//!     &book,
//!     &Condition::lookup("id", 7)?,
//!     &Changes::new().set("stock__sub", 1)?.set("meta__jsonb_set__flags__seen", true)?,
//!     now,
//! )?;
//! // UPDATE books SET stock = stock - $1,
//! //   meta = jsonb_set(meta, $2::text[], $3::jsonb, true), updated_at = $4
//! //   WHERE id = $5
//! ```

mod delete;
mod insert;
mod select;
mod update;

pub use delete::{delete, delete_by_pk};
pub use insert::{Conflict, bulk_insert, insert};
pub use select::{count, exists, select};
pub use update::{Change, Changes, JsonCast, UpdateOp, save, save_columns, update};

pub(crate) use select::{order_clause, projection, where_clause, window_clause};

use crate::error::OrmResult;
use crate::ident;

/// Sort direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: &str) -> OrmResult<Self> {
        Self::new(column, Direction::Asc)
    }

    pub fn desc(column: &str) -> OrmResult<Self> {
        Self::new(column, Direction::Desc)
    }

    pub fn new(column: &str, direction: Direction) -> OrmResult<Self> {
        ident::check_part(column)?;
        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }

    /// Parse `"column"` (ascending) or `"-column"` (descending).
    pub fn parse(term: &str) -> OrmResult<Self> {
        match term.strip_prefix('-') {
            Some(column) => Self::desc(column),
            None => Self::asc(term),
        }
    }

    pub(crate) fn to_sql(&self, qualifier: Option<&str>) -> String {
        let dir = match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        format!("{} {dir}", ident::qualify(qualifier, &self.column))
    }
}
