//! Relation loading.
//!
//! Two strategies fill the same [`Record::related`] collections:
//!
//! - **join** ([`QuerySet::select_related`]): one statement, LEFT JOINs onto
//!   a CTE holding the base rows, parents regrouped in memory.
//! - **prefetch** ([`QuerySet::prefetch_related`]): base rows first, then one
//!   `foreign IN (...)` statement per relation, stitched by key.
//!
//! Related filters and the default ordering (target primary key) apply to
//! both, so for the same data the two produce equal records.

mod join;
mod prefetch;

pub(crate) use join::join_statement;

use crate::db::Database;
use crate::error::OrmResult;
use crate::queryset::QuerySet;
use crate::record::Record;
use crate::statement;

pub(crate) async fn fetch(db: &Database, qs: &QuerySet) -> OrmResult<Vec<Record>> {
    let mut records = if qs.joins.is_empty() {
        let stmt = statement::select(qs)?;
        db.query(qs.read_route(), &stmt)
            .await?
            .iter()
            .map(Record::from_row)
            .collect::<OrmResult<Vec<_>>>()?
    } else {
        join::load(db, qs).await?
    };
    prefetch::attach(db, qs, &mut records).await?;
    Ok(records)
}

#[cfg(test)]
mod tests;
