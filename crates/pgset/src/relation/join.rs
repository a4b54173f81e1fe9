//! Join loading: base rows and their relations in one statement.
//!
//! The base query runs in a CTE that keeps its own WHERE, ORDER BY and
//! LIMIT/OFFSET, so slicing applies to base rows and not to the joined
//! product:
//!
//! ```text
//! WITH __pgset_base AS (
//!     SELECT <cols>, ROW_NUMBER() OVER (ORDER BY <order>, <pk>) AS __pgset_rn
//!     FROM <table> WHERE ... ORDER BY <order>, <pk> LIMIT $n OFFSET $m
//! )
//! SELECT __pgset_base.*, r0.<col0> AS __pgset_r0_c0, r0.<col1> AS __pgset_r0_c1, ...,
//!        (r0.<foreign> IS NOT NULL) AS __pgset_hit0
//! FROM __pgset_base
//! LEFT JOIN <related> r0 ON __pgset_base.<local> = r0.<foreign> [AND <related filter>]
//! ORDER BY __pgset_base.__pgset_rn, [r0.<related order>,] r0.<pk>
//! ```
//!
//! Related columns are aliased by position so that long column names never
//! run into the 63-byte identifier limit; decoding maps them back through the
//! target model's column list.

use crate::db::Database;
use crate::error::{OrmError, OrmResult};
use crate::param::{CompiledStatement, ParamList};
use crate::queryset::QuerySet;
use crate::record::Record;
use crate::statement::{self, OrderBy};
use std::collections::HashSet;
use tokio_postgres::Row;

const BASE: &str = "__pgset_base";
const MARKER: &str = "__pgset_";
const ROW_NUMBER: &str = "__pgset_rn";

/// One joined relation, as laid out in the result columns.
#[derive(Debug, Clone)]
pub(crate) struct JoinSlot {
    pub(crate) name: String,
    pub(crate) pk: String,
    columns: Vec<String>,
    prefix: String,
    hit: String,
}

impl JoinSlot {
    pub(crate) fn new(
        index: usize,
        name: impl Into<String>,
        pk: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pk: pk.into(),
            columns,
            prefix: format!("{MARKER}r{index}_c"),
            hit: format!("{MARKER}hit{index}"),
        }
    }

    fn alias(&self, position: usize) -> String {
        format!("{}{position}", self.prefix)
    }

    /// The target column a result alias stands for.
    pub(crate) fn column_for(&self, alias: &str) -> Option<&str> {
        let position: usize = alias.strip_prefix(self.prefix.as_str())?.parse().ok()?;
        self.columns.get(position).map(String::as_str)
    }

    /// Identity of a related record within one parent; the primary key when
    /// projected, otherwise the whole record.
    fn identity(&self, record: &Record) -> String {
        match record.get(&self.pk) {
            Some(pk) => pk.to_json().to_string(),
            None => record.to_json().to_string(),
        }
    }
}

/// A decoded result row before parents are grouped.
#[derive(Debug, Clone)]
pub(crate) struct JoinedRow {
    pub(crate) rn: i64,
    pub(crate) base: Record,
    pub(crate) related: Vec<Option<Record>>,
}

pub(crate) fn join_statement(qs: &QuerySet) -> OrmResult<(CompiledStatement, Vec<JoinSlot>)> {
    let model = &qs.model;
    let table = model.table()?;
    let mut params = ParamList::new();

    let mut order = qs.order.clone();
    if !order.iter().any(|o| o.column == model.pk()) {
        order.push(OrderBy::asc(model.pk())?);
    }
    let order_sql = statement::order_clause(&order, None);
    let window_order = order_sql.trim_start();

    let mut sql = format!(
        "WITH {BASE} AS (SELECT {}, ROW_NUMBER() OVER ({window_order}) AS {ROW_NUMBER} FROM {table}",
        statement::projection(qs, None)
    );
    sql.push_str(&statement::where_clause(&qs.filter, None, &mut params));
    sql.push_str(&order_sql);
    sql.push_str(&statement::window_clause(qs.limit, qs.offset, &mut params));
    sql.push(')');

    let mut select = vec![format!("{BASE}.*")];
    let mut joins = String::new();
    let mut outer_order = vec![format!("{BASE}.{ROW_NUMBER}")];
    let mut slots = Vec::with_capacity(qs.joins.len());

    for (index, name) in qs.joins.iter().enumerate() {
        let relation = model.find_relation(name)?;
        let target = relation.target();
        let target_table = target.table()?;
        if target.column_names().is_empty() {
            return Err(OrmError::config(format!(
                "select_related(\"{name}\"): model {} must declare its columns to be joined",
                target.name()
            )));
        }
        if let Some(columns) = &qs.columns {
            if !columns.iter().any(|c| c == relation.local_column()) {
                return Err(OrmError::config(format!(
                    "select_related(\"{name}\"): projected columns must include \"{}\"",
                    relation.local_column()
                )));
            }
        }

        let alias = format!("r{index}");
        let slot = JoinSlot::new(
            index,
            relation.name(),
            target.pk(),
            target.column_names().to_vec(),
        );
        for (position, column) in slot.columns.iter().enumerate() {
            select.push(format!("{alias}.{column} AS {}", slot.alias(position)));
        }
        select.push(format!(
            "({alias}.{} IS NOT NULL) AS {}",
            relation.foreign_column(),
            slot.hit
        ));

        joins.push_str(&format!(
            " LEFT JOIN {target_table} {alias} ON {BASE}.{} = {alias}.{}",
            relation.local_column(),
            relation.foreign_column()
        ));
        if let Some(extra) = qs.related_filters.get(name).filter(|c| !c.is_empty()) {
            joins.push_str(&format!(" AND ({})", extra.compile(Some(&alias), &mut params)));
        }
        let related_order = qs.related_order.get(name).map(Vec::as_slice).unwrap_or_default();
        outer_order.extend(related_order.iter().map(|o| o.to_sql(Some(&alias))));
        if !related_order.iter().any(|o| o.column == target.pk()) {
            outer_order.push(format!("{alias}.{}", target.pk()));
        }
        slots.push(slot);
    }

    sql.push_str(&format!(
        " SELECT {} FROM {BASE}{joins} ORDER BY {}",
        select.join(", "),
        outer_order.join(", ")
    ));
    Ok((CompiledStatement::new(sql, params), slots))
}

fn decode(row: &Row, slots: &[JoinSlot]) -> OrmResult<JoinedRow> {
    let rn: i64 = row
        .try_get(ROW_NUMBER)
        .map_err(|e| OrmError::decode(ROW_NUMBER, e.to_string()))?;
    let base = Record::from_row_columns(row, |name| (!name.starts_with(MARKER)).then_some(name))?;
    let mut related = Vec::with_capacity(slots.len());
    for slot in slots {
        let hit: bool = row
            .try_get(slot.hit.as_str())
            .map_err(|e| OrmError::decode(slot.hit.as_str(), e.to_string()))?;
        related.push(if hit {
            Some(Record::from_row_columns(row, |name| slot.column_for(name))?)
        } else {
            None
        });
    }
    Ok(JoinedRow { rn, base, related })
}

/// Group joined rows into parents with deduplicated relation collections.
///
/// Rows arrive ordered by row number, so each parent's rows are contiguous.
pub(crate) fn assemble(rows: Vec<JoinedRow>, slots: &[JoinSlot]) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    let mut current: Option<i64> = None;
    let mut seen: Vec<HashSet<String>> = vec![HashSet::new(); slots.len()];

    for row in rows {
        if current != Some(row.rn) {
            current = Some(row.rn);
            let mut parent = row.base;
            for slot in slots {
                parent.set_related(slot.name.clone(), Vec::new());
            }
            out.push(parent);
            seen.iter_mut().for_each(HashSet::clear);
        }
        let Some(parent) = out.last_mut() else {
            continue;
        };
        for ((slot, seen), related) in slots.iter().zip(seen.iter_mut()).zip(row.related) {
            if let Some(record) = related {
                if seen.insert(slot.identity(&record)) {
                    parent.related_mut(&slot.name).push(record);
                }
            }
        }
    }
    out
}

pub(crate) async fn load(db: &Database, qs: &QuerySet) -> OrmResult<Vec<Record>> {
    let (stmt, slots) = join_statement(qs)?;
    let rows = db.query(qs.read_route(), &stmt).await?;
    let decoded = rows
        .iter()
        .map(|row| decode(row, &slots))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(assemble(decoded, &slots))
}
