//! Prefetch loading: one extra statement per relation.

use crate::db::Database;
use crate::error::{OrmError, OrmResult};
use crate::expr::{Condition, FilterOp};
use crate::model::RelationDescriptor;
use crate::queryset::{Prefetch, QuerySet};
use crate::record::Record;
use crate::statement::OrderBy;
use crate::value::{JoinKey, Value};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};

/// Distinct non-null values of `column`, in first-seen order.
pub(crate) fn distinct_keys(parents: &[Record], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for parent in parents {
        let Some(value) = parent.get(column) else {
            continue;
        };
        if let Some(key) = value.join_key() {
            if seen.insert(key) {
                keys.push(value.clone());
            }
        }
    }
    keys
}

/// Attach `children` to each parent whose local column matches the
/// child's foreign column. Parents without matches get an empty collection.
pub(crate) fn stitch(parents: &mut [Record], relation: &RelationDescriptor, children: Vec<Record>) {
    let mut by_key: HashMap<JoinKey, Vec<Record>> = HashMap::new();
    for child in children {
        if let Some(key) = child.get(relation.foreign_column()).and_then(Value::join_key) {
            by_key.entry(key).or_default().push(child);
        }
    }
    let name = relation.name();
    for parent in parents.iter_mut() {
        let matched = parent
            .get(relation.local_column())
            .and_then(Value::join_key)
            .and_then(|key| by_key.get(&key).cloned())
            .unwrap_or_default();
        parent.set_related(name.clone(), matched);
    }
}

/// The queryset that loads one prefetched relation for `keys`.
pub(crate) fn nested_queryset(
    parent: &QuerySet,
    prefetch: &Prefetch,
    relation: &RelationDescriptor,
    keys: Vec<Value>,
) -> OrmResult<QuerySet> {
    let target = relation.target();
    let mut nested = match &prefetch.queryset {
        Some(qs) => qs.clone(),
        None => QuerySet::new(target.clone()),
    };
    if let Some(columns) = &nested.columns {
        if !columns.iter().any(|c| c == relation.foreign_column()) {
            return Err(OrmError::config(format!(
                "prefetch \"{}\": projected columns must include \"{}\"",
                prefetch.relation,
                relation.foreign_column()
            )));
        }
    }
    if let Some(extra) = parent.related_filters.get(&prefetch.relation) {
        nested = nested.filter_q(extra.clone());
    }
    nested = nested.filter_q(Condition::new(
        relation.foreign_column(),
        FilterOp::In,
        Value::Array(keys),
    )?);
    if nested.order.is_empty() {
        if let Some(order) = parent.related_order.get(&prefetch.relation) {
            nested.order = order.clone();
        }
        if !nested.order.iter().any(|o| o.column == target.pk()) {
            nested.order.push(OrderBy::asc(target.pk())?);
        }
    }
    if nested.connection.is_none() {
        nested.connection = parent.connection.clone();
    }
    Ok(nested)
}

/// Run every prefetch of `qs` against the already loaded `parents`.
pub(crate) fn attach<'a>(
    db: &'a Database,
    qs: &'a QuerySet,
    parents: &'a mut [Record],
) -> BoxFuture<'a, OrmResult<()>> {
    Box::pin(async move {
        if parents.is_empty() {
            return Ok(());
        }
        for prefetch in &qs.prefetches {
            let relation = qs.model.find_relation(&prefetch.relation)?;
            let keys = distinct_keys(parents, relation.local_column());
            let children = if keys.is_empty() {
                Vec::new()
            } else {
                let nested = nested_queryset(qs, prefetch, relation, keys)?;
                super::fetch(db, &nested).await?
            };
            tracing::debug!(
                target: "pgset.sql",
                relation = %prefetch.relation,
                parents = parents.len(),
                children = children.len(),
                "prefetched relation"
            );
            stitch(parents, relation, children);
        }
        Ok(())
    })
}
