//! SELECT, COUNT and EXISTS statements.

use super::OrderBy;
use crate::error::OrmResult;
use crate::expr::Condition;
use crate::ident;
use crate::param::{CompiledStatement, ParamList};
use crate::queryset::QuerySet;

/// Projected column list; `*` when neither the queryset nor the model names any.
pub(crate) fn projection(qs: &QuerySet, qualifier: Option<&str>) -> String {
    let columns = match &qs.columns {
        Some(columns) => columns.as_slice(),
        None => qs.model.column_names(),
    };
    if columns.is_empty() {
        return match qualifier {
            Some(q) => format!("{q}.*"),
            None => "*".to_string(),
        };
    }
    columns
        .iter()
        .map(|c| ident::qualify(qualifier, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// ` WHERE ...`, or nothing for an empty condition.
pub(crate) fn where_clause(
    filter: &Condition,
    qualifier: Option<&str>,
    params: &mut ParamList,
) -> String {
    if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filter.compile(qualifier, params))
    }
}

pub(crate) fn order_clause(order: &[OrderBy], qualifier: Option<&str>) -> String {
    if order.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = order.iter().map(|o| o.to_sql(qualifier)).collect();
    format!(" ORDER BY {}", terms.join(", "))
}

pub(crate) fn window_clause(
    limit: Option<i64>,
    offset: Option<i64>,
    params: &mut ParamList,
) -> String {
    let mut sql = String::new();
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT ${}", params.push(limit)));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET ${}", params.push(offset)));
    }
    sql
}

/// Plain SELECT over the base table.
pub fn select(qs: &QuerySet) -> OrmResult<CompiledStatement> {
    let table = qs.model.table()?;
    let mut params = ParamList::new();
    let mut sql = format!("SELECT {} FROM {table}", projection(qs, None));
    sql.push_str(&where_clause(&qs.filter, None, &mut params));
    sql.push_str(&order_clause(&qs.order, None));
    sql.push_str(&window_clause(qs.limit, qs.offset, &mut params));
    Ok(CompiledStatement::new(sql, params))
}

/// `COUNT(*)` of the rows the queryset would return.
///
/// A sliced queryset is counted through a subquery so LIMIT/OFFSET apply.
pub fn count(qs: &QuerySet) -> OrmResult<CompiledStatement> {
    let table = qs.model.table()?;
    let mut params = ParamList::new();
    let filter = where_clause(&qs.filter, None, &mut params);
    let sql = if qs.limit.is_none() && qs.offset.is_none() {
        format!("SELECT COUNT(*) FROM {table}{filter}")
    } else {
        let order = order_clause(&qs.order, None);
        let window = window_clause(qs.limit, qs.offset, &mut params);
        format!("SELECT COUNT(*) FROM (SELECT 1 FROM {table}{filter}{order}{window}) AS sub")
    };
    Ok(CompiledStatement::new(sql, params))
}

pub fn exists(qs: &QuerySet) -> OrmResult<CompiledStatement> {
    let table = qs.model.table()?;
    let mut params = ParamList::new();
    let filter = where_clause(&qs.filter, None, &mut params);
    Ok(CompiledStatement::new(
        format!("SELECT EXISTS (SELECT 1 FROM {table}{filter})"),
        params,
    ))
}
