//! LIMIT/OFFSET pagination over querysets and raw statements.
//!
//! ```ignore
//! let mut pages = Paginator::new(QuerySet::new(book.clone()).order_by(["id"])?, 10)?;
//! let first = pages.get_page(&db, 1).await?;
//! let second = pages.get_next_page(&db).await?;
//! let body = serde_json::to_value(&second)?;
//! // {"results": [...], "results_paginator": {"number": 2, "page_size": 10, ...}}
//! ```

use crate::db::Database;
use crate::error::{OrmError, OrmResult};
use crate::queryset::QuerySet;
use crate::raw::RawQuery;
use crate::record::Record;
use crate::statement::OrderBy;
use crate::value::Value;
use serde::Serialize;
use serde::ser::SerializeMap;
use std::future::Future;
use std::sync::Arc;

/// Something that can produce a window of rows and a total count.
pub trait PageSource: Send + Sync {
    fn fetch_window(
        &self,
        db: &Database,
        limit: i64,
        offset: i64,
    ) -> impl Future<Output = OrmResult<Vec<Record>>> + Send;

    fn count(&self, db: &Database) -> impl Future<Output = OrmResult<i64>> + Send;
}

impl PageSource for QuerySet {
    async fn fetch_window(&self, db: &Database, limit: i64, offset: i64) -> OrmResult<Vec<Record>> {
        let mut qs = self.limit(limit).offset(offset);
        if qs.order.is_empty() {
            qs.order.push(OrderBy::asc(qs.model.pk())?);
        }
        qs.fetch(db).await
    }

    async fn count(&self, db: &Database) -> OrmResult<i64> {
        let mut qs = self.clone();
        qs.limit = None;
        qs.offset = None;
        QuerySet::count(&qs, db).await
    }
}

/// Raw SQL with `{limit}` and `{offset}` markers, plus its parameters.
///
/// The markers become bound placeholders numbered after `params`. Without
/// markers, `LIMIT`/`OFFSET` are appended.
#[derive(Debug, Clone)]
pub struct RawPageQuery {
    query: RawQuery,
    params: Vec<Value>,
}

impl RawPageQuery {
    pub fn new(query: RawQuery, params: Vec<Value>) -> OrmResult<Self> {
        let sql = query.sql();
        if sql.contains("{limit}") != sql.contains("{offset}") {
            return Err(OrmError::lookup(
                "raw paginated query must use both {limit} and {offset} or neither",
            ));
        }
        Ok(Self { query, params })
    }

    /// SQL with markers replaced, and the parameter list for it.
    fn windowed(&self, limit: Value, offset: Value) -> (String, Vec<Value>) {
        let n = self.params.len();
        let (limit_ph, offset_ph) = (format!("${}", n + 1), format!("${}", n + 2));
        let sql = self.query.sql();
        let sql = if sql.contains("{limit}") {
            sql.replace("{limit}", &limit_ph).replace("{offset}", &offset_ph)
        } else {
            format!("{sql} LIMIT {limit_ph} OFFSET {offset_ph}")
        };
        let mut params = self.params.clone();
        params.push(limit);
        params.push(offset);
        (sql, params)
    }
}

impl PageSource for RawPageQuery {
    async fn fetch_window(&self, db: &Database, limit: i64, offset: i64) -> OrmResult<Vec<Record>> {
        let (sql, params) = self.windowed(Value::Int(limit), Value::Int(offset));
        self.query.with_sql(sql).fetch(db, &params).await
    }

    async fn count(&self, db: &Database) -> OrmResult<i64> {
        // NULL limit/offset select every row.
        let (sql, params) = self.windowed(Value::Null, Value::Null);
        let counted = self
            .query
            .with_sql(format!("SELECT COUNT(*) AS count FROM ({sql}) AS sub"));
        let rows = counted.fetch(db, &params).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

type RowMapper = Arc<dyn Fn(Record) -> OrmResult<Record> + Send + Sync>;

/// One page of results and its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub results: Vec<Record>,
    pub number: i64,
    pub page_size: i64,
    pub has_next: bool,
    pub has_previous: bool,
    pub start_index: Option<i64>,
    pub end_index: Option<i64>,
    context: serde_json::Map<String, serde_json::Value>,
}

impl Page {
    fn new(results: Vec<Record>, number: i64, page_size: i64, has_next: bool) -> Self {
        let (start_index, end_index) = if results.is_empty() {
            (None, None)
        } else {
            let start = (number - 1) * page_size;
            (Some(start), Some(start + results.len() as i64))
        };
        Self {
            results,
            number,
            page_size,
            has_next,
            has_previous: number > 1,
            start_index,
            end_index,
            context: serde_json::Map::new(),
        }
    }

    /// Add caller fields next to `results` and `results_paginator` in the
    /// serialized payload.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Serialize)]
struct PageMeta {
    number: i64,
    page_size: i64,
    has_next: bool,
    has_previous: bool,
    start_index: Option<i64>,
    end_index: Option<i64>,
}

impl Serialize for Page {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.context.len()))?;
        map.serialize_entry("results", &self.results)?;
        map.serialize_entry(
            "results_paginator",
            &PageMeta {
                number: self.number,
                page_size: self.page_size,
                has_next: self.has_next,
                has_previous: self.has_previous,
                start_index: self.start_index,
                end_index: self.end_index,
            },
        )?;
        for (key, value) in &self.context {
            if key != "results" && key != "results_paginator" {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Page-number navigation over a [`PageSource`].
pub struct Paginator<S> {
    source: S,
    page_size: i64,
    current: i64,
    has_next: bool,
    mapper: Option<RowMapper>,
}

impl<S: PageSource> Paginator<S> {
    pub fn new(source: S, page_size: i64) -> OrmResult<Self> {
        if page_size < 1 {
            return Err(OrmError::lookup(format!(
                "page size must be a positive integer, got {page_size}"
            )));
        }
        Ok(Self {
            source,
            page_size,
            current: 0,
            has_next: true,
            mapper: None,
        })
    }

    /// Transform every fetched row before it is placed on a page.
    pub fn map_rows(mut self, f: impl Fn(Record) -> OrmResult<Record> + Send + Sync + 'static) -> Self {
        self.mapper = Some(Arc::new(f));
        self
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// The last page number requested; 0 before the first request.
    pub fn current_page(&self) -> i64 {
        self.current
    }

    pub async fn get_page(&mut self, db: &Database, number: i64) -> OrmResult<Page> {
        if number < 1 {
            return Err(OrmError::InvalidPage(number));
        }
        let offset = (number - 1) * self.page_size;
        let mut results = self.source.fetch_window(db, self.page_size, offset).await?;
        let has_next = if results.len() as i64 == self.page_size {
            self.source.count(db).await? > offset + self.page_size
        } else {
            false
        };
        if let Some(mapper) = &self.mapper {
            results = results.into_iter().map(|r| mapper(r)).collect::<OrmResult<_>>()?;
        }
        self.current = number;
        self.has_next = has_next;
        Ok(Page::new(results, number, self.page_size, has_next))
    }

    /// The page after the current one, or an empty page past the end.
    pub async fn get_next_page(&mut self, db: &Database) -> OrmResult<Page> {
        let next = self.current + 1;
        if !self.has_next {
            self.current = next;
            return Ok(Page::new(Vec::new(), next, self.page_size, false));
        }
        self.get_page(db, next).await
    }

    /// The page before the current one, or an empty page before the start.
    pub async fn get_previous_page(&mut self, db: &Database) -> OrmResult<Page> {
        let previous = self.current - 1;
        if previous < 1 {
            self.current = 0;
            self.has_next = true;
            return Ok(Page::new(Vec::new(), previous.max(0), self.page_size, true));
        }
        self.get_page(db, previous).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionConfig, ConnectionKind, DatabaseSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        rows: Vec<Record>,
        counts: AtomicUsize,
    }

    impl FakeSource {
        fn with_rows(n: i64) -> Self {
            Self {
                rows: (1..=n).map(|id| Record::new().with("id", id)).collect(),
                counts: AtomicUsize::new(0),
            }
        }
    }

    impl PageSource for FakeSource {
        async fn fetch_window(&self, _db: &Database, limit: i64, offset: i64) -> OrmResult<Vec<Record>> {
            Ok(self
                .rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn count(&self, _db: &Database) -> OrmResult<i64> {
            self.counts.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.len() as i64)
        }
    }

    fn offline_db() -> Database {
        let settings = DatabaseSettings::new()
            .connection("primary", ConnectionConfig::new(ConnectionKind::Write, "app", "app"))
            .connection("replica", ConnectionConfig::new(ConnectionKind::Read, "app", "app"));
        Database::new(settings).unwrap()
    }

    #[tokio::test]
    async fn pages_over_twenty_five_rows() {
        let db = offline_db();
        let mut pages = Paginator::new(FakeSource::with_rows(25), 10).unwrap();

        let first = pages.get_page(&db, 1).await.unwrap();
        assert_eq!(first.results.len(), 10);
        assert!(first.has_next);
        assert!(!first.has_previous);
        assert_eq!((first.start_index, first.end_index), (Some(0), Some(10)));

        let third = pages.get_page(&db, 3).await.unwrap();
        assert_eq!(third.results.len(), 5);
        assert!(!third.has_next);
        assert!(third.has_previous);
        assert_eq!((third.start_index, third.end_index), (Some(20), Some(25)));
    }

    #[tokio::test]
    async fn rejects_page_below_one() {
        let db = offline_db();
        let mut pages = Paginator::new(FakeSource::with_rows(3), 10).unwrap();
        assert!(matches!(pages.get_page(&db, 0).await, Err(OrmError::InvalidPage(0))));
        assert!(matches!(pages.get_page(&db, -2).await, Err(OrmError::InvalidPage(-2))));
    }

    #[tokio::test]
    async fn empty_source_has_no_indices() {
        let db = offline_db();
        let mut pages = Paginator::new(FakeSource::with_rows(0), 10).unwrap();
        let page = pages.get_page(&db, 1).await.unwrap();
        assert!(page.is_empty());
        assert_eq!((page.start_index, page.end_index), (None, None));
        assert!(!page.has_next);
    }

    #[tokio::test]
    async fn exact_multiple_does_not_claim_a_next_page() {
        let db = offline_db();
        let source = FakeSource::with_rows(20);
        let mut pages = Paginator::new(source, 10).unwrap();
        assert!(pages.get_page(&db, 1).await.unwrap().has_next);
        let second = pages.get_next_page(&db).await.unwrap();
        assert_eq!(second.number, 2);
        assert!(!second.has_next);
        let past_end = pages.get_next_page(&db).await.unwrap();
        assert_eq!(past_end.number, 3);
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn partial_window_skips_count() {
        let db = offline_db();
        let mut pages = Paginator::new(FakeSource::with_rows(4), 10).unwrap();
        pages.get_page(&db, 1).await.unwrap();
        assert_eq!(pages.source.counts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn previous_page_walks_back() {
        let db = offline_db();
        let mut pages = Paginator::new(FakeSource::with_rows(25), 10).unwrap();
        pages.get_page(&db, 3).await.unwrap();
        let second = pages.get_previous_page(&db).await.unwrap();
        assert_eq!(second.number, 2);
        assert_eq!(second.results[0].get("id"), Some(&Value::Int(11)));
    }

    #[tokio::test]
    async fn row_mapper_applies_to_results() {
        let db = offline_db();
        let mut pages = Paginator::new(FakeSource::with_rows(2), 10)
            .unwrap()
            .map_rows(|r| Ok(r.with("ok", true)));
        let page = pages.get_page(&db, 1).await.unwrap();
        assert_eq!(page.results[0].get("ok"), Some(&Value::Bool(true)));
    }

    #[test]
    fn payload_shape_with_context() {
        let page = Page::new(vec![Record::new().with("id", 1)], 1, 2, false)
            .with_context("filters", serde_json::json!({"q": "dune"}));
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["results"][0]["id"], 1);
        assert_eq!(json["results_paginator"]["number"], 1);
        assert_eq!(json["results_paginator"]["page_size"], 2);
        assert_eq!(json["results_paginator"]["start_index"], 0);
        assert_eq!(json["results_paginator"]["end_index"], 1);
        assert_eq!(json["results_paginator"]["has_next"], false);
        assert_eq!(json["filters"]["q"], "dune");
    }

    #[test]
    fn raw_markers_become_bound_placeholders() {
        let raw = RawPageQuery::new(
            RawQuery::new("SELECT * FROM books WHERE price < $1 ORDER BY id LIMIT {limit} OFFSET {offset}"),
            vec![Value::Int(20)],
        )
        .unwrap();
        let (sql, params) = raw.windowed(Value::Int(10), Value::Int(30));
        assert_eq!(
            sql,
            "SELECT * FROM books WHERE price < $1 ORDER BY id LIMIT $2 OFFSET $3"
        );
        assert_eq!(params, vec![Value::Int(20), Value::Int(10), Value::Int(30)]);

        let bare = RawPageQuery::new(RawQuery::new("SELECT * FROM books"), Vec::new()).unwrap();
        assert_eq!(bare.windowed(Value::Int(5), Value::Int(0)).0, "SELECT * FROM books LIMIT $1 OFFSET $2");
    }

    #[test]
    fn raw_query_needs_both_markers() {
        let err = RawPageQuery::new(RawQuery::new("SELECT 1 LIMIT {limit}"), Vec::new()).unwrap_err();
        assert!(err.is_construction());
    }
}
