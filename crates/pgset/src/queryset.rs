//! Immutable, chainable query descriptions.
//!
//! Every chaining method takes `&self` and returns a new [`QuerySet`]; the
//! receiver is never modified, so a queryset can be stored, shared across
//! tasks and reused. Nothing touches the database until a terminal method
//! (`fetch`, `get`, `count`, `update`, ...) is awaited with a [`Database`].
//!
//! ```ignore
//! let books = QuerySet::new(book.clone())
//!     .filter("price__lte", 20)?
//!     .exclude("title__icontains", "draft")?
//!     .order_by(["-published_at", "id"])?
//!     .prefetch_related([Prefetch::new("reviews")])?;
//!
//! let page = books.limit(10).fetch(&db).await?;
//! let total = books.count(&db).await?;
//! ```

use crate::db::{Database, Route};
use crate::error::{OrmError, OrmResult};
use crate::expr::{Condition, FilterOp};
use crate::ident;
use crate::model::ModelDescriptor;
use crate::param::CompiledStatement;
use crate::record::Record;
use crate::relation;
use crate::statement::{self, Changes, Conflict, OrderBy};
use crate::value::Value;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A relation to load in a second pass, optionally through its own queryset.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub(crate) relation: String,
    pub(crate) queryset: Option<QuerySet>,
}

impl Prefetch {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            queryset: None,
        }
    }

    /// Load the relation through `queryset`, keeping its filters and ordering.
    ///
    /// The queryset must target the relation's model.
    pub fn with_queryset(mut self, queryset: QuerySet) -> Self {
        self.queryset = Some(queryset);
        self
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }
}

/// An immutable query against one model.
#[derive(Debug, Clone)]
pub struct QuerySet {
    pub(crate) model: Arc<ModelDescriptor>,
    pub(crate) filter: Condition,
    pub(crate) related_filters: BTreeMap<String, Condition>,
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) related_order: BTreeMap<String, Vec<OrderBy>>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
    pub(crate) joins: Vec<String>,
    pub(crate) prefetches: Vec<Prefetch>,
    pub(crate) connection: Option<String>,
}

impl QuerySet {
    pub fn new(model: Arc<ModelDescriptor>) -> Self {
        Self {
            model,
            filter: Condition::default(),
            related_filters: BTreeMap::new(),
            columns: None,
            order: Vec::new(),
            related_order: BTreeMap::new(),
            limit: None,
            offset: None,
            joins: Vec::new(),
            prefetches: Vec::new(),
            connection: None,
        }
    }

    pub fn model(&self) -> &Arc<ModelDescriptor> {
        &self.model
    }

    pub fn condition(&self) -> &Condition {
        &self.filter
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn get_offset(&self) -> Option<i64> {
        self.offset
    }

    // ==================== Chaining ====================

    /// AND a `column[__op]` lookup into the predicate.
    pub fn filter(&self, key: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Ok(self.filter_q(Condition::lookup(key, value)?))
    }

    /// AND a condition tree into the predicate.
    pub fn filter_q(&self, condition: Condition) -> Self {
        let mut next = self.clone();
        next.filter = std::mem::take(&mut next.filter).and(condition);
        next
    }

    /// AND the negation of a lookup.
    pub fn exclude(&self, key: &str, value: impl Into<Value>) -> OrmResult<Self> {
        Ok(self.filter_q(Condition::lookup(key, value)?.negate()))
    }

    /// Restrict a loaded relation: `"<relation>__<column>[__op]"`.
    ///
    /// The filter narrows the relation's collections and applies the same
    /// way under [`select_related`](Self::select_related) and
    /// [`prefetch_related`](Self::prefetch_related); it does not remove base
    /// rows.
    pub fn filter_related(&self, key: &str, value: impl Into<Value>) -> OrmResult<Self> {
        let Some((relation, lookup)) = key.split_once("__") else {
            return Err(OrmError::lookup(format!(
                "related filter \"{key}\" must look like <relation>__<column>[__op]"
            )));
        };
        self.model.find_relation(relation)?;
        let condition = Condition::lookup(lookup, value)?;
        let mut next = self.clone();
        let slot = next.related_filters.entry(relation.to_string()).or_default();
        *slot = std::mem::take(slot).and(condition);
        Ok(next)
    }

    /// Project only these columns.
    pub fn columns<I, S>(&self, columns: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = columns
            .into_iter()
            .map(|c| ident::check_part(c.as_ref()).map(str::to_string))
            .collect::<OrmResult<Vec<_>>>()?;
        let mut next = self.clone();
        next.columns = (!columns.is_empty()).then_some(columns);
        Ok(next)
    }

    /// Replace the ordering; `"-col"` sorts descending.
    ///
    /// A `"<relation>__<column>"` term orders that relation's collections
    /// instead of the base rows, under both loading strategies.
    pub fn order_by<I, S>(&self, terms: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut order = Vec::new();
        let mut related_order: BTreeMap<String, Vec<OrderBy>> = BTreeMap::new();
        for term in terms {
            let term = OrderBy::parse(term.as_ref())?;
            let related = term
                .column
                .split_once("__")
                .filter(|(relation, _)| self.model.relations().iter().any(|r| r.name() == *relation));
            match related {
                Some((relation, column)) => {
                    let entry = related_order.entry(relation.to_string()).or_default();
                    entry.push(OrderBy::new(column, term.direction)?);
                }
                None => order.push(term),
            }
        }
        let mut next = self.clone();
        next.order = order;
        next.related_order = related_order;
        Ok(next)
    }

    pub fn limit(&self, limit: i64) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    pub fn offset(&self, offset: i64) -> Self {
        let mut next = self.clone();
        next.offset = Some(offset);
        next
    }

    /// Load relations with one joined statement.
    pub fn select_related<I, S>(&self, relations: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        for name in relations {
            let name = name.as_ref();
            self.model.find_relation(name)?;
            if !next.joins.iter().any(|j| j == name) {
                next.joins.push(name.to_string());
            }
        }
        Ok(next)
    }

    /// Load relations with one extra statement each.
    pub fn prefetch_related(&self, prefetches: impl IntoIterator<Item = Prefetch>) -> OrmResult<Self> {
        let mut next = self.clone();
        for prefetch in prefetches {
            let relation = self.model.find_relation(&prefetch.relation)?;
            if let Some(qs) = &prefetch.queryset {
                if qs.model.name() != relation.target().name() {
                    return Err(OrmError::config(format!(
                        "invalid prefetch: relation \"{}\" targets {}, queryset targets {}",
                        prefetch.relation,
                        relation.target().name(),
                        qs.model.name()
                    )));
                }
            }
            next.prefetches.retain(|p| p.relation != prefetch.relation);
            next.prefetches.push(prefetch);
        }
        Ok(next)
    }

    /// Pin reads to a named connection.
    pub fn using(&self, connection: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.connection = Some(connection.into());
        next
    }

    pub(crate) fn read_route(&self) -> Route<'_> {
        Route::Read(self.connection.as_deref())
    }

    /// The SELECT this queryset runs for its base rows.
    pub fn to_statement(&self) -> OrmResult<CompiledStatement> {
        if self.joins.is_empty() {
            statement::select(self)
        } else {
            relation::join_statement(self).map(|(stmt, _)| stmt)
        }
    }

    // ==================== Reads ====================

    /// All matching records, with requested relations loaded.
    pub async fn fetch(&self, db: &Database) -> OrmResult<Vec<Record>> {
        db.check_route(self.read_route())?;
        relation::fetch(db, self).await
    }

    /// All matching records, deserialized into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(&self, db: &Database) -> OrmResult<Vec<T>> {
        self.fetch(db)
            .await?
            .iter()
            .map(Record::deserialize)
            .collect()
    }

    /// Exactly one matching record.
    pub async fn get(&self, db: &Database) -> OrmResult<Record> {
        let limited = match self.limit {
            Some(limit) => self.limit(limit.min(2)),
            None => self.limit(2),
        };
        let mut records = limited.fetch(db).await?;
        match records.len() {
            1 => Ok(records.remove(0)),
            0 => Err(OrmError::NotFound {
                model: self.model.name().to_string(),
                sql: limited.to_statement()?.sql,
            }),
            _ => Err(OrmError::MultipleFound {
                model: self.model.name().to_string(),
                sql: limited.to_statement()?.sql,
            }),
        }
    }

    pub async fn get_as<T: DeserializeOwned>(&self, db: &Database) -> OrmResult<T> {
        self.get(db).await?.deserialize()
    }

    /// The first record, ordering by primary key when no order was given.
    pub async fn first(&self, db: &Database) -> OrmResult<Option<Record>> {
        let mut qs = self.limit(1);
        if qs.order.is_empty() {
            qs.order.push(OrderBy::asc(self.model.pk())?);
        }
        Ok(qs.fetch(db).await?.into_iter().next())
    }

    pub async fn count(&self, db: &Database) -> OrmResult<i64> {
        db.check_route(self.read_route())?;
        let stmt = statement::count(self)?;
        let rows = db.query(self.read_route(), &stmt).await?;
        rows.first()
            .map(|row| row.try_get::<_, i64>(0))
            .transpose()
            .map_err(|e| OrmError::decode("count", e.to_string()))
            .map(|n| n.unwrap_or(0))
    }

    pub async fn exists(&self, db: &Database) -> OrmResult<bool> {
        db.check_route(self.read_route())?;
        let stmt = statement::exists(self)?;
        let rows = db.query(self.read_route(), &stmt).await?;
        rows.first()
            .map(|row| row.try_get::<_, bool>(0))
            .transpose()
            .map_err(|e| OrmError::decode("exists", e.to_string()))
            .map(|b| b.unwrap_or(false))
    }

    // ==================== Writes ====================

    /// Insert one record and return the stored row.
    pub async fn create(&self, db: &Database, record: &Record) -> OrmResult<Record> {
        let stmt = statement::insert(&self.model, record, db.now())?;
        let rows = db.query(Route::Write, &stmt).await?;
        match rows.first() {
            Some(row) => Record::from_row(row),
            None => Err(OrmError::lookup("INSERT ... RETURNING produced no row")),
        }
    }

    /// Insert many records in one statement; returns the inserted row count.
    pub async fn bulk_create(
        &self,
        db: &Database,
        records: &[Record],
        conflict: Option<&Conflict>,
    ) -> OrmResult<u64> {
        let stmt = statement::bulk_insert(&self.model, records, conflict, db.now())?;
        db.execute(Route::Write, &stmt).await
    }

    /// Apply `changes` to every matching row; returns the affected row count.
    pub async fn update(&self, db: &Database, changes: &Changes) -> OrmResult<u64> {
        let stmt = statement::update(&self.model, &self.filter, changes, db.now())?;
        db.execute(Route::Write, &stmt).await
    }

    /// Delete every matching row; returns the affected row count.
    pub async fn delete(&self, db: &Database) -> OrmResult<u64> {
        let stmt = statement::delete(&self.model, &self.filter)?;
        db.execute(Route::Write, &stmt).await
    }

    /// Write every non-key column of `record` to the row with its primary key.
    pub async fn save(&self, db: &Database, record: &Record) -> OrmResult<bool> {
        let stmt = statement::save(&self.model, record, db.now())?;
        Ok(db.execute(Route::Write, &stmt).await? > 0)
    }

    /// Write only `columns` of `record` (plus `auto_now` columns) to the row
    /// with its primary key.
    pub async fn save_columns<S: AsRef<str>>(
        &self,
        db: &Database,
        record: &Record,
        columns: &[S],
    ) -> OrmResult<bool> {
        let stmt = statement::save_columns(&self.model, record, columns, db.now())?;
        Ok(db.execute(Route::Write, &stmt).await? > 0)
    }

    /// Delete the row with `record`'s primary key.
    pub async fn delete_record(&self, db: &Database, record: &Record) -> OrmResult<bool> {
        let stmt = statement::delete_by_pk(&self.model, record)?;
        Ok(db.execute(Route::Write, &stmt).await? > 0)
    }

    /// Fetch the single match, or create it from the exact-match lookups
    /// plus `defaults`. Returns the record and whether it was created.
    pub async fn get_or_create(&self, db: &Database, defaults: &Record) -> OrmResult<(Record, bool)> {
        db.atomic(|| async {
            match self.get(db).await {
                Ok(record) => Ok((record, false)),
                Err(e) if e.is_not_found() => {
                    let seed = self.creation_seed(defaults);
                    Ok((self.create(db, &seed).await?, true))
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Update the single match with `defaults`, or create it.
    pub async fn update_or_create(
        &self,
        db: &Database,
        defaults: &Record,
    ) -> OrmResult<(Record, bool)> {
        db.atomic(|| async {
            match self.get(db).await {
                Ok(existing) => {
                    let pk = self.model.pk();
                    let pk_value = existing.get(pk).cloned().unwrap_or(Value::Null);
                    let changes = Changes::assign_all(defaults)?;
                    if changes.is_empty() && self.model.auto_now_columns().next().is_none() {
                        return Ok((existing, false));
                    }
                    let stmt = statement::update(
                        &self.model,
                        &Condition::new(pk, FilterOp::Exact, pk_value)?,
                        &changes,
                        db.now(),
                    )?
                    .returning_all();
                    let rows = db.query(Route::Write, &stmt).await?;
                    match rows.first() {
                        Some(row) => Ok((Record::from_row(row)?, false)),
                        None => Ok((existing, false)),
                    }
                }
                Err(e) if e.is_not_found() => {
                    let seed = self.creation_seed(defaults);
                    Ok((self.create(db, &seed).await?, true))
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Exact-match values from the top-level AND of the predicate, overlaid
    /// with `defaults`.
    fn creation_seed(&self, defaults: &Record) -> Record {
        fn collect(condition: &Condition, out: &mut Record) {
            match condition {
                Condition::Leaf(leaf) if leaf.op() == FilterOp::Exact => {
                    out.set(leaf.column(), leaf.value().clone());
                }
                Condition::And(items) => items.iter().for_each(|c| collect(c, out)),
                _ => {}
            }
        }
        let mut seed = Record::new();
        collect(&self.filter, &mut seed);
        for (column, value) in defaults.iter() {
            seed.set(column, value.clone());
        }
        seed
    }
}
