use super::join::{JoinSlot, JoinedRow, assemble, join_statement};
use super::prefetch::{distinct_keys, nested_queryset, stitch};
use crate::error::OrmError;
use crate::model::{ModelDescriptor, RelationDescriptor};
use crate::queryset::{Prefetch, QuerySet};
use crate::record::Record;
use crate::value::Value;
use std::sync::Arc;

fn models() -> Arc<ModelDescriptor> {
    let book = Arc::new(
        ModelDescriptor::new("Book")
            .db_table("books")
            .columns(["id", "author_id", "title"]),
    );
    Arc::new(
        ModelDescriptor::new("Author")
            .db_table("authors")
            .columns(["id", "name"])
            .relation(RelationDescriptor::new(book, "id", "author_id").named("books")),
    )
}

fn author(id: i64, name: &str) -> Record {
    Record::new().with("id", id).with("name", name)
}

fn book(id: i64, author_id: i64, title: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("author_id", author_id)
        .with("title", title)
}

#[test]
fn join_statement_slices_base_rows_in_a_cte() {
    let qs = QuerySet::new(models())
        .filter("name__startswith", "a")
        .unwrap()
        .limit(5)
        .select_related(["books"])
        .unwrap()
        .filter_related("books__title__icontains", "rust")
        .unwrap();
    let (stmt, slots) = join_statement(&qs).unwrap();
    assert_eq!(
        stmt.sql,
        "WITH __pgset_base AS (SELECT id, name, ROW_NUMBER() OVER (ORDER BY id ASC) AS __pgset_rn \
         FROM authors WHERE name LIKE $1 ORDER BY id ASC LIMIT $2) \
         SELECT __pgset_base.*, r0.id AS __pgset_r0_c0, r0.author_id AS __pgset_r0_c1, \
         r0.title AS __pgset_r0_c2, (r0.author_id IS NOT NULL) AS __pgset_hit0 \
         FROM __pgset_base LEFT JOIN books r0 ON __pgset_base.id = r0.author_id \
         AND (r0.title ILIKE $3) ORDER BY __pgset_base.__pgset_rn, r0.id"
    );
    assert_eq!(stmt.params.len(), 3);
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].name, "books");
}

#[test]
fn related_order_terms_sort_joined_collections() {
    let qs = QuerySet::new(models())
        .select_related(["books"])
        .unwrap()
        .order_by(["name", "-books__title"])
        .unwrap();
    assert_eq!(qs.ordering().len(), 1);
    let (stmt, _) = join_statement(&qs).unwrap();
    assert_eq!(
        stmt.sql,
        "WITH __pgset_base AS (SELECT id, name, ROW_NUMBER() OVER (ORDER BY name ASC, id ASC) AS __pgset_rn \
         FROM authors ORDER BY name ASC, id ASC) \
         SELECT __pgset_base.*, r0.id AS __pgset_r0_c0, r0.author_id AS __pgset_r0_c1, \
         r0.title AS __pgset_r0_c2, (r0.author_id IS NOT NULL) AS __pgset_hit0 \
         FROM __pgset_base LEFT JOIN books r0 ON __pgset_base.id = r0.author_id \
         ORDER BY __pgset_base.__pgset_rn, r0.title DESC, r0.id"
    );
}

#[test]
fn related_order_terms_sort_prefetched_collections() {
    let qs = QuerySet::new(models()).order_by(["-books__title"]).unwrap();
    assert!(qs.ordering().is_empty());
    let relation = qs.model.find_relation("books").unwrap();
    let nested = nested_queryset(&qs, &Prefetch::new("books"), relation, vec![Value::Int(1)]).unwrap();
    assert_eq!(
        nested.to_statement().unwrap().sql,
        "SELECT id, author_id, title FROM books WHERE author_id IN ($1) ORDER BY title DESC, id ASC"
    );
}

#[test]
fn order_terms_without_a_relation_prefix_stay_on_the_base() {
    let qs = QuerySet::new(models()).order_by(["-name__sort"]).unwrap();
    assert_eq!(qs.ordering()[0].column, "name__sort");
    assert!(qs.related_order.is_empty());
}

#[test]
fn joined_columns_use_positional_aliases() {
    let long = "shipping_address_line_two_as_entered_on_the_order_form_v2";
    let book = Arc::new(
        ModelDescriptor::new("Book")
            .db_table("books")
            .columns(["id", "author_id", long]),
    );
    let author = Arc::new(
        ModelDescriptor::new("Author")
            .db_table("authors")
            .columns(["id"])
            .relation(RelationDescriptor::new(book, "id", "author_id").named("books")),
    );
    let qs = QuerySet::new(author).select_related(["books"]).unwrap();
    let (stmt, slots) = join_statement(&qs).unwrap();
    assert!(stmt.sql.contains(&format!("r0.{long} AS __pgset_r0_c2")), "{}", stmt.sql);
    assert_eq!(slots[0].column_for("__pgset_r0_c2"), Some(long));
    assert_eq!(slots[0].column_for("__pgset_r0_c3"), None);
    assert_eq!(slots[0].column_for("__pgset_r1_c0"), None);
}

#[test]
fn join_requires_declared_target_columns() {
    let bare = Arc::new(ModelDescriptor::new("Tag").db_table("tags"));
    let post = Arc::new(
        ModelDescriptor::new("Post")
            .db_table("posts")
            .relation(RelationDescriptor::new(bare, "id", "post_id")),
    );
    let qs = QuerySet::new(post).select_related(["tag"]).unwrap();
    assert!(matches!(join_statement(&qs), Err(OrmError::Configuration(_))));
}

#[test]
fn join_requires_local_column_in_projection() {
    let qs = QuerySet::new(models())
        .columns(["name"])
        .unwrap()
        .select_related(["books"])
        .unwrap();
    assert!(matches!(join_statement(&qs), Err(OrmError::Configuration(_))));
}

#[test]
fn unknown_relation_lists_options() {
    let err = QuerySet::new(models()).select_related(["reviews"]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("reviews"), "{message}");
    assert!(message.contains("books"), "{message}");
}

#[test]
fn assemble_groups_and_deduplicates() {
    let slots = vec![JoinSlot::new(0, "books", "id", vec!["id".into(), "author_id".into(), "title".into()])];
    let rows = vec![
        JoinedRow { rn: 1, base: author(1, "a"), related: vec![Some(book(10, 1, "x"))] },
        JoinedRow { rn: 1, base: author(1, "a"), related: vec![Some(book(10, 1, "x"))] },
        JoinedRow { rn: 1, base: author(1, "a"), related: vec![Some(book(11, 1, "y"))] },
        JoinedRow { rn: 2, base: author(2, "b"), related: vec![None] },
    ];
    let out = assemble(rows, &slots);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].related("books").map(<[Record]>::len), Some(2));
    assert_eq!(out[1].related("books"), Some(&[][..]));
}

#[test]
fn join_and_prefetch_produce_equal_records() {
    let model = models();
    let relation = model.find_relation("books").unwrap();
    let parents = vec![author(1, "a"), author(2, "b"), author(3, "c")];
    let children = vec![book(10, 1, "x"), book(11, 1, "y"), book(12, 2, "z")];

    let mut prefetched = parents.clone();
    stitch(&mut prefetched, relation, children.clone());

    let slots = vec![JoinSlot::new(0, "books", "id", vec!["id".into(), "author_id".into(), "title".into()])];
    let rows = vec![
        JoinedRow { rn: 1, base: parents[0].clone(), related: vec![Some(children[0].clone())] },
        JoinedRow { rn: 1, base: parents[0].clone(), related: vec![Some(children[1].clone())] },
        JoinedRow { rn: 2, base: parents[1].clone(), related: vec![Some(children[2].clone())] },
        JoinedRow { rn: 3, base: parents[2].clone(), related: vec![None] },
    ];
    let joined = assemble(rows, &slots);

    assert_eq!(joined, prefetched);
}

#[test]
fn distinct_keys_skips_nulls_and_repeats() {
    let parents = vec![
        Record::new().with("author_id", 1),
        Record::new().with("author_id", Value::Null),
        Record::new().with("author_id", 1),
        Record::new().with("author_id", 2),
    ];
    assert_eq!(
        distinct_keys(&parents, "author_id"),
        vec![Value::Int(1), Value::Int(2)]
    );
}

#[test]
fn nested_prefetch_queryset_carries_related_filter_and_connection() {
    let qs = QuerySet::new(models())
        .using("replica")
        .filter_related("books__title", "x")
        .unwrap();
    let relation = qs.model.find_relation("books").unwrap();
    let nested = nested_queryset(
        &qs,
        &Prefetch::new("books"),
        relation,
        vec![Value::Int(1), Value::Int(2)],
    )
    .unwrap();
    let stmt = nested.to_statement().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT id, author_id, title FROM books WHERE (title = $1) AND author_id IN ($2, $3) ORDER BY id ASC"
    );
    assert_eq!(nested.connection.as_deref(), Some("replica"));
}

#[test]
fn prefetch_queryset_must_target_relation_model() {
    let other = Arc::new(ModelDescriptor::new("Review").db_table("reviews"));
    let err = QuerySet::new(models())
        .prefetch_related([Prefetch::new("books").with_queryset(QuerySet::new(other))])
        .unwrap_err();
    assert!(matches!(err, OrmError::Configuration(_)));
}
