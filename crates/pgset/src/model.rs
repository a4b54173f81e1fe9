//! Model descriptors and the registry that holds them.
//!
//! A [`ModelDescriptor`] is built once, at startup, and shared behind an
//! `Arc` by every queryset that targets the model. Nothing here is mutated
//! after registration.
//!
//! ```ignore
//! let author = Arc::new(
//!     ModelDescriptor::new("Author")
//!         .db_table("authors")
//!         .columns(["id", "name"])
//!         .auto_generated(["id"]),
//! );
//! let book = ModelDescriptor::new("Book")
//!     .db_table("books")
//!     .columns(["id", "author_id", "title", "created_at", "updated_at"])
//!     .auto_generated(["id"])
//!     .auto_now_add(["created_at"])
//!     .auto_now(["updated_at"])
//!     .relation(RelationDescriptor::new(author, "author_id", "id"));
//! ```

use crate::error::{OrmError, OrmResult};
use crate::ident;
use heck::ToSnakeCase;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Static metadata for one table.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    name: String,
    table: Option<String>,
    primary_key: String,
    columns: Vec<String>,
    auto_generated: BTreeSet<String>,
    auto_now_add: BTreeSet<String>,
    auto_now: BTreeSet<String>,
    relations: Vec<RelationDescriptor>,
}

fn to_set<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl ModelDescriptor {
    /// Create a descriptor with primary key `id` and no table yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: "id".to_string(),
            columns: Vec::new(),
            auto_generated: BTreeSet::new(),
            auto_now_add: BTreeSet::new(),
            auto_now: BTreeSet::new(),
            relations: Vec::new(),
        }
    }

    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Declared column list, used for default projection and join aliasing.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Columns filled by the database (serials, defaults); never inserted.
    pub fn auto_generated<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_generated = to_set(columns);
        self
    }

    /// Timestamp columns set to "now" on insert.
    pub fn auto_now_add<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_now_add = to_set(columns);
        self
    }

    /// Timestamp columns set to "now" on insert and on every update.
    pub fn auto_now<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_now = to_set(columns);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name, or a configuration error when none was declared.
    pub fn table(&self) -> OrmResult<&str> {
        match &self.table {
            Some(table) => ident::check_table(table)
                .map_err(|e| OrmError::config(format!("model {}: {e}", self.name))),
            None => Err(OrmError::config(format!(
                "model {} has no db_table",
                self.name
            ))),
        }
    }

    pub fn pk(&self) -> &str {
        &self.primary_key
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn is_auto_generated(&self, column: &str) -> bool {
        self.auto_generated.contains(column)
    }

    pub fn auto_now_add_columns(&self) -> impl Iterator<Item = &str> {
        self.auto_now_add.iter().map(String::as_str)
    }

    pub fn auto_now_columns(&self) -> impl Iterator<Item = &str> {
        self.auto_now.iter().map(String::as_str)
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    /// Look up a declared relation by its result name.
    pub fn find_relation(&self, name: &str) -> OrmResult<&RelationDescriptor> {
        self.relations
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| {
                let valid: Vec<String> = self.relations.iter().map(|r| r.name()).collect();
                OrmError::config(format!(
                    "invalid related field \"{name}\" on {}. Options are {}",
                    self.name,
                    valid.join(", ")
                ))
            })
    }

    /// Check everything that can be checked without a database.
    pub fn validate(&self) -> OrmResult<()> {
        self.table()?;
        let check = |c: &str| {
            ident::check_part(c)
                .map(|_| ())
                .map_err(|e| OrmError::config(format!("model {}: {e}", self.name)))
        };
        check(&self.primary_key)?;
        self.columns
            .iter()
            .chain(&self.auto_generated)
            .chain(&self.auto_now_add)
            .chain(&self.auto_now)
            .try_for_each(|c| check(c))?;

        let mut seen = BTreeSet::new();
        for relation in &self.relations {
            let name = relation.name();
            check(&name)?;
            check(&relation.local_column)?;
            check(&relation.foreign_column)?;
            relation.target.table()?;
            if !seen.insert(name.clone()) {
                return Err(OrmError::config(format!(
                    "model {} declares relation \"{name}\" twice",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// A declared relation from one model to another.
///
/// Cardinality follows from the join columns; the loader always produces a
/// collection.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    target: Arc<ModelDescriptor>,
    local_column: String,
    foreign_column: String,
    name: Option<String>,
}

impl RelationDescriptor {
    pub fn new(
        target: Arc<ModelDescriptor>,
        local_column: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            target,
            local_column: local_column.into(),
            foreign_column: foreign_column.into(),
            name: None,
        }
    }

    /// Override the result-attribute name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Result-attribute name; defaults to the snake_cased target model name.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.target.name().to_snake_case(),
        }
    }

    pub fn target(&self) -> &Arc<ModelDescriptor> {
        &self.target
    }

    pub fn local_column(&self) -> &str {
        &self.local_column
    }

    pub fn foreign_column(&self) -> &str {
        &self.foreign_column
    }
}

/// Name → descriptor map, filled at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a descriptor.
    pub fn register(&mut self, model: ModelDescriptor) -> OrmResult<Arc<ModelDescriptor>> {
        model.validate()?;
        if self.models.contains_key(model.name()) {
            return Err(OrmError::config(format!(
                "model {} is already registered",
                model.name()
            )));
        }
        let model = Arc::new(model);
        self.models
            .insert(model.name().to_string(), Arc::clone(&model));
        Ok(model)
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<ModelDescriptor>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::config(format!("model {name} is not registered")))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
