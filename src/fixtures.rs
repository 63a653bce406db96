//! Shared models and schemas for unit tests.

use serde_json::json;

use crate::batch::{BatchResult, Configuration, FetchConfig, RelationshipPolicy, Resolver};
use crate::catalog::{AttributeKind, EntityBuilder, Schema, SchemaBuilder};
use crate::model::{Handle, Model};
use crate::storage::{ObjectId, Record, Store};

/// Authors, their books, and users befriending each other.
pub(crate) fn library_schema() -> Schema {
    SchemaBuilder::new("1.0.0")
        .entity(
            EntityBuilder::new("Author")
                .attribute("name", AttributeKind::String)
                .to_many("books", "Book", Some("author")),
        )
        .entity(
            EntityBuilder::new("Book")
                .attribute("title", AttributeKind::String)
                .optional_attribute("year", AttributeKind::Integer)
                .to_one("author", "Author", Some("books")),
        )
        .entity(
            EntityBuilder::new("User")
                .attribute("name", AttributeKind::String)
                .optional_attribute("email", AttributeKind::String)
                .attribute_with_default("age", AttributeKind::Integer, json!(0))
                .to_one("best_friend", "User", None),
        )
        .build()
        .unwrap()
}

/// A record with a fresh identifier, defaults and empty relationships.
pub(crate) fn blank_record(schema: &Schema, entity: &str) -> Record {
    let description = schema.entity(entity).unwrap();
    let mut record = Record::new(ObjectId::generate(), description.name.clone());
    for attribute in &description.attributes {
        if let Some(default) = &attribute.default {
            record.set(attribute.name.clone(), default.clone());
        }
    }
    for relationship in &description.relationships {
        record.set_relationship(relationship.name.clone(), relationship.empty_value());
    }
    record
}

/// In-memory library store with `Book` and `Author` registered. `User` is
/// left unregistered on purpose.
pub(crate) fn library() -> Store {
    let store = Store::in_memory(&library_schema()).unwrap();
    store.register::<Book>("Book").unwrap();
    store.register::<Author>("Author").unwrap();
    store
}

pub(crate) fn schema_v1() -> Schema {
    SchemaBuilder::new("1.0.0")
        .entity(
            EntityBuilder::new("Book")
                .attribute("title", AttributeKind::String)
                .optional_attribute("year", AttributeKind::Integer),
        )
        .build()
        .unwrap()
}

pub(crate) fn schema_v2() -> Schema {
    SchemaBuilder::new("2.0.0")
        .entity(
            EntityBuilder::new("Author")
                .attribute("name", AttributeKind::String)
                .to_many("books", "Book", Some("author")),
        )
        .entity(
            EntityBuilder::new("Book")
                .attribute("title", AttributeKind::String)
                .optional_attribute("year", AttributeKind::Integer)
                .attribute_with_default("pages", AttributeKind::Integer, json!(0))
                .to_one("author", "Author", Some("books")),
        )
        .build()
        .unwrap()
}

pub(crate) fn schema_v3() -> Schema {
    SchemaBuilder::new("3.0.0")
        .entity(
            EntityBuilder::new("Author")
                .attribute("name", AttributeKind::String)
                .optional_attribute("born", AttributeKind::Integer)
                .to_many("books", "Book", Some("author")),
        )
        .entity(
            EntityBuilder::new("Book")
                .attribute("title", AttributeKind::String)
                .optional_attribute("year", AttributeKind::Integer)
                .attribute_with_default("pages", AttributeKind::Integer, json!(0))
                .optional_attribute("isbn", AttributeKind::String)
                .to_one("author", "Author", Some("books")),
        )
        .build()
        .unwrap()
}

#[derive(Debug, Default)]
pub(crate) struct BookConfig {
    pub fetch: Option<FetchConfig>,
    pub relationship: Option<RelationshipPolicy>,
    pub author: Option<AuthorConfig>,
}

impl BookConfig {
    pub fn with_fetch(fetch: FetchConfig) -> Self {
        Self {
            fetch: Some(fetch),
            ..Self::default()
        }
    }
}

impl Configuration for BookConfig {
    fn fetch(&self) -> Option<&FetchConfig> {
        self.fetch.as_ref()
    }

    fn relationship(&self) -> Option<RelationshipPolicy> {
        self.relationship
    }
}

#[derive(Debug, Default)]
pub(crate) struct AuthorConfig {
    pub fetch: Option<FetchConfig>,
    pub relationship: Option<RelationshipPolicy>,
    pub books: Option<Box<BookConfig>>,
}

impl AuthorConfig {
    pub fn with_policy(policy: RelationshipPolicy) -> Self {
        Self {
            relationship: Some(policy),
            ..Self::default()
        }
    }
}

impl Configuration for AuthorConfig {
    fn fetch(&self) -> Option<&FetchConfig> {
        self.fetch.as_ref()
    }

    fn relationship(&self) -> Option<RelationshipPolicy> {
        self.relationship
    }
}

#[derive(Debug, Default)]
pub(crate) struct Book {
    pub id: Option<ObjectId>,
    pub title: String,
    pub year: Option<i64>,
    pub author: Option<Handle<Author>>,
}

impl Book {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

impl Model for Book {
    type Config = BookConfig;

    fn id(&self) -> Option<&ObjectId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn construct(id: &ObjectId) -> Option<Self> {
        Some(Self {
            id: Some(id.clone()),
            ..Self::default()
        })
    }

    fn update_from_record(
        model: &Handle<Self>,
        record: &Record,
        resolver: &Resolver<'_>,
        config: Option<&BookConfig>,
    ) -> BatchResult<()> {
        let author =
            resolver.to_one::<Author>(record, "author", config.and_then(|c| c.author.as_ref()))?;
        let mut book = model.write();
        book.title = record.get_str("title").unwrap_or_default().to_string();
        book.year = record.get_i64("year");
        book.author = author;
        Ok(())
    }

    fn update_record(
        model: &Handle<Self>,
        record: &mut Record,
        resolver: &Resolver<'_>,
        _config: Option<&BookConfig>,
    ) -> BatchResult<()> {
        let book = model.read();
        record.set("title", json!(book.title));
        match book.year {
            Some(year) => record.set("year", json!(year)),
            None => {
                record.remove("year");
            }
        }
        resolver.set_to_one(record, "author", book.author.as_ref())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Author {
    pub id: Option<ObjectId>,
    pub name: String,
    pub books: Vec<Handle<Book>>,
}

impl Author {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Model for Author {
    type Config = AuthorConfig;

    fn id(&self) -> Option<&ObjectId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn construct(id: &ObjectId) -> Option<Self> {
        Some(Self {
            id: Some(id.clone()),
            ..Self::default()
        })
    }

    fn update_from_record(
        model: &Handle<Self>,
        record: &Record,
        resolver: &Resolver<'_>,
        config: Option<&AuthorConfig>,
    ) -> BatchResult<()> {
        let books =
            resolver.to_many::<Book>(record, "books", config.and_then(|c| c.books.as_deref()))?;
        let mut author = model.write();
        author.name = record.get_str("name").unwrap_or_default().to_string();
        author.books = books;
        Ok(())
    }

    fn update_record(
        model: &Handle<Self>,
        record: &mut Record,
        resolver: &Resolver<'_>,
        _config: Option<&AuthorConfig>,
    ) -> BatchResult<()> {
        let author = model.read();
        record.set("name", json!(author.name));
        resolver.set_to_many(record, "books", &author.books)
    }
}

/// Part of the schema but never registered with the library store.
#[derive(Debug, Default)]
pub(crate) struct User {
    pub id: Option<ObjectId>,
    pub name: String,
}

impl User {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Model for User {
    type Config = ();

    fn id(&self) -> Option<&ObjectId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn update_from_record(
        model: &Handle<Self>,
        record: &Record,
        _resolver: &Resolver<'_>,
        _config: Option<&()>,
    ) -> BatchResult<()> {
        model.write().name = record.get_str("name").unwrap_or_default().to_string();
        Ok(())
    }

    fn update_record(
        model: &Handle<Self>,
        record: &mut Record,
        _resolver: &Resolver<'_>,
        _config: Option<&()>,
    ) -> BatchResult<()> {
        record.set("name", json!(model.read().name));
        Ok(())
    }
}

/// A model without a constructor.
#[derive(Debug, Default)]
pub(crate) struct Unbuildable {
    pub id: Option<ObjectId>,
}

impl Model for Unbuildable {
    type Config = ();

    fn id(&self) -> Option<&ObjectId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    fn update_from_record(
        _model: &Handle<Self>,
        _record: &Record,
        _resolver: &Resolver<'_>,
        _config: Option<&()>,
    ) -> BatchResult<()> {
        Ok(())
    }

    fn update_record(
        _model: &Handle<Self>,
        _record: &mut Record,
        _resolver: &Resolver<'_>,
        _config: Option<&()>,
    ) -> BatchResult<()> {
        Ok(())
    }
}
