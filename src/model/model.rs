//! The model capability set.

use crate::batch::{BatchResult, Configuration, Resolver};
use crate::model::Handle;
use crate::storage::{ObjectId, Record};

/// An application type that is stored as records of one entity.
///
/// Implementations map their fields to record attributes and use the
/// [`Resolver`] for relationships. `update_from_record` should resolve every
/// relationship before taking the model's write lock: resolving a cyclic
/// graph can hand back the very model being updated.
///
/// ```ignore
/// impl Model for Book {
///     type Config = BookConfig;
///
///     fn id(&self) -> Option<&ObjectId> { self.id.as_ref() }
///     fn set_id(&mut self, id: Option<ObjectId>) { self.id = id }
///     fn construct(_: &ObjectId) -> Option<Self> { Some(Book::default()) }
///
///     fn update_from_record(model: &Handle<Self>, record: &Record, resolver: &Resolver<'_>, config: Option<&BookConfig>) -> BatchResult<()> {
///         let author = resolver.to_one::<Author>(record, "author", config.and_then(|c| c.author.as_ref()))?;
///         let mut book = model.write();
///         book.title = record.get_str("title").unwrap_or_default().to_string();
///         book.author = author;
///         Ok(())
///     }
///
///     fn update_record(model: &Handle<Self>, record: &mut Record, resolver: &Resolver<'_>, _: Option<&BookConfig>) -> BatchResult<()> {
///         let book = model.read();
///         record.set("title", json!(book.title));
///         resolver.set_to_one(record, "author", book.author.as_ref())
///     }
/// }
/// ```
pub trait Model: Send + Sync + Sized + 'static {
    /// Per-call configuration, usually nesting the configurations of the
    /// related model types.
    type Config: Configuration;

    /// Identifier of the backing record, `None` until first saved.
    fn id(&self) -> Option<&ObjectId>;

    fn set_id(&mut self, id: Option<ObjectId>);

    /// Build an empty model for a record. Types that return `None` can only
    /// be loaded explicitly, never by query or relationship.
    fn construct(_id: &ObjectId) -> Option<Self> {
        None
    }

    /// Copy a record's values into the model.
    fn update_from_record(
        model: &Handle<Self>,
        record: &Record,
        resolver: &Resolver<'_>,
        config: Option<&Self::Config>,
    ) -> BatchResult<()>;

    /// Copy the model's values into a record.
    fn update_record(
        model: &Handle<Self>,
        record: &mut Record,
        resolver: &Resolver<'_>,
        config: Option<&Self::Config>,
    ) -> BatchResult<()>;
}
