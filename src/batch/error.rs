//! Batch error types.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::model::{Handle, Model};
use crate::storage::{ObjectId, StorageError};

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors from reading or writing a relationship.
#[derive(Debug, Clone, Error)]
pub enum RelationshipError {
    /// Writing a relationship needs the context that owns the record.
    #[error("relationship {relationship} cannot be written without a context")]
    NoContext { relationship: String },

    /// A related model has no stored record.
    #[error("related model in {relationship} has no backing record")]
    NoBackingRecord { relationship: String },

    #[error("undefined relationship: entity={entity}, relationship={relationship}")]
    UndefinedRelationship { entity: String, relationship: String },

    /// To-one accessor used on a to-many relationship or the other way round.
    #[error("relationship {entity}.{relationship} has a different cardinality")]
    CardinalityMismatch { entity: String, relationship: String },

    /// Building a related model failed in the storage layer.
    #[error("cannot resolve {relationship}: {reason}")]
    Unresolvable { relationship: String, reason: String },
}

/// Why a single model of a batch failed.
#[derive(Debug, Clone)]
pub enum FailureReason {
    /// The model's identifier doesn't resolve to a record.
    Missing,
    /// No entity is registered for the model type.
    NoEntity,
    /// The model has an identifier but its record was deleted.
    StaleIdentifier,
    Relationship(RelationshipError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Missing => write!(f, "record not found"),
            FailureReason::NoEntity => write!(f, "no entity for model type"),
            FailureReason::StaleIdentifier => write!(f, "record was deleted"),
            FailureReason::Relationship(err) => write!(f, "{err}"),
        }
    }
}

/// A model that failed, type-erased so the error stays non-generic.
pub struct FailedModel {
    model: Box<dyn Any + Send + Sync>,
    pub id: Option<ObjectId>,
    pub reason: FailureReason,
}

impl FailedModel {
    pub(crate) fn new<M: Model>(model: &Handle<M>, reason: FailureReason) -> Self {
        Self {
            model: Box::new(model.clone()),
            id: model.id(),
            reason,
        }
    }

    /// Recover the model handle if it is of type `M`.
    pub fn model<M: Model>(&self) -> Option<&Handle<M>> {
        self.model.downcast_ref::<Handle<M>>()
    }
}

impl fmt::Debug for FailedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailedModel")
            .field("id", &self.id)
            .field("reason", &self.reason)
            .finish()
    }
}

/// Models that failed in a partially successful batch, in input order.
#[derive(Debug, Default)]
pub struct FailedModels(Vec<FailedModel>);

impl FailedModels {
    pub(crate) fn push(&mut self, failed: FailedModel) {
        self.0.push(failed);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailedModel> {
        self.0.iter()
    }

    /// Handles of every failed model of type `M`.
    pub fn models<M: Model>(&self) -> Vec<Handle<M>> {
        self.0.iter().filter_map(|f| f.model::<M>()).cloned().collect()
    }

    /// Identifiers of failed models that had one.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.0.iter().filter_map(|f| f.id.clone()).collect()
    }
}

impl fmt::Display for FailedModels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|failed| match &failed.id {
                Some(id) => format!("{id} ({})", failed.reason),
                None => format!("<new> ({})", failed.reason),
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Errors that can occur during batch operations.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The model type has no identifier-based constructor.
    #[error("model type {0} cannot be constructed from a record")]
    ConstructionUnsupported(&'static str),

    /// The model type was never registered with the store.
    #[error("no entity registered for model type {0}")]
    EntityNotResolved(&'static str),

    /// Some models could not be loaded; the rest were.
    #[error("failed to load {} model(s): {}", .0.len(), .0)]
    LoadFailed(FailedModels),

    /// Some models could not be saved; the rest were.
    #[error("failed to save {} model(s): {}", .0.len(), .0)]
    SaveFailed(FailedModels),

    #[error("relationship error: {0}")]
    Relationship(#[from] RelationshipError),
}

impl BatchError {
    /// True if the batch applied its successful subset before failing.
    pub fn is_partial(&self) -> bool {
        matches!(self, BatchError::LoadFailed(_) | BatchError::SaveFailed(_))
    }

    /// Failed models of a partial failure.
    pub fn failed(&self) -> Option<&FailedModels> {
        match self {
            BatchError::LoadFailed(failed) | BatchError::SaveFailed(failed) => Some(failed),
            _ => None,
        }
    }
}
