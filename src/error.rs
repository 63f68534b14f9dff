//! Error types for the indicator engine.

use std::time::Duration;
use thiserror::Error;

use crate::hierarchy::{EntityId, HierarchyError};
use crate::indicators::registry::RegistryError;
use crate::submission::ItineraryId;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures that abort an engine call.
///
/// Bad answers inside a submission are not here: they are recovered by
/// excluding the submission and recording an
/// [`AnswerError`](crate::indicators::types::AnswerError) in the result detail.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown indicator '{key}'")]
    UnknownIndicator { key: String },

    #[error("entity '{id}' not found in hierarchy")]
    EntityNotFound { id: EntityId },

    #[error("itinerary '{id}' is not known to the submission source")]
    UnknownItinerary { id: ItineraryId },

    #[error("invalid hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("invalid indicator registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("{context}: {source}")]
    Source {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{context} timed out after {}ms", .timeout.as_millis())]
    Timeout { context: String, timeout: Duration },
}
