//! Client error type.

use sync_core::{LifecycleError, MappingError, RegistryError, ValidationError};
use sync_types::{EntityId, EntityType};
use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered `success: false`.
    #[error("server rejected batch: {0}")]
    ServerRejected(String),

    /// Local storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry misconfiguration.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Encoding or decoding a record failed.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// A record cannot make the requested transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Input rejected before it was stored.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// No live record with this id.
    #[error("{entity_type} {id} not found")]
    NotFound {
        /// Collection searched
        entity_type: EntityType,
        /// Requested id
        id: EntityId,
    },

    /// A record with this id already exists.
    #[error("{entity_type} {id} already exists")]
    AlreadyExists {
        /// Collection written
        entity_type: EntityType,
        /// Conflicting id
        id: EntityId,
    },
}

impl ClientError {
    /// Whether the next cycle may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::ServerRejected(_) | Self::Store(_) => true,
            Self::Registry(_)
            | Self::Mapping(_)
            | Self::Lifecycle(_)
            | Self::Validation(_)
            | Self::NotFound { .. }
            | Self::AlreadyExists { .. } => false,
        }
    }
}
