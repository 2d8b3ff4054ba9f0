//! Transport abstraction for Homestock sync.
//!
//! One call per sync pair: the whole push+pull batch goes out as a single
//! request and comes back as a single response. Transports never retry;
//! a failed call fails the pair and the next cycle tries again.
//!
//! Implementations:
//! - [`HttpTransport`] talks JSON over HTTPS to the sync authority
//! - [`LoopbackRemote`] is an in-process authority for tests and demos
//! - [`MockTransport`] queues canned responses and records requests

mod http;
mod loopback;
mod mock;

pub use http::HttpTransport;
pub use loopback::{LoopbackRemote, ServerRecord};
pub use mock::{MockTransport, RequestHook};

use async_trait::async_trait;
use sync_types::{BatchSyncRequest, BatchSyncResponse};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the remote.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The remote answered with a non-success HTTP status.
    #[error("remote returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The response body was not a valid batch response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The transport could not be set up.
    #[error("transport misconfigured: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether a later attempt may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_) | Self::Config(_) => false,
        }
    }
}

/// The remote sync authority.
#[async_trait]
pub trait RemoteSyncTransport: Send + Sync {
    /// Send one batch and wait for its response.
    async fn batch_sync(
        &self,
        request: BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError>;
}
