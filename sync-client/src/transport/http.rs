//! HTTP transport for the hosted sync service.
//!
//! One `POST {base_url}/sync/batch` per round trip, JSON in both
//! directions, optional bearer token.

use super::{RemoteSyncTransport, TransportError};
use crate::config::HttpConfig;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use sync_types::{BatchSyncRequest, BatchSyncResponse};
use tracing::{debug, warn};

/// Path of the batch endpoint, relative to the base URL.
pub const BATCH_PATH: &str = "/sync/batch";

/// HTTP-based sync transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    /// Build a transport from configuration.
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}{}", config.base_url.trim_end_matches('/'), BATCH_PATH),
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// Full URL of the batch endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteSyncTransport for HttpTransport {
    async fn batch_sync(
        &self,
        request: BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError> {
        let body = request
            .to_json()
            .map_err(|e| TransportError::InvalidResponse(format!("encode request: {e}")))?;

        let mut builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        debug!(url = %self.url, home_id = %request.home_id, "POST batch");
        let response = builder.send().await.map_err(map_reqwest)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest)?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            warn!(status = status.as_u16(), "Sync endpoint returned an error");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        BatchSyncResponse::from_json(&bytes)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Unavailable(err.to_string())
    }
}
