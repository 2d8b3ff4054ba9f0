//! Mock transport for testing.
//!
//! Allows queueing responses and capturing sent requests for verification.
//! A mock can also wrap another transport, recording every request while
//! the inner transport does the actual answering.

use super::{RemoteSyncTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{BatchSyncRequest, BatchSyncResponse};

/// Callback run while a request is "on the wire", after it was recorded
/// and before the response is returned.
pub type RequestHook =
    Arc<dyn Fn(BatchSyncRequest) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Mock transport for testing.
#[derive(Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    requests: Vec<BatchSyncRequest>,
    responses: VecDeque<BatchSyncResponse>,
    fail_next: Option<String>,
    hook: Option<RequestHook>,
    fallback: Option<Arc<dyn RemoteSyncTransport>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockTransport")
            .field("requests", &inner.requests.len())
            .field("queued", &inner.responses.len())
            .field("has_hook", &inner.hook.is_some())
            .field("has_fallback", &inner.fallback.is_some())
            .finish()
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that forwards unqueued requests to `inner`.
    pub fn wrapping(inner: Arc<dyn RemoteSyncTransport>) -> Self {
        let mock = Self::new();
        mock.lock().fallback = Some(inner);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for the next call.
    pub fn queue_response(&self, response: BatchSyncResponse) {
        self.lock().responses.push_back(response);
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<BatchSyncRequest> {
        self.lock().requests.clone()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<BatchSyncRequest> {
        self.lock().requests.last().cloned()
    }

    /// Cause the next call to fail with the given error.
    pub fn fail_next(&self, error: &str) {
        self.lock().fail_next = Some(error.to_string());
    }

    /// Run `hook` during every subsequent call.
    pub fn set_hook<F, Fut>(&self, hook: F)
    where
        F: Fn(BatchSyncRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: RequestHook =
            Arc::new(move |request| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(hook(request))
            });
        self.lock().hook = Some(hook);
    }

    /// Clear recorded requests and queued responses.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.requests.clear();
        inner.responses.clear();
        inner.fail_next = None;
    }
}

#[async_trait]
impl RemoteSyncTransport for MockTransport {
    async fn batch_sync(
        &self,
        request: BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError> {
        let (hook, fallback) = {
            let mut inner = self.lock();
            inner.requests.push(request.clone());

            // Check for forced failure
            if let Some(error) = inner.fail_next.take() {
                return Err(TransportError::Unavailable(error));
            }
            (inner.hook.clone(), inner.fallback.clone())
        };

        if let Some(hook) = hook {
            hook(request.clone()).await;
        }

        let queued = self.lock().responses.pop_front();
        match (queued, fallback) {
            (Some(response), _) => Ok(response),
            (None, Some(fallback)) => fallback.batch_sync(request).await,
            (None, None) => Err(TransportError::Unavailable(
                "no response queued".to_string(),
            )),
        }
    }
}
