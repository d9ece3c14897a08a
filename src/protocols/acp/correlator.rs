//! Request correlator for host-initiated calls.
//!
//! Owns the map of outstanding calls keyed by the numeric id sent on the wire.
//! Each entry carries a oneshot sender for the caller and the abort handle of
//! its timeout task. An entry leaves the map exactly once: on response,
//! timeout, write failure or `reject_all`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;

use super::framing::FrameWriter;
use super::message::{Message, Request, RequestId, Response};
use crate::api::types::ApiError;

type CallOutcome = Result<Value, ApiError>;

struct PendingCall {
    method: String,
    tx: oneshot::Sender<CallOutcome>,
    timer: AbortHandle,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingCall>>>;

/// Future for the outcome of one call.
pub struct PendingResponse {
    id: u64,
    method: String,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingResponse {
    /// The id this call was sent with.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for PendingResponse {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without an outcome: the correlator itself went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(ApiError::Shutdown {
                method: self.method.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct RequestCorrelator {
    writer: FrameWriter,
    next_id: AtomicU64,
    pending: PendingMap,
    timeout: Duration,
}

impl RequestCorrelator {
    pub fn new(writer: FrameWriter, timeout: Duration) -> Self {
        Self {
            writer,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Send a request and return the future for its response.
    ///
    /// The call is registered before the request is written, so a response
    /// can never overtake its own registration.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingResponse, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            // Hold the lock while arming the timer so it cannot fire before the entry exists
            let mut pending = self.pending.lock().await;
            let timer = spawn_timeout(self.pending.clone(), id, method.to_string(), self.timeout);
            pending.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    tx,
                    timer,
                },
            );
        }

        log::debug!("Sending request: id={id}, method={method}");

        let request = Message::Request(Request {
            id: RequestId::from(id),
            method: method.to_string(),
            params,
        });

        if let Err(e) = self.writer.send(&request).await {
            if let Some(call) = self.pending.lock().await.remove(&id) {
                call.timer.abort();
            }
            log::error!("Failed to send request: id={id}, method={method}, error={e}");
            return Err(e);
        }

        Ok(PendingResponse {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Send a request and wait for its result.
    pub async fn call(&self, method: &str, params: Option<Value>) -> CallOutcome {
        self.send_request(method, params).await?.await
    }

    /// Settle the call matching `response.id`.
    ///
    /// Returns `false` when the response had no id or matched nothing
    /// (duplicate, late after timeout, or never ours); such responses are dropped.
    pub async fn handle_response(&self, response: Response) -> bool {
        let Some(id) = response.id.as_ref() else {
            log::debug!("Ignoring response without id");
            return false;
        };

        let Some(numeric_id) = id.as_u64() else {
            log::debug!("Ignoring response for foreign id={id}");
            return false;
        };

        let call = self.pending.lock().await.remove(&numeric_id);
        let Some(call) = call else {
            log::debug!("Ignoring response for unknown request: id={numeric_id}");
            return false;
        };

        call.timer.abort();

        let outcome = match response.error {
            Some(error) => {
                log::debug!(
                    "Request failed: id={numeric_id}, method={}, code={}",
                    call.method,
                    error.code
                );
                Err(ApiError::from(error))
            }
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        if call.tx.send(outcome).is_err() {
            log::debug!("Caller dropped before response: id={numeric_id}, method={}", call.method);
        }
        true
    }

    /// Reject every outstanding call, building each error from its method.
    pub async fn reject_all<F>(&self, make_error: F) -> usize
    where
        F: Fn(&str) -> ApiError,
    {
        let drained: Vec<(u64, PendingCall)> = self.pending.lock().await.drain().collect();
        let count = drained.len();

        for (id, call) in drained {
            call.timer.abort();
            log::debug!("Rejecting pending request: id={id}, method={}", call.method);
            let _ = call.tx.send(Err(make_error(&call.method)));
        }

        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn spawn_timeout(pending: PendingMap, id: u64, method: String, timeout: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let call = pending.lock().await.remove(&id);
        if let Some(call) = call {
            let timeout_ms = timeout.as_millis() as u64;
            log::warn!("Request timed out: id={id}, method={method}, after={timeout_ms}ms");
            let _ = call.tx.send(Err(ApiError::Timeout { method, timeout_ms }));
        }
    })
    .abort_handle()
}
