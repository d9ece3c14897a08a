//! Inbound dispatcher for agent-initiated requests.
//!
//! Maps method names to capability handlers. Every request gets exactly one
//! response: the handler's result, `-32603` when the handler fails or panics,
//! or `-32601` when nothing is registered for the method.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::message::{Request, Response, INTERNAL_ERROR, METHOD_NOT_FOUND};
use crate::api::types::ApiError;

/// Handler for one agent-initiated method. Receives the raw `params`.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, params: Value) -> Result<Value, ApiError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ApiError>> + Send,
{
    async fn handle(&self, params: Value) -> Result<Value, ApiError> {
        (self.0)(params).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Default)]
pub struct InboundDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
}

impl InboundDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a later registration for the same method replaces it.
    pub async fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let method = method.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(method.clone(), handler).is_some() {
            log::debug!("Replaced handler: method={method}");
        } else {
            log::debug!("Registered handler: method={method}");
        }
    }

    pub async fn has_handler(&self, method: &str) -> bool {
        self.handlers.read().await.contains_key(method)
    }

    /// Run the handler for `request` and build its response.
    pub async fn handle_request(&self, request: Request) -> Response {
        let Request { id, method, params } = request;

        let handler = self.handlers.read().await.get(&method).cloned();
        let Some(handler) = handler else {
            log::warn!("No handler for agent request: method={method}, id={id}");
            let message = ApiError::MethodNotFound { method }.to_string();
            return Response::failure(id, METHOD_NOT_FOUND, message);
        };

        log::debug!("Dispatching agent request: method={method}, id={id}");

        let params = params.unwrap_or(Value::Null);
        // Run on its own task so a panicking handler still gets a reply
        let outcome = tokio::spawn(async move { handler.handle(params).await }).await;

        match outcome {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(e)) => {
                log::warn!("Handler failed: method={method}, id={id}, error={e}");
                Response::failure(id, INTERNAL_ERROR, e.to_string())
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "Handler was cancelled".to_string()
                };
                log::error!("Handler panicked: method={method}, id={id}, error={message}");
                Response::failure(id, INTERNAL_ERROR, message)
            }
        }
    }

    /// Drop every registered handler.
    pub async fn clear(&self) {
        self.handlers.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::acp::message::RequestId;
    use serde_json::json;

    fn request(id: RequestId, method: &str, params: Value) -> Request {
        Request {
            id,
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_unknown_method_replies_method_not_found() {
        let dispatcher = InboundDispatcher::new();

        let response = dispatcher
            .handle_request(Request {
                id: RequestId::from("x"),
                method: "nope".to_string(),
                params: None,
            })
            .await;

        assert_eq!(response.id, Some(RequestId::from("x")));
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found: nope");
    }

    #[tokio::test]
    async fn test_handler_receives_raw_params() {
        let dispatcher = InboundDispatcher::new();
        dispatcher
            .register_handler("echo", handler_fn(|params| async move { Ok(params) }))
            .await;

        let response = dispatcher
            .handle_request(request(RequestId::from(3), "echo", json!({"a": [1, 2]})))
            .await;

        assert_eq!(response.result, Some(json!({"a": [1, 2]})));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_handler_error_replies_internal_error() {
        let dispatcher = InboundDispatcher::new();
        dispatcher
            .register_handler(
                "fs/read_text_file",
                handler_fn(|_| async move {
                    Err(ApiError::PathNotFound {
                        path: "missing.txt".to_string(),
                    })
                }),
            )
            .await;

        let response = dispatcher
            .handle_request(request(RequestId::from(1), "fs/read_text_file", json!({})))
            .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "Path not found: missing.txt");
    }

    #[tokio::test]
    async fn test_panicking_handler_still_replies() {
        let dispatcher = InboundDispatcher::new();
        dispatcher
            .register_handler(
                "lsp/hover",
                handler_fn(|_| async move {
                    if true {
                        panic!("hover exploded");
                    }
                    Ok(Value::Null)
                }),
            )
            .await;

        let response = dispatcher
            .handle_request(request(RequestId::from(9), "lsp/hover", json!({})))
            .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "hover exploded");
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let dispatcher = InboundDispatcher::new();
        dispatcher
            .register_handler("m", handler_fn(|_| async move { Ok(json!(1)) }))
            .await;
        dispatcher
            .register_handler("m", handler_fn(|_| async move { Ok(json!(2)) }))
            .await;

        let response = dispatcher
            .handle_request(request(RequestId::from(1), "m", Value::Null))
            .await;

        assert_eq!(response.result, Some(json!(2)));
        assert_eq!(dispatcher.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_removes_handlers() {
        let dispatcher = InboundDispatcher::new();
        dispatcher
            .register_handler("m", handler_fn(|_| async move { Ok(Value::Null) }))
            .await;

        dispatcher.clear().await;

        assert!(dispatcher.is_empty().await);
        assert!(!dispatcher.has_handler("m").await);
    }
}
