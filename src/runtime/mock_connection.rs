//! Recording `AgentConnection` for runtime tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::types::ApiError;
use crate::protocols::agent_connection::AgentConnection;

/// Records every outbound call and answers from a per-method script.
///
/// Unscripted methods answer `null`.
#[derive(Default)]
pub struct MockConnection {
    calls: Mutex<Vec<(String, Value)>>,
    replies: Mutex<HashMap<String, Result<Value, ApiError>>>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn reply(&self, method: &str, reply: Result<Value, ApiError>) {
        self.replies.lock().await.insert(method.to_string(), reply);
    }

    pub async fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().await.clone()
    }

    pub async fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }
}

#[async_trait]
impl AgentConnection for MockConnection {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        self.calls.lock().await.push((method.to_string(), params));
        self.replies
            .lock()
            .await
            .get(method)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }

    async fn shutdown(&self) -> Result<(), ApiError> {
        Ok(())
    }
}
