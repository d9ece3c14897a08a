//! AgentConnection trait: runtime → protocol abstraction boundary.
//!
//! The session layer talks to the agent only through this trait, so it never
//! sees framing, ids or timers.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::types::ApiError;

/// Abstract interface for a host → agent call channel.
///
/// Implemented by `AcpAgent`; tests substitute recording mocks.
#[async_trait]
pub trait AgentConnection: Send + Sync {
    /// Issue a call and wait for its result.
    ///
    /// # Returns
    /// * `Ok(Value)` - The `result` of the agent's response (`null` if absent)
    /// * `Err(ApiError::Remote)` - The agent replied with an error object
    /// * `Err(ApiError::Timeout)` - No response within the call timeout
    /// * `Err(ApiError::Shutdown)` - The connection was shut down first
    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError>;

    /// Shut the connection down. Safe to call more than once.
    async fn shutdown(&self) -> Result<(), ApiError>;
}
