//! Bridge types shared by the protocol and runtime layers.
//!
//! These are the values the host sees: sessions, settings patches, parsed
//! notifications, capability requests and the error type every public
//! operation returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent-issued session identifier
pub type SessionId = String;

/// Host-issued terminal identifier (UUID v4 string)
pub type TerminalId = String;

/// Identifier of a stored permission rule (UUID v4 string)
pub type RuleId = String;

/// Errors surfaced by the bridge.
///
/// Nothing here is fatal to the process: every variant is either returned to
/// a host caller or turned into a JSON-RPC error reply for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type")]
pub enum ApiError {
    /// Invalid input parameter
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
    /// Path does not exist or is not accessible
    #[error("Path not found: {path}")]
    PathNotFound { path: String },
    /// Path is not a directory
    #[error("Path is not a directory: {path}")]
    PathNotDirectory { path: String },
    /// IO error while talking to the agent or the file system
    #[error("IO error: {message}")]
    IoError { message: String },
    /// Malformed or unexpected protocol traffic
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },
    /// The agent answered a call with a JSON-RPC error object
    #[error("{message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    /// No response arrived within the call timeout
    #[error("Request timeout: {method} did not complete within {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },
    /// The bridge was shut down while the call was outstanding
    #[error("Bridge shut down before {method} completed")]
    Shutdown { method: String },
    /// The agent closed its output while the call was outstanding
    #[error("Agent connection lost before {method} completed")]
    ConnectionLost { method: String },
    /// No capability handler is registered for an inbound method
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },
    /// The operation needs a current session and there is none
    #[error("No active session")]
    NoActiveSession,
    /// Terminal ID is unknown or already released
    #[error("Terminal not found: {terminal_id}")]
    TerminalNotFound { terminal_id: TerminalId },
    /// Permission rule ID is unknown
    #[error("Permission rule not found: {rule_id}")]
    RuleNotFound { rule_id: RuleId },
}

impl ApiError {
    pub(crate) fn io(context: &str, err: impl std::fmt::Display) -> Self {
        ApiError::IoError {
            message: format!("{context}: {err}"),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidInput {
            message: message.into(),
        }
    }
}

// ============================================================================
// Sessions and settings
// ============================================================================

/// Snapshot of an agent session. Not a live handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    /// Milliseconds since epoch (f64 for JavaScript number compatibility)
    pub created_at: f64,
    pub updated_at: f64,
}

/// Title given to sessions the agent returned without a record.
pub const PLACEHOLDER_SESSION_TITLE: &str = "New Session";

impl Session {
    /// Build a placeholder record for a session known only by its id.
    pub fn placeholder(id: SessionId, title: Option<String>) -> Self {
        let now = now_ms();
        Self {
            id,
            title: title.unwrap_or_else(|| PLACEHOLDER_SESSION_TITLE.to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Permission handling mode requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

/// Sparse settings patch the host wants applied to whichever session is current.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_thinking_tokens: Option<u32>,
}

impl DesiredSettings {
    /// True when no field has been set.
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.plan_mode.is_none()
            && self.permission_mode.is_none()
            && self.max_thinking_tokens.is_none()
    }

    /// Shallow merge: every field set in `patch` overwrites ours.
    pub fn merge(&mut self, patch: DesiredSettings) {
        if patch.model.is_some() {
            self.model = patch.model;
        }
        if patch.plan_mode.is_some() {
            self.plan_mode = patch.plan_mode;
        }
        if patch.permission_mode.is_some() {
            self.permission_mode = patch.permission_mode;
        }
        if patch.max_thinking_tokens.is_some() {
            self.max_thinking_tokens = patch.max_thinking_tokens;
        }
    }
}

/// Options for `session/new`.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub cwd: Option<String>,
    pub mcp_servers: Vec<Value>,
}

/// Options for `session/resume`.
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub title: Option<String>,
    pub cwd: Option<String>,
    pub mcp_servers: Vec<Value>,
}

/// Result of a prompt call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOutcome {
    pub session_id: SessionId,
    pub stop_reason: Option<String>,
    pub result: Value,
}

/// User decision for a tool call awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionDecision {
    AllowOnce,
    AllowAlways,
    Deny,
}

// ============================================================================
// Notifications
// ============================================================================

/// Kind tag carried by every `session/update` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionUpdateKind {
    Thought,
    Text,
    ToolUse,
    ToolResult,
    FileChange,
    McpCall,
    TaskList,
    SubagentRun,
    Error,
    ConfirmationRequest,
    SessionSwitch,
    /// Deprecated: older agents send whole messages instead of `text` chunks.
    Message,
    /// Deprecated: older agents send `tool_call` instead of `tool_use`.
    ToolCall,
    #[serde(other)]
    Unknown,
}

/// A parsed `session/update` notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateEvent {
    pub session_id: Option<SessionId>,
    pub kind: SessionUpdateKind,
    /// The update object as sent by the agent
    pub payload: Value,
}

/// Token/cost totals reported when a turn completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
}

/// A parsed `session/complete` notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompleteEvent {
    pub session_id: Option<SessionId>,
    pub usage: Option<UsageTotals>,
    pub payload: Value,
}

// ============================================================================
// Capability requests (agent → host)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReadTextFileRequest {
    pub session_id: Option<SessionId>,
    pub path: String,
    /// 1-based first line to return
    pub line: Option<u32>,
    /// Maximum number of lines to return
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteTextFileRequest {
    pub session_id: Option<SessionId>,
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTerminalRequest {
    pub session_id: Option<SessionId>,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub output_byte_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutput {
    pub output: String,
    pub truncated: bool,
    pub exit_status: Option<TerminalExitStatus>,
}

/// Position-based language-service query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolQuery {
    pub path: String,
    /// 0-based line
    pub line: u32,
    /// 0-based UTF-16 column
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleDecision {
    Allow,
    Deny,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    pub id: RuleId,
    /// Tool name the rule applies to (e.g. "Bash", "Edit")
    pub tool: String,
    /// Regex matched against the tool's subject (command, path); `None` matches everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub decision: RuleDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPermissionRule {
    pub tool: String,
    #[serde(default)]
    pub pattern: Option<String>,
    pub decision: RuleDecision,
}

/// Partial rule update. Absent fields are left alone; `pattern: null`
/// clears the pattern so the rule matches every subject again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRulePatch {
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub pattern: Option<Option<String>>,
    #[serde(default)]
    pub decision: Option<RuleDecision>,
}

/// Distinguish an explicit `null` from an absent field.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Current time in milliseconds since epoch.
pub fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_settings_merge_overwrites_set_fields_only() {
        let mut desired = DesiredSettings {
            model: Some("m1".to_string()),
            plan_mode: Some(true),
            ..Default::default()
        };

        desired.merge(DesiredSettings {
            model: Some("m2".to_string()),
            max_thinking_tokens: Some(4096),
            ..Default::default()
        });

        assert_eq!(desired.model.as_deref(), Some("m2"));
        assert_eq!(desired.plan_mode, Some(true));
        assert_eq!(desired.max_thinking_tokens, Some(4096));
        assert!(desired.permission_mode.is_none());
    }

    #[test]
    fn test_desired_settings_serialize_omits_unset_fields() {
        let desired = DesiredSettings {
            permission_mode: Some(PermissionMode::AcceptEdits),
            ..Default::default()
        };

        let value = serde_json::to_value(&desired).unwrap();

        assert_eq!(value, serde_json::json!({"permissionMode": "acceptEdits"}));
        assert!(DesiredSettings::default().is_empty());
        assert!(!desired.is_empty());
    }

    #[test]
    fn test_remote_error_displays_bare_message() {
        let err = ApiError::Remote {
            code: -32000,
            message: "session busy".to_string(),
            data: None,
        };

        assert_eq!(err.to_string(), "session busy");
    }

    #[test]
    fn test_update_kind_unknown_fallback() {
        let kind: SessionUpdateKind = serde_json::from_value(serde_json::json!("brand_new")).unwrap();
        assert_eq!(kind, SessionUpdateKind::Unknown);

        let kind: SessionUpdateKind = serde_json::from_value(serde_json::json!("tool_use")).unwrap();
        assert_eq!(kind, SessionUpdateKind::ToolUse);
    }
}
