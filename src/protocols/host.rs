//! Capability traits: protocol → host callback boundary.
//!
//! The agent asks the host to do things (read a file, run a command, look up
//! a symbol, consult permission rules). Each capability area is one trait;
//! the host supplies implementations and `capabilities::register_*` installs
//! them as inbound handlers.
//!
//! Key design principle: The protocol layer does NOT know how a capability
//! is provided. It only parses params and shapes results.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::types::{
    ApiError, CreateTerminalRequest, NewPermissionRule, PermissionRule, PermissionRulePatch,
    ReadTextFileRequest, RuleId, SymbolQuery, TerminalExitStatus, TerminalId, TerminalOutput,
    WriteTextFileRequest,
};

/// Workspace file access (`fs/*`).
#[async_trait]
pub trait FileSystemProvider: Send + Sync {
    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<String, ApiError>;

    async fn write_text_file(&self, request: WriteTextFileRequest) -> Result<(), ApiError>;
}

/// Command execution (`terminal/*`).
#[async_trait]
pub trait TerminalProvider: Send + Sync {
    /// Start a command and return its terminal id immediately.
    async fn create(&self, request: CreateTerminalRequest) -> Result<TerminalId, ApiError>;

    /// Snapshot of output captured so far.
    async fn output(&self, terminal_id: &str) -> Result<TerminalOutput, ApiError>;

    /// Wait until the command exits.
    async fn wait_for_exit(&self, terminal_id: &str) -> Result<TerminalExitStatus, ApiError>;

    /// Kill the command but keep its output available.
    async fn kill(&self, terminal_id: &str) -> Result<(), ApiError>;

    /// Kill if still running and forget the terminal.
    async fn release(&self, terminal_id: &str) -> Result<(), ApiError>;
}

/// Code intelligence (`lsp/*`).
///
/// Results are passed through to the agent as-is, so implementations can
/// return whatever their language server produced.
#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn definition(&self, query: SymbolQuery) -> Result<Value, ApiError>;

    async fn references(&self, query: SymbolQuery) -> Result<Value, ApiError>;

    async fn hover(&self, query: SymbolQuery) -> Result<Value, ApiError>;

    async fn diagnostics(&self, path: &str) -> Result<Value, ApiError>;
}

/// Stored permission rules (`permission_rules/*`).
#[async_trait]
pub trait PermissionRuleStore: Send + Sync {
    async fn list(&self) -> Result<Vec<PermissionRule>, ApiError>;

    async fn add(&self, rule: NewPermissionRule) -> Result<PermissionRule, ApiError>;

    async fn update(
        &self,
        rule_id: &str,
        patch: PermissionRulePatch,
    ) -> Result<PermissionRule, ApiError>;

    async fn delete(&self, rule_id: &str) -> Result<RuleId, ApiError>;
}
