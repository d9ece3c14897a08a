//! Bidirectional JSON-RPC bridge between a host application and an ACP
//! coding agent.
//!
//! The host drives sessions and prompts through [`AgentBridge`]; the agent
//! calls back into host capabilities (files, terminals, language services,
//! permission rules) and streams session updates.

pub mod api;
pub mod config;
pub mod protocols;
pub mod runtime;

pub use api::types::ApiError;
pub use config::{AgentCommand, BridgeConfig};
pub use runtime::bridge::AgentBridge;
pub use runtime::fs::FsManager;
pub use runtime::permissions::PermissionRuleBook;
pub use runtime::terminal::TerminalManager;
