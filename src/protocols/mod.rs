//! Protocol layer - abstractions and implementations for agent communication.
//!
//! This module provides:
//! - `AgentConnection` trait: runtime → protocol abstraction boundary
//! - Capability traits (`host`): protocol → host callback boundary
//! - `acp`: ACP protocol implementation (JSON-RPC over a duplex stream)
//!
//! Key design principle: The protocol layer does NOT hold session state.
//! The current session and desired settings live in the runtime layer.

pub mod acp;
pub mod agent_connection;
pub mod host;

pub use agent_connection::AgentConnection;
pub use host::{FileSystemProvider, LanguageService, PermissionRuleStore, TerminalProvider};
