//! Runtime modules for session management and built-in capability providers.
//!
//! The runtime domain handles host-level concepts: the current session,
//! desired settings, and the workspace the agent is allowed to touch.

pub mod bridge;
pub mod fs;
#[cfg(test)]
pub(crate) mod mock_connection;
pub mod path;
pub mod permissions;
pub mod sessions;
pub mod settings;
pub mod terminal;
