//! API types for the host-facing bridge surface.
//!
//! This module defines stable value types for host callers and subscribers,
//! isolating protocol details from the application.

pub mod types;
