//! ACP protocol implementation.
//!
//! This module implements the Agent Client Protocol bridge: newline-delimited
//! JSON-RPC 2.0 over a duplex stream (usually the agent's stdio), with
//! request correlation, inbound dispatch and notification routing.

mod agent;
pub mod capabilities;
pub mod correlator;
pub mod dispatcher;
pub mod framing;
pub mod message;
pub mod methods;
pub mod params;
pub mod router;
pub mod update_mapping;

pub use agent::AcpAgent;
pub use correlator::{PendingResponse, RequestCorrelator};
pub use dispatcher::{handler_fn, InboundDispatcher, RequestHandler};
pub use message::{Message, Notification, Request, RequestId, Response, RpcError};
pub use router::{NotificationRouter, Subscription, SubscriptionId};
