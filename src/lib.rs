//! Client-side OPC UA session/subscription lifecycle runtime for
//! process-control nodes.
//!
//! The runtime owns named sessions to OPC UA servers, named subscriptions of
//! monitored data, and the per-session namespace table that remaps configured
//! namespace indices to the live indices the wire protocol uses. It
//! reconciles three independent lifecycles (process startup/shutdown,
//! administrative commands issued at arbitrary times, and server-driven
//! reconnection) while preserving name-based addressability and without
//! losing or duplicating item requests.
//!
//! Wire transport and encoding are out of scope; an implementation of
//! [`transport::ServerLink`] adapts whatever client stack the process links
//! against.

pub mod commands;
pub mod config;
pub mod error;
pub mod item;
pub mod namespace;
pub mod registry;
pub mod session;
pub mod subscription;
pub mod transport;

mod supervisor;

#[cfg(test)]
pub(crate) mod mock;

pub use commands::{AdminCommand, CommandDispatcher};
pub use config::{ReconnectPolicy, SessionConfig, DEFAULT_PUBLISHING_INTERVAL_MS};
pub use error::{ClientError, ClientResult};
pub use item::{Item, ItemKind, LinkConfig, RecordBinding};
pub use namespace::{NamespaceTable, ReconcileReport};
pub use registry::{Runtime, SubscriptionParams};
pub use session::{ConnectionState, Session};
pub use subscription::Subscription;
pub use transport::{LinkEvent, ResolvedAddress, ServerConnection, ServerLink};
