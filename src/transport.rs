//! Trait seam over the underlying OPC UA stack.
//!
//! The runtime never touches wire encoding directly; an implementation of
//! [`ServerLink`] wraps whatever client stack the process links against and
//! surfaces connection lifecycle events through a channel of [`LinkEvent`]s.

use crate::error::ClientResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Address of one server-side node with its namespace already resolved to the
/// live runtime index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    pub namespace_index: u16,
    pub identifier: String,
}

/// Events emitted by the stack for one established connection.
///
/// The stream ends after `ConnectionLost`; the supervisor then owns the
/// reconnect decision.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Keep-alive succeeded.
    KeepAlive,
    /// Keep-alive failed with a stack-level reason; the connection may still
    /// recover.
    KeepAliveFailed(String),
    /// Connection lost for good.
    ConnectionLost(String),
}

/// One live, activated connection to a server.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// The server's live namespace array; position = runtime index.
    async fn namespace_array(&self) -> ClientResult<Vec<String>>;

    /// Execute one read; the stack delivers the value to the binding layer.
    async fn read(&self, address: &ResolvedAddress) -> ClientResult<()>;

    /// Execute one write of the staged value owned by the binding layer.
    async fn write(&self, address: &ResolvedAddress) -> ClientResult<()>;

    /// Create a server-side subscription. Returns the subscription id and the
    /// revised publishing interval in milliseconds.
    async fn create_subscription(
        &self,
        publishing_interval_ms: u64,
        priority: u8,
    ) -> ClientResult<(u32, u64)>;

    /// Register monitored items on an existing subscription. Returns one
    /// result per address, in order; per-item failures do not fail the batch.
    async fn add_monitored_items(
        &self,
        subscription_id: u32,
        addresses: &[ResolvedAddress],
    ) -> ClientResult<Vec<ClientResult<u32>>>;

    /// Close the connection. Best effort; must not block indefinitely.
    async fn close(&self);
}

/// Factory seam: one connect attempt against a configured endpoint.
#[async_trait]
pub trait ServerLink: Send + Sync + 'static {
    async fn connect(
        &self,
        endpoint_url: &str,
    ) -> ClientResult<(Arc<dyn ServerConnection>, mpsc::Receiver<LinkEvent>)>;
}
