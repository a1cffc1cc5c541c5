//! In-process stand-in for the underlying OPC UA stack, used by tests.

use crate::{
    error::{ClientError, ClientResult},
    transport::{LinkEvent, ResolvedAddress, ServerConnection, ServerLink},
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc;

pub(crate) struct MockConnection {
    namespaces: Vec<String>,
    pub reads: Mutex<Vec<ResolvedAddress>>,
    pub writes: Mutex<Vec<ResolvedAddress>>,
    next_subscription: AtomicU32,
    /// `(publishing interval, priority)` per created subscription.
    pub subscriptions: Mutex<Vec<(u64, u8)>>,
    next_item: AtomicU32,
    pub monitored: Mutex<Vec<(u32, ResolvedAddress)>>,
    pub closed: AtomicBool,
}

impl MockConnection {
    fn new(namespaces: Vec<String>) -> Self {
        Self {
            namespaces,
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            next_subscription: AtomicU32::new(1),
            subscriptions: Mutex::new(Vec::new()),
            next_item: AtomicU32::new(1),
            monitored: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ServerConnection for MockConnection {
    async fn namespace_array(&self) -> ClientResult<Vec<String>> {
        Ok(self.namespaces.clone())
    }

    async fn read(&self, address: &ResolvedAddress) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(address.clone());
        }
        Ok(())
    }

    async fn write(&self, address: &ResolvedAddress) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(address.clone());
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        publishing_interval_ms: u64,
        priority: u8,
    ) -> ClientResult<(u32, u64)> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.push((publishing_interval_ms, priority));
        }
        Ok((id, publishing_interval_ms))
    }

    async fn add_monitored_items(
        &self,
        _subscription_id: u32,
        addresses: &[ResolvedAddress],
    ) -> ClientResult<Vec<ClientResult<u32>>> {
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            let id = self.next_item.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut monitored) = self.monitored.lock() {
                monitored.push((id, address.clone()));
            }
            results.push(Ok(id));
        }
        Ok(results)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Mock server link. Tests control the advertised namespace array, inject
/// connect failures, and force connection loss.
pub(crate) struct MockLink {
    namespaces: Mutex<Vec<String>>,
    fail_connects: AtomicU32,
    connect_count: AtomicU32,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    event_senders: Mutex<Vec<mpsc::Sender<LinkEvent>>>,
}

impl MockLink {
    pub fn new(namespaces: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            namespaces: Mutex::new(namespaces.iter().map(|s| s.to_string()).collect()),
            fail_connects: AtomicU32::new(0),
            connect_count: AtomicU32::new(0),
            connections: Mutex::new(Vec::new()),
            event_senders: Mutex::new(Vec::new()),
        })
    }

    /// Replace the namespace array advertised by subsequent connects.
    pub fn set_namespaces(&self, namespaces: &[&str]) {
        if let Ok(mut guard) = self.namespaces.lock() {
            *guard = namespaces.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_connects.store(count, Ordering::Release);
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Acquire)
    }

    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections.lock().ok()?.last().map(Arc::clone)
    }

    /// Push a ConnectionLost event to the most recent connection.
    pub async fn drop_connection(&self, reason: &str) {
        let sender = self
            .event_senders
            .lock()
            .ok()
            .and_then(|senders| senders.last().cloned());
        if let Some(sender) = sender {
            let _ = sender
                .send(LinkEvent::ConnectionLost(reason.to_string()))
                .await;
        }
    }
}

#[async_trait]
impl ServerLink for MockLink {
    async fn connect(
        &self,
        _endpoint_url: &str,
    ) -> ClientResult<(Arc<dyn ServerConnection>, mpsc::Receiver<LinkEvent>)> {
        if self.fail_connects.load(Ordering::Acquire) > 0 {
            self.fail_connects.fetch_sub(1, Ordering::AcqRel);
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        self.connect_count.fetch_add(1, Ordering::AcqRel);
        let namespaces = self
            .namespaces
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default();
        let conn = Arc::new(MockConnection::new(namespaces));
        let (tx, rx) = mpsc::channel(8);
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(Arc::clone(&conn));
        }
        if let Ok(mut senders) = self.event_senders.lock() {
            senders.push(tx);
        }
        Ok((conn as Arc<dyn ServerConnection>, rx))
    }
}
