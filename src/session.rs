//! Sessions: named logical connections to one OPC UA server each.

use crate::{
    config::SessionConfig,
    error::ClientError,
    item::Item,
    namespace::NamespaceTable,
    transport::{ResolvedAddress, ServerConnection},
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::{
    fmt::{self, Write as _},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Connection state of one session.
///
/// `connect()` fires only from Disconnected, `disconnect()` only from
/// Connected or Connecting; everything else is a no-op. A server-driven
/// failure forces any state back to Disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Closing => "Closing",
        }
    }
}

/// Sized cell for the live connection so the hot path can read it through
/// ArcSwap without locking.
pub(crate) struct LiveConnection {
    pub(crate) conn: Arc<dyn ServerConnection>,
}

/// An asynchronous item request routed through the owning session.
pub(crate) enum ItemRequest {
    Read(Arc<Item>),
    Write(Arc<Item>),
}

impl ItemRequest {
    fn item(&self) -> &Arc<Item> {
        match self {
            ItemRequest::Read(item) | ItemRequest::Write(item) => item,
        }
    }
}

const REQUEST_QUEUE_CAPACITY: usize = 256;

/// A named session. Name and configuration are immutable after creation;
/// the connection state is owned by the supervisor and published over a
/// watch channel.
pub struct Session {
    name: String,
    config: SessionConfig,
    debug: AtomicU32,
    namespaces: NamespaceTable,
    state_tx: watch::Sender<ConnectionState>,
    connection: ArcSwapOption<LiveConnection>,
    /// Serializes administrative connect/disconnect transitions.
    pub(crate) transition: tokio::sync::Mutex<()>,
    /// Cancellation token of the current supervisor cycle.
    pub(crate) supervisor_cancel: Mutex<CancellationToken>,
    /// True while a supervisor task owns this session's reconnect loop,
    /// including the backoff sleeps between attempts.
    supervisor_active: AtomicBool,
    /// Bumped on every supervisor spawn; a stale supervisor's teardown must
    /// not touch state owned by its successor.
    supervisor_gen: AtomicU64,
    request_tx: mpsc::Sender<ItemRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<ItemRequest>>>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    last_connected: Mutex<Option<DateTime<Utc>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("endpoint", &self.config.endpoint_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(name: String, config: SessionConfig, debug: u32) -> Self {
        let namespaces = NamespaceTable::new(&config.namespace_uris, config.namespace_table_len());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        Self {
            name,
            config,
            debug: AtomicU32::new(debug),
            namespaces,
            state_tx,
            connection: ArcSwapOption::from(None),
            transition: tokio::sync::Mutex::new(()),
            supervisor_cancel: Mutex::new(CancellationToken::new()),
            supervisor_active: AtomicBool::new(false),
            supervisor_gen: AtomicU64::new(0),
            request_tx,
            request_rx: Mutex::new(Some(request_rx)),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            last_connected: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    pub fn debug(&self) -> u32 {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, level: u32) {
        self.debug.store(level, Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver for state transitions; used by callers that need to wait for
    /// a connection to come up or go away.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state && self.debug() >= 1 {
            debug!(session = %self.name, from = previous.as_str(), to = state.as_str(), "state transition");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True while a supervisor that has not been cancelled owns this session.
    /// A cancelled one is on its way out and must not block a new spawn.
    pub(crate) fn supervisor_busy(&self) -> bool {
        self.supervisor_active.load(Ordering::Acquire)
            && self
                .supervisor_cancel
                .lock()
                .map(|guard| !guard.is_cancelled())
                .unwrap_or(false)
    }

    /// Mark a supervisor spawn. Returns the generation the supervisor must
    /// hand back to `end_supervisor`. Called under the transition lock.
    pub(crate) fn begin_supervisor(&self) -> u64 {
        self.supervisor_active.store(true, Ordering::Release);
        self.supervisor_gen.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Mark a supervisor exit. A stale generation means a successor has
    /// already taken over and the flag is left alone.
    pub(crate) fn end_supervisor(&self, generation: u64) {
        if self.supervisor_gen.load(Ordering::Acquire) == generation {
            self.supervisor_active.store(false, Ordering::Release);
        }
    }

    pub(crate) fn supervisor_generation(&self) -> u64 {
        self.supervisor_gen.load(Ordering::Acquire)
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn ServerConnection>> {
        self.connection.load_full().map(|c| Arc::clone(&c.conn))
    }

    /// Publish a freshly reconciled connection and enter Connected. The
    /// supervisor calls this only after reconciliation has completed, so no
    /// item request can resolve a namespace against a stale table.
    pub(crate) fn attach_connection(&self, conn: Arc<dyn ServerConnection>) {
        self.connection.store(Some(Arc::new(LiveConnection { conn })));
        if let Ok(mut guard) = self.last_connected.lock() {
            *guard = Some(Utc::now());
        }
        self.set_state(ConnectionState::Connected);
    }

    /// Drop the live connection and invalidate every resolved namespace
    /// index. Called on connection loss and administrative disconnect.
    pub(crate) fn detach_connection(&self) {
        self.connection.store(None);
        self.namespaces.invalidate();
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Enqueue one item request. Never blocks and never returns an error to
    /// the caller: a session that is not Connected fails the request fast,
    /// recording NotConnected on the item so it is counted, not lost.
    pub(crate) fn enqueue(&self, request: ItemRequest) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if self.state() != ConnectionState::Connected {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            request.item().record_failure(ClientError::NotConnected);
            return;
        }
        if let Err(e) = self.request_tx.try_send(request) {
            let request = match e {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            request
                .item()
                .record_failure(ClientError::Transport("request queue full".to_string()));
        }
    }

    /// Long-lived request pump, one per session. Requests accepted while
    /// Connected are resolved against the namespace table and dispatched;
    /// anything caught by a disconnect in between is marked failed rather
    /// than silently dropped.
    pub(crate) fn spawn_pump(session: Arc<Session>, cancel: CancellationToken) {
        let Some(mut rx) = session.request_rx.lock().ok().and_then(|mut g| g.take()) else {
            return;
        };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    maybe = rx.recv() => {
                        let Some(request) = maybe else { return; };
                        session.process(request).await;
                    }
                }
            }
        });
    }

    async fn process(&self, request: ItemRequest) {
        let item = Arc::clone(request.item());
        let Some(conn) = self.connection() else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            item.record_failure(ClientError::NotConnected);
            return;
        };
        let link = item.link();
        let address = match self.namespaces.resolve(link.namespace_index) {
            Ok(live) => ResolvedAddress {
                namespace_index: live,
                identifier: link.identifier.clone(),
            },
            Err(e) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                item.record_failure(e);
                return;
            }
        };
        let result = match &request {
            ItemRequest::Read(_) => conn.read(&address).await,
            ItemRequest::Write(_) => conn.write(&address).await,
        };
        match result {
            Ok(()) => item.clear_failure(),
            Err(e) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                if self.debug() >= 1 {
                    debug!(session = %self.name, identifier = %address.identifier, error = %e, "item request failed");
                }
                item.record_failure(e);
            }
        }
    }

    /// One summary line for `show` at verbosity 0.
    pub fn summary(&self) -> String {
        let (resolved, configured) = self.namespaces.summary();
        let connected = self
            .last_connected
            .lock()
            .ok()
            .and_then(|g| *g)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let mut out = String::new();
        let _ = write!(
            out,
            "session '{}' state={} endpoint={} debug={} requests={} failed={} namespaces={}/{} last-connected={}",
            self.name,
            self.state().as_str(),
            self.config.endpoint_url,
            self.debug(),
            self.total_requests(),
            self.failed_requests(),
            resolved,
            configured,
            connected,
        );
        out
    }
}
