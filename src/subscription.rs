//! Named groups of monitored items sharing negotiated publishing parameters.

use crate::{
    error::ClientResult,
    item::Item,
    session::Session,
    transport::{ResolvedAddress, ServerConnection},
};
use std::{
    fmt::{self, Write as _},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};
use tracing::{info, warn};

/// A named subscription bound to exactly one session.
///
/// Identity and session binding are immutable after creation. The
/// subscription is inert while its session is disconnected; the supervisor
/// re-arms it on every Connected transition, after namespace reconciliation.
pub struct Subscription {
    name: String,
    session: Arc<Session>,
    /// Requested publishing interval, already defaulted from the 0 sentinel.
    publishing_interval_ms: u64,
    priority: u8,
    debug: AtomicU32,
    /// Server-side id while armed; cleared on every disconnect.
    server_id: Mutex<Option<u32>>,
    /// Interval the server actually granted, 0 while disarmed.
    revised_interval_ms: AtomicU64,
    items: Mutex<Vec<Weak<Item>>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("session", &self.session.name())
            .field("interval_ms", &self.publishing_interval_ms)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(
        name: String,
        session: Arc<Session>,
        publishing_interval_ms: u64,
        priority: u8,
        debug: u32,
    ) -> Self {
        Self {
            name,
            session,
            publishing_interval_ms,
            priority,
            debug: AtomicU32::new(debug),
            server_id: Mutex::new(None),
            revised_interval_ms: AtomicU64::new(0),
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn publishing_interval_ms(&self) -> u64 {
        self.publishing_interval_ms
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn debug(&self) -> u32 {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, level: u32) {
        self.debug.store(level, Ordering::Relaxed);
    }

    pub fn server_id(&self) -> Option<u32> {
        self.server_id.lock().ok().and_then(|g| *g)
    }

    pub(crate) fn attach_item(&self, item: &Arc<Item>) {
        if let Ok(mut items) = self.items.lock() {
            items.push(Arc::downgrade(item));
        }
    }

    fn live_items(&self) -> Vec<Arc<Item>> {
        match self.items.lock() {
            Ok(mut items) => {
                items.retain(|w| w.strong_count() > 0);
                items.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Create the server-side subscription and register all monitored items.
    ///
    /// Called by the supervisor after reconciliation. Items whose namespace
    /// did not resolve record the failure and are skipped; per-item
    /// registration failures do not abort the rest.
    pub(crate) async fn arm(&self, conn: &Arc<dyn ServerConnection>) -> ClientResult<()> {
        let (sid, revised) = conn
            .create_subscription(self.publishing_interval_ms, self.priority)
            .await?;
        if let Ok(mut guard) = self.server_id.lock() {
            *guard = Some(sid);
        }
        self.revised_interval_ms.store(revised, Ordering::Release);
        info!(
            subscription = %self.name,
            session = %self.session.name(),
            server_id = sid,
            requested_ms = self.publishing_interval_ms,
            revised_ms = revised,
            "subscription armed"
        );

        let mut pending: Vec<(Arc<Item>, ResolvedAddress)> = Vec::new();
        for item in self.live_items() {
            let link = item.link();
            match self.session.namespaces().resolve(link.namespace_index) {
                Ok(live) => {
                    let address = ResolvedAddress {
                        namespace_index: live,
                        identifier: link.identifier.clone(),
                    };
                    pending.push((item, address));
                }
                Err(e) => {
                    warn!(
                        subscription = %self.name,
                        identifier = %link.identifier,
                        error = %e,
                        "monitored item skipped: namespace unresolved"
                    );
                    item.record_failure(e);
                }
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let addresses: Vec<ResolvedAddress> = pending.iter().map(|(_, a)| a.clone()).collect();
        let results = conn.add_monitored_items(sid, &addresses).await?;
        for ((item, address), result) in pending.iter().zip(results.into_iter()) {
            match result {
                Ok(id) => {
                    item.set_monitored_id(Some(id));
                    item.clear_failure();
                }
                Err(e) => {
                    warn!(
                        subscription = %self.name,
                        identifier = %address.identifier,
                        error = %e,
                        "monitored item creation failed"
                    );
                    item.record_failure(e);
                }
            }
        }
        Ok(())
    }

    /// Register one late-attached item on an already-armed subscription.
    ///
    /// No-op while the subscription is inert; the next arm picks the item up.
    pub(crate) async fn arm_item(
        &self,
        conn: &Arc<dyn ServerConnection>,
        item: &Arc<Item>,
    ) -> ClientResult<()> {
        let Some(sid) = self.server_id() else {
            return Ok(());
        };
        let link = item.link();
        let live = match self.session.namespaces().resolve(link.namespace_index) {
            Ok(live) => live,
            Err(e) => {
                item.record_failure(e.clone());
                return Err(e);
            }
        };
        let address = ResolvedAddress {
            namespace_index: live,
            identifier: link.identifier.clone(),
        };
        let results = conn
            .add_monitored_items(sid, std::slice::from_ref(&address))
            .await?;
        match results.into_iter().next() {
            Some(Ok(id)) => {
                item.set_monitored_id(Some(id));
                item.clear_failure();
            }
            Some(Err(e)) => {
                warn!(
                    subscription = %self.name,
                    identifier = %address.identifier,
                    error = %e,
                    "monitored item creation failed"
                );
                item.record_failure(e);
            }
            None => {}
        }
        Ok(())
    }

    /// Forget all server-side state. Called on every disconnect.
    pub(crate) fn disarm(&self) {
        if let Ok(mut guard) = self.server_id.lock() {
            *guard = None;
        }
        self.revised_interval_ms.store(0, Ordering::Release);
        for item in self.live_items() {
            item.set_monitored_id(None);
        }
    }

    /// Diagnostic dump. Level 0 = one summary line; >= 1 adds the monitored
    /// items.
    pub fn show(&self, level: u32) -> String {
        let mut out = String::new();
        let armed = match self.server_id() {
            Some(id) => format!("armed(id={id})"),
            None => "inert".to_string(),
        };
        let _ = writeln!(
            out,
            "subscription '{}' session={} interval={}ms revised={}ms priority={} debug={} {} items={}",
            self.name,
            self.session.name(),
            self.publishing_interval_ms,
            self.revised_interval_ms.load(Ordering::Acquire),
            self.priority,
            self.debug(),
            armed,
            self.live_items().len(),
        );
        if level >= 1 {
            for item in self.live_items() {
                out.push_str("  ");
                out.push_str(item.show(0).trim_end());
                out.push('\n');
            }
        }
        out
    }
}
