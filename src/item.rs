//! Addressable data points consumed by the external binding layer.

use crate::{
    error::ClientError,
    session::{ItemRequest, Session},
    subscription::Subscription,
};
use std::{
    fmt::Write as _,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

/// Static link configuration of one item, owned by the host configuration
/// layer and outliving every Item built from it.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Owning session name; for monitored items this must match the
    /// subscription's session.
    pub session: String,
    /// Subscription name for monitored items; None = polled.
    pub subscription: Option<String>,
    /// Configured namespace index, resolved through the session's table.
    pub namespace_index: u16,
    /// Node identifier within the namespace.
    pub identifier: String,
    /// Names of the typed sub-elements the binding layer carves out of the
    /// value, enumerated by `show` at verbosity >= 1.
    pub elements: Vec<String>,
}

/// External record/variable binding attached to an item. The item never owns
/// or deletes the binding; it only reports through it.
pub trait RecordBinding: Send + Sync {
    fn record_name(&self) -> &str;
}

/// Capability tag fixed at construction time.
pub enum ItemKind {
    /// Read/written on demand through the session.
    Polled,
    /// Additionally receives change notifications through a subscription.
    Monitored { subscription: Arc<Subscription> },
}

/// One addressable unit of data.
///
/// Requests are enqueue-and-return: they never block the caller and never
/// fail loudly; failures are recorded here and surfaced to the binding layer.
pub struct Item {
    link: Arc<LinkConfig>,
    session: Arc<Session>,
    kind: ItemKind,
    binding: Option<Arc<dyn RecordBinding>>,
    /// Server-side monitored item id while registered, 0 otherwise.
    monitored_id: AtomicU64,
    failure_count: AtomicU64,
    last_failure: Mutex<Option<ClientError>>,
}

impl Item {
    pub(crate) fn new(
        link: Arc<LinkConfig>,
        session: Arc<Session>,
        kind: ItemKind,
        binding: Option<Arc<dyn RecordBinding>>,
    ) -> Self {
        Self {
            link,
            session,
            kind,
            binding,
            monitored_id: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<LinkConfig> {
        &self.link
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn binding(&self) -> Option<&Arc<dyn RecordBinding>> {
        self.binding.as_ref()
    }

    /// True iff the item was constructed for change notifications.
    pub fn is_monitored(&self) -> bool {
        matches!(self.kind, ItemKind::Monitored { .. })
    }

    pub fn subscription(&self) -> Option<&Arc<Subscription>> {
        match &self.kind {
            ItemKind::Monitored { subscription } => Some(subscription),
            ItemKind::Polled => None,
        }
    }

    /// Enqueue an asynchronous read. Never blocks; a NotConnected session
    /// records the failure instead of erroring at the call site.
    pub fn request_read(self: &Arc<Self>) {
        self.session.enqueue(ItemRequest::Read(Arc::clone(self)));
    }

    /// Enqueue an asynchronous write of the value staged by the binding
    /// layer. Same non-blocking contract as `request_read`.
    pub fn request_write(self: &Arc<Self>) {
        self.session.enqueue(ItemRequest::Write(Arc::clone(self)));
    }

    pub(crate) fn record_failure(&self, err: ClientError) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_failure.lock() {
            *guard = Some(err);
        }
    }

    pub(crate) fn clear_failure(&self) {
        if let Ok(mut guard) = self.last_failure.lock() {
            *guard = None;
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn last_failure(&self) -> Option<ClientError> {
        self.last_failure.lock().ok().and_then(|g| g.clone())
    }

    pub(crate) fn set_monitored_id(&self, id: Option<u32>) {
        self.monitored_id
            .store(id.map(|v| v as u64 + 1).unwrap_or(0), Ordering::Release);
    }

    pub(crate) fn monitored_id(&self) -> Option<u32> {
        match self.monitored_id.load(Ordering::Acquire) {
            0 => None,
            v => Some((v - 1) as u32),
        }
    }

    /// Diagnostic dump. Level 0 = one summary line; >= 1 adds one line per
    /// configured data sub-element.
    pub fn show(&self, level: u32) -> String {
        let mut out = String::new();
        let record = self
            .binding
            .as_ref()
            .map(|b| b.record_name())
            .unwrap_or("-");
        let target = match &self.kind {
            ItemKind::Monitored { subscription } => {
                format!("subscription={}", subscription.name())
            }
            ItemKind::Polled => format!("session={}", self.session.name()),
        };
        let failure = self
            .last_failure()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(
            out,
            "item ns={};{} {} record={} monitored={} failures={} last-failure={}",
            self.link.namespace_index,
            self.link.identifier,
            target,
            record,
            if self.is_monitored() { "y" } else { "n" },
            self.failure_count(),
            failure,
        );
        if level >= 1 {
            for element in &self.link.elements {
                let _ = writeln!(out, "  element {element}");
            }
        }
        out
    }
}
