//! Process-wide runtime object owning the session, subscription, and item
//! registries.
//!
//! Lookups are lock-free reads; creation is insert-if-absent through the map
//! entry API, so a duplicate name is never observably registered even under
//! concurrent creation and a failed creation leaves no partial entry.

use crate::{
    config::{SessionConfig, DEFAULT_PUBLISHING_INTERVAL_MS},
    error::{ClientError, ClientResult},
    item::{Item, ItemKind, LinkConfig, RecordBinding},
    session::{ConnectionState, Session},
    subscription::Subscription,
    supervisor::SessionSupervisor,
    transport::{ServerConnection, ServerLink},
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use std::{fmt::Write as _, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

/// Validated creation parameters for a subscription. Numeric-field
/// degradation (out-of-range priority or debug level) happens at the command
/// boundary; by this point the values are well-typed.
#[derive(Debug, Clone)]
pub struct SubscriptionParams {
    pub name: String,
    pub session: String,
    /// Requested publishing interval; 0 requests the process-wide default.
    pub publishing_interval_ms: u64,
    pub priority: u8,
    pub debug: u32,
}

/// The client runtime: registries plus the transport seam.
///
/// One instance per process-control node; sessions and subscriptions are
/// created through it and destroyed only by `shutdown`.
pub struct Runtime {
    link: Arc<dyn ServerLink>,
    sessions: DashMap<String, Arc<Session>>,
    subscriptions: DashMap<String, Arc<Subscription>>,
    items: DashMap<String, Arc<Item>>,
    default_publishing_interval_ms: u64,
    shutdown: CancellationToken,
}

fn validate_name(kind: &str, name: &str) -> ClientResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ClientError::InvalidName(format!("{kind} '{name}'")));
    }
    Ok(())
}

impl Runtime {
    pub fn new(link: Arc<dyn ServerLink>) -> Arc<Self> {
        Self::with_default_interval(link, DEFAULT_PUBLISHING_INTERVAL_MS)
    }

    pub fn with_default_interval(
        link: Arc<dyn ServerLink>,
        default_publishing_interval_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            link,
            sessions: DashMap::new(),
            subscriptions: DashMap::new(),
            items: DashMap::new(),
            default_publishing_interval_ms: default_publishing_interval_ms.max(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub(crate) fn link(&self) -> Arc<dyn ServerLink> {
        Arc::clone(&self.link)
    }

    pub fn default_publishing_interval_ms(&self) -> u64 {
        self.default_publishing_interval_ms
    }

    // ---- sessions ----------------------------------------------------------

    pub fn create_session(
        self: &Arc<Self>,
        name: &str,
        config: SessionConfig,
        debug: u32,
    ) -> ClientResult<Arc<Session>> {
        validate_name("session name", name)?;
        Url::parse(&config.endpoint_url)
            .map_err(|e| ClientError::InvalidArgument(format!("endpoint URL: {e}")))?;
        match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ClientError::DuplicateName(name.to_string())),
            Entry::Vacant(vacant) => {
                let session = Arc::new(Session::new(name.to_string(), config, debug));
                vacant.insert(Arc::clone(&session));
                Session::spawn_pump(Arc::clone(&session), self.shutdown.child_token());
                info!(session = name, "session created");
                Ok(session)
            }
        }
    }

    pub fn find_session(&self, name: &str) -> ClientResult<Arc<Session>> {
        self.sessions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClientError::NotFound(format!("session '{name}'")))
    }

    pub fn session_exists(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Request a connect. Idempotent: a session that is already Connecting or
    /// Connected (or still Closing) is left alone, and so is one whose
    /// supervisor is sleeping out a reconnect backoff with the state reading
    /// Disconnected.
    #[instrument(level = "info", skip(self))]
    pub async fn connect(self: &Arc<Self>, name: &str) -> ClientResult<()> {
        let session = self.find_session(name)?;
        let _transition = session.transition.lock().await;
        if session.state() != ConnectionState::Disconnected || session.supervisor_busy() {
            return Ok(());
        }
        let cancel = self.shutdown.child_token();
        if let Ok(mut guard) = session.supervisor_cancel.lock() {
            *guard = cancel.clone();
        }
        session.set_state(ConnectionState::Connecting);
        let generation = session.begin_supervisor();
        let supervisor =
            SessionSupervisor::new(Arc::clone(&session), Arc::clone(self), cancel, generation);
        tokio::spawn(supervisor.run());
        Ok(())
    }

    /// Request a disconnect. Idempotent: disconnecting a Disconnected session
    /// is a no-op apart from cancelling any supervisor still sleeping out a
    /// reconnect backoff. Closes the connection and invalidates all resolved
    /// namespace indices.
    #[instrument(level = "info", skip(self))]
    pub async fn disconnect(self: &Arc<Self>, name: &str) -> ClientResult<()> {
        let session = self.find_session(name)?;
        let _transition = session.transition.lock().await;
        // Cancelling an already-cancelled or never-used token is harmless,
        // so the supervisor is cancelled in every state.
        if let Ok(guard) = session.supervisor_cancel.lock() {
            guard.cancel();
        }
        match session.state() {
            ConnectionState::Disconnected | ConnectionState::Closing => Ok(()),
            ConnectionState::Connected | ConnectionState::Connecting => {
                session.set_state(ConnectionState::Closing);
                if let Some(conn) = session.connection() {
                    let _ = tokio::time::timeout(Duration::from_secs(2), conn.close()).await;
                }
                session.detach_connection();
                self.disarm_session_subscriptions(&session);
                Ok(())
            }
        }
    }

    /// Set the debug level of one session, or of all sessions when `name` is
    /// empty.
    pub fn set_session_debug(&self, name: &str, level: u32) -> ClientResult<()> {
        if name.is_empty() {
            for entry in self.sessions.iter() {
                entry.value().set_debug(level);
            }
            return Ok(());
        }
        self.find_session(name)?.set_debug(level);
        Ok(())
    }

    // ---- subscriptions -----------------------------------------------------

    pub fn create_subscription(
        self: &Arc<Self>,
        params: SubscriptionParams,
    ) -> ClientResult<Arc<Subscription>> {
        validate_name("subscription name", &params.name)?;
        validate_name("session name", &params.session)?;
        let session = self.find_session(&params.session)?;
        let interval = if params.publishing_interval_ms == 0 {
            self.default_publishing_interval_ms
        } else {
            params.publishing_interval_ms
        };
        match self.subscriptions.entry(params.name.clone()) {
            Entry::Occupied(_) => Err(ClientError::DuplicateName(params.name)),
            Entry::Vacant(vacant) => {
                let subscription = Arc::new(Subscription::new(
                    params.name.clone(),
                    Arc::clone(&session),
                    interval,
                    params.priority,
                    params.debug,
                ));
                vacant.insert(Arc::clone(&subscription));
                info!(
                    subscription = %params.name,
                    session = %params.session,
                    interval_ms = interval,
                    priority = params.priority,
                    "subscription created"
                );
                // A subscription created against a live session is armed
                // immediately; otherwise it stays inert until the next
                // Connected transition.
                if let Some(conn) = session.connection() {
                    let sub = Arc::clone(&subscription);
                    tokio::spawn(async move {
                        if let Err(e) = sub.arm(&conn).await {
                            warn!(subscription = %sub.name(), error = %e, "failed to arm subscription");
                        }
                    });
                }
                Ok(subscription)
            }
        }
    }

    pub fn find_subscription(&self, name: &str) -> ClientResult<Arc<Subscription>> {
        self.subscriptions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClientError::NotFound(format!("subscription '{name}'")))
    }

    pub fn subscription_exists(&self, name: &str) -> bool {
        self.subscriptions.contains_key(name)
    }

    fn session_subscriptions(&self, session: &Arc<Session>) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .filter(|entry| Arc::ptr_eq(entry.value().session(), session))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) async fn rearm_session_subscriptions(
        &self,
        session: &Arc<Session>,
        conn: &Arc<dyn ServerConnection>,
    ) {
        for subscription in self.session_subscriptions(session) {
            if let Err(e) = subscription.arm(conn).await {
                warn!(
                    subscription = %subscription.name(),
                    session = %session.name(),
                    error = %e,
                    "failed to arm subscription"
                );
            }
        }
    }

    pub(crate) fn disarm_session_subscriptions(&self, session: &Arc<Session>) {
        for subscription in self.session_subscriptions(session) {
            subscription.disarm();
        }
    }

    // ---- items -------------------------------------------------------------

    /// Register one item under the record/point name the binding layer uses
    /// to address it. Monitored items attach to their subscription and are
    /// picked up at the next (re-)arm.
    pub fn register_item(
        &self,
        record_name: &str,
        link: LinkConfig,
        binding: Option<Arc<dyn RecordBinding>>,
    ) -> ClientResult<Arc<Item>> {
        validate_name("record name", record_name)?;
        let link = Arc::new(link);
        let (session, kind) = match link.subscription.as_deref() {
            Some(sub_name) => {
                let subscription = self.find_subscription(sub_name)?;
                if !link.session.is_empty() && link.session != subscription.session().name() {
                    return Err(ClientError::InvalidArgument(format!(
                        "item session '{}' does not match subscription session '{}'",
                        link.session,
                        subscription.session().name()
                    )));
                }
                (
                    Arc::clone(subscription.session()),
                    ItemKind::Monitored { subscription },
                )
            }
            None => (self.find_session(&link.session)?, ItemKind::Polled),
        };
        match self.items.entry(record_name.to_string()) {
            Entry::Occupied(_) => Err(ClientError::DuplicateName(record_name.to_string())),
            Entry::Vacant(vacant) => {
                let item = Arc::new(Item::new(link, session, kind, binding));
                vacant.insert(Arc::clone(&item));
                if let Some(subscription) = item.subscription() {
                    subscription.attach_item(&item);
                    // Late registration against a live session arms the item
                    // right away instead of waiting for the next reconnect.
                    if let Some(conn) = item.session().connection() {
                        let subscription = Arc::clone(subscription);
                        let armed = Arc::clone(&item);
                        tokio::spawn(async move {
                            if let Err(e) = subscription.arm_item(&conn, &armed).await {
                                warn!(
                                    subscription = %subscription.name(),
                                    error = %e,
                                    "failed to arm monitored item"
                                );
                            }
                        });
                    }
                }
                Ok(item)
            }
        }
    }

    pub fn find_item(&self, record_name: &str) -> ClientResult<Arc<Item>> {
        self.items
            .get(record_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClientError::NotFound(format!("record '{record_name}'")))
    }

    // ---- namespace overrides ----------------------------------------------

    /// Administrative namespace override. Returns true when the override was
    /// applied to a live connection (reconciliation re-run), false when it is
    /// stored for the next connect.
    pub async fn set_namespace_uri(
        &self,
        session_name: &str,
        uri: &str,
        index: u16,
    ) -> ClientResult<bool> {
        let session = self.find_session(session_name)?;
        session.namespaces().set_uri(index, uri)?;
        if session.is_connected() {
            if let Some(conn) = session.connection() {
                let uris = conn.namespace_array().await?;
                let report = session.namespaces().reconcile(&uris);
                info!(
                    session = session_name,
                    index,
                    uri,
                    resolved = report.resolved.len(),
                    "namespace override applied to live session"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- diagnostics -------------------------------------------------------

    fn session_items(&self, session: &Arc<Session>) -> Vec<Arc<Item>> {
        self.items
            .iter()
            .filter(|entry| Arc::ptr_eq(entry.value().session(), session))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn show_one_session(&self, session: &Arc<Session>, verbosity: u32, out: &mut String) {
        out.push_str(&session.summary());
        out.push('\n');
        if verbosity >= 1 {
            for line in session.namespaces().dump() {
                let _ = writeln!(out, "  {line}");
            }
            for subscription in self.session_subscriptions(session) {
                out.push_str("  ");
                out.push_str(subscription.show(0).trim_end());
                out.push('\n');
            }
            for item in self.session_items(session) {
                out.push_str("  ");
                out.push_str(item.show(0).trim_end());
                out.push('\n');
            }
        }
    }

    /// Diagnostic dump of one session, or of all sessions when `name` is
    /// empty.
    pub fn show_sessions(&self, name: &str, verbosity: u32) -> ClientResult<String> {
        let mut out = String::new();
        if name.is_empty() {
            let mut sessions: Vec<Arc<Session>> = self
                .sessions
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            sessions.sort_by(|a, b| a.name().cmp(b.name()));
            for session in sessions {
                self.show_one_session(&session, verbosity, &mut out);
            }
        } else {
            let session = self.find_session(name)?;
            self.show_one_session(&session, verbosity, &mut out);
        }
        Ok(out)
    }

    /// Diagnostic dump of one subscription, or of all when `name` is empty.
    pub fn show_subscriptions(&self, name: &str, verbosity: u32) -> ClientResult<String> {
        if name.is_empty() {
            let mut subscriptions: Vec<Arc<Subscription>> = self
                .subscriptions
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            subscriptions.sort_by(|a, b| a.name().cmp(b.name()));
            let mut out = String::new();
            for subscription in subscriptions {
                out.push_str(&subscription.show(verbosity));
            }
            Ok(out)
        } else {
            Ok(self.find_subscription(name)?.show(verbosity))
        }
    }

    // ---- teardown ----------------------------------------------------------

    /// Process shutdown: disconnect every session and stop all background
    /// tasks. Sessions and subscriptions are only destroyed here.
    pub async fn shutdown(self: &Arc<Self>) {
        let names: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        join_all(names.iter().map(|name| self.disconnect(name))).await;
        self.shutdown.cancel();
        info!("runtime shut down");
    }
}
