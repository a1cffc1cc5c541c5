//! Per-session supervisor task: owns the connect/reconnect loop and drives
//! the connection event stream.

use crate::{
    config::build_exponential_backoff,
    registry::Runtime,
    session::{ConnectionState, Session},
    transport::LinkEvent,
};
use backoff::backoff::Backoff;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Supervises one session for the lifetime of one administrative connect.
///
/// The loop is: connect with backoff, reconcile the namespace table, publish
/// the connection (entering Connected), re-arm subscriptions, then drain the
/// event stream until the connection is lost and start over. Administrative
/// disconnect cancels the token and owns the cleanup.
pub(crate) struct SessionSupervisor {
    session: Arc<Session>,
    runtime: Arc<Runtime>,
    cancel: CancellationToken,
    generation: u64,
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        // `connect` marks the session busy before spawning; clearing it here
        // covers every exit path, including the task being dropped mid-await.
        self.session.end_supervisor(self.generation);
    }
}

impl SessionSupervisor {
    pub(crate) fn new(
        session: Arc<Session>,
        runtime: Arc<Runtime>,
        cancel: CancellationToken,
        generation: u64,
    ) -> Self {
        Self {
            session,
            runtime,
            cancel,
            generation,
        }
    }

    /// Settle the state after a cancelled connect attempt. A successor
    /// supervisor may already own the session; its state must not be touched.
    async fn finish_cancelled(&self) {
        let _transition = self.session.transition.lock().await;
        if self.session.supervisor_generation() == self.generation {
            self.session.set_state(ConnectionState::Disconnected);
        }
    }

    #[instrument(level = "info", skip_all, fields(session = %self.session.name()))]
    pub(crate) async fn run(self) {
        let link = self.runtime.link();
        let policy = self.session.config().reconnect;
        let mut bo = build_exponential_backoff(&policy);
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.session.set_state(ConnectionState::Connecting);

            // Attempt connection with backoff until success or cancellation.
            let (conn, mut events) = loop {
                match link.connect(&self.session.config().endpoint_url).await {
                    Ok(pair) => break pair,
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        let delay = bo
                            .next_backoff()
                            .unwrap_or(Duration::from_millis(policy.max_interval_ms));
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "connect retry");
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                self.finish_cancelled().await;
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            };

            // Reconcile before the connection becomes visible to items, so no
            // namespace-dependent request can resolve against a stale table.
            match conn.namespace_array().await {
                Ok(uris) => {
                    let report = self.session.namespaces().reconcile(&uris);
                    info!(
                        resolved = report.resolved.len(),
                        unresolved = report.unresolved.len(),
                        "namespace table reconciled"
                    );
                    if !report.unresolved.is_empty() {
                        warn!(indices = ?report.unresolved, "namespace URIs missing on server");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read server namespace array");
                    conn.close().await;
                    attempt = attempt.saturating_add(1);
                    let delay = bo
                        .next_backoff()
                        .unwrap_or(Duration::from_millis(policy.max_interval_ms));
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.finish_cancelled().await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            }

            // Publishing the connection races with an administrative
            // disconnect; the transition lock makes cancel-check plus attach
            // atomic against it, so a completed disconnect is never
            // overwritten back to Connected.
            {
                let _transition = self.session.transition.lock().await;
                if self.cancel.is_cancelled() {
                    conn.close().await;
                    if self.session.supervisor_generation() == self.generation {
                        self.session.set_state(ConnectionState::Disconnected);
                    }
                    return;
                }
                self.session.attach_connection(Arc::clone(&conn));
            }
            bo.reset();
            attempt = 0;

            self.runtime
                .rearm_session_subscriptions(&self.session, &conn)
                .await;

            // Event loop for this connection.
            let reason = loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        // Administrative disconnect owns cleanup.
                        return;
                    }
                    maybe = events.recv() => match maybe {
                        Some(LinkEvent::ConnectionLost(reason)) => break reason,
                        Some(LinkEvent::KeepAliveFailed(reason)) => {
                            warn!(reason = %reason, "keep-alive failed");
                        }
                        Some(LinkEvent::KeepAlive) => {}
                        None => break "event stream closed".to_string(),
                    }
                }
            };

            warn!(reason = %reason, "connection lost");
            {
                let _transition = self.session.transition.lock().await;
                conn.close().await;
                // A stale supervisor (cancelled and already replaced) must
                // not tear down its successor's session state.
                if self.session.supervisor_generation() == self.generation {
                    self.session.detach_connection();
                    self.runtime.disarm_session_subscriptions(&self.session);
                }
            }

            match bo.next_backoff() {
                Some(delay) => {
                    attempt = attempt.saturating_add(1);
                    info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    warn!("reconnect budget exhausted");
                    return;
                }
            }
        }
    }
}
