//! Administrative command surface.
//!
//! Each command validates its input, invokes the runtime, and reports
//! failures as human-readable text on the returned diagnostic output. The
//! dispatcher never panics and never terminates the host; every internal
//! error is converted to an `ERROR :` line. Out-of-range numeric fields on
//! subscription creation degrade to warnings with defaults; this asymmetry
//! against the hard-aborting namespace-index check is deliberate.

use crate::{
    error::ClientResult,
    registry::{Runtime, SubscriptionParams},
};
use std::{fmt::Write as _, sync::Arc};
use tracing::warn;

/// One administrative command as received from the host console.
///
/// Numeric fields are wide signed integers on purpose: range validation and
/// the warning-with-default policy live here, not in the typed runtime API.
#[derive(Debug, Clone)]
pub enum AdminCommand {
    CreateSession {
        name: String,
        endpoint_url: String,
        debug: i64,
    },
    Connect {
        session: String,
    },
    Disconnect {
        session: String,
    },
    /// Empty session name = all sessions.
    ShowSession {
        session: String,
        verbosity: i64,
    },
    /// Empty session name = all sessions.
    SetDebugLevel {
        session: String,
        level: i64,
    },
    CreateSubscription {
        name: String,
        session: String,
        publishing_interval_ms: i64,
        priority: i64,
        debug: i64,
    },
    /// Empty subscription name = all subscriptions.
    ShowSubscription {
        name: String,
        verbosity: i64,
    },
    ShowItemData {
        record: String,
    },
    SetNamespaceUri {
        session: String,
        uri: String,
        index: i64,
    },
}

/// Dispatches administrative commands against one runtime instance.
pub struct CommandDispatcher {
    runtime: Arc<Runtime>,
}

fn report<T>(out: &mut String, result: ClientResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "administrative command failed");
            let _ = writeln!(out, "ERROR : {e}");
            None
        }
    }
}

fn has_whitespace(s: &str) -> bool {
    s.chars().any(char::is_whitespace)
}

impl CommandDispatcher {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Execute one command and return its diagnostic output.
    pub async fn dispatch(&self, cmd: AdminCommand) -> String {
        let mut out = String::new();
        match cmd {
            AdminCommand::CreateSession {
                name,
                endpoint_url,
                debug,
            } => self.create_session(&mut out, &name, &endpoint_url, debug),
            AdminCommand::Connect { session } => {
                if session.is_empty() {
                    let _ = writeln!(out, "ERROR : missing argument #1 (session name)");
                } else {
                    report(&mut out, self.runtime.connect(&session).await);
                }
            }
            AdminCommand::Disconnect { session } => {
                if session.is_empty() {
                    let _ = writeln!(out, "ERROR : missing argument #1 (session name)");
                } else {
                    report(&mut out, self.runtime.disconnect(&session).await);
                }
            }
            AdminCommand::ShowSession { session, verbosity } => {
                let verbosity = verbosity.max(0) as u32;
                if let Some(text) =
                    report(&mut out, self.runtime.show_sessions(&session, verbosity))
                {
                    out.push_str(&text);
                }
            }
            AdminCommand::SetDebugLevel { session, level } => {
                if level < 0 {
                    let _ = writeln!(out, "ERROR : invalid argument #2 (debug level) '{level}'");
                } else {
                    report(
                        &mut out,
                        self.runtime.set_session_debug(&session, level as u32),
                    );
                }
            }
            AdminCommand::CreateSubscription {
                name,
                session,
                publishing_interval_ms,
                priority,
                debug,
            } => {
                self.create_subscription(
                    &mut out,
                    &name,
                    &session,
                    publishing_interval_ms,
                    priority,
                    debug,
                );
            }
            AdminCommand::ShowSubscription { name, verbosity } => {
                let verbosity = verbosity.max(0) as u32;
                if let Some(text) =
                    report(&mut out, self.runtime.show_subscriptions(&name, verbosity))
                {
                    out.push_str(&text);
                }
            }
            AdminCommand::ShowItemData { record } => {
                if record.is_empty() {
                    let _ = writeln!(out, "ERROR : missing argument #1 (record name)");
                } else if let Some(item) = report(&mut out, self.runtime.find_item(&record)) {
                    out.push_str(&item.show(1));
                }
            }
            AdminCommand::SetNamespaceUri {
                session,
                uri,
                index,
            } => {
                self.set_namespace_uri(&mut out, &session, &uri, index).await;
            }
        }
        out
    }

    fn create_session(&self, out: &mut String, name: &str, endpoint_url: &str, debug: i64) {
        if name.is_empty() {
            let _ = writeln!(out, "ERROR : missing argument #1 (session name)");
            return;
        }
        if endpoint_url.is_empty() {
            let _ = writeln!(out, "ERROR : missing argument #2 (endpoint URL)");
            return;
        }
        let debug = if debug < 0 {
            let _ = writeln!(out, "WARN : invalid argument #3 (debug level) '{debug}'");
            0
        } else {
            debug as u32
        };
        report(
            out,
            self.runtime
                .create_session(name, crate::config::SessionConfig::new(endpoint_url), debug),
        );
    }

    fn create_subscription(
        &self,
        out: &mut String,
        name: &str,
        session: &str,
        publishing_interval_ms: i64,
        priority: i64,
        debug: i64,
    ) {
        let mut ok = true;

        if name.is_empty() {
            let _ = writeln!(out, "ERROR : missing argument #1 (subscription name)");
            ok = false;
        } else if has_whitespace(name) {
            let _ = writeln!(out, "ERROR : invalid argument #1 (subscription name) '{name}'");
            ok = false;
        } else if self.runtime.subscription_exists(name) {
            let _ = writeln!(out, "ERROR : subscription name '{name}' already in use");
            ok = false;
        }

        if session.is_empty() {
            let _ = writeln!(out, "ERROR : missing argument #2 (session name)");
            ok = false;
        } else if has_whitespace(session) {
            let _ = writeln!(out, "ERROR : invalid argument #2 (session name) '{session}'");
            ok = false;
        } else if !self.runtime.session_exists(session) {
            let _ = writeln!(out, "ERROR : session '{session}' does not exist");
            ok = false;
        }

        let interval = if publishing_interval_ms < 0 {
            let _ = writeln!(
                out,
                "ERROR : invalid argument #3 (publishing interval) '{publishing_interval_ms}'"
            );
            ok = false;
            0
        } else {
            // 0 requests the process-wide default.
            publishing_interval_ms as u64
        };

        let priority = if !(0..=255).contains(&priority) {
            let _ = writeln!(out, "WARN : invalid argument #4 (priority) '{priority}'");
            0
        } else {
            priority as u8
        };

        let debug = if debug < 0 {
            let _ = writeln!(out, "WARN : invalid argument #5 (debug level) '{debug}'");
            0
        } else {
            debug as u32
        };

        if !ok {
            let _ = writeln!(out, "ERROR - no subscription created");
            return;
        }
        let created = report(
            out,
            self.runtime.create_subscription(SubscriptionParams {
                name: name.to_string(),
                session: session.to_string(),
                publishing_interval_ms: interval,
                priority,
                debug,
            }),
        );
        if let Some(subscription) = created {
            if subscription.debug() > 0 {
                let _ = writeln!(out, "successfully configured subscription '{name}'");
            }
        }
    }

    async fn set_namespace_uri(&self, out: &mut String, session: &str, uri: &str, index: i64) {
        if session.is_empty() {
            let _ = writeln!(out, "ERROR : missing argument #1 (session name)");
            return;
        }
        if uri.is_empty() {
            let _ = writeln!(out, "ERROR : missing argument #2 (URI)");
            return;
        }
        if index < 0 || index > u16::MAX as i64 {
            let _ = writeln!(out, "ERROR : invalid argument #3 (namespace index) '{index}'");
            return;
        }
        match report(
            out,
            self.runtime
                .set_namespace_uri(session, uri, index as u16)
                .await,
        ) {
            Some(true) => {
                let _ = writeln!(out, "namespace indexes updated");
            }
            Some(false) => {
                let _ = writeln!(
                    out,
                    "session '{session}' is not connected; namespace indexes will be updated when connection is established"
                );
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SessionConfig,
        item::LinkConfig,
        mock::MockLink,
    };

    fn dispatcher() -> (CommandDispatcher, Arc<Runtime>) {
        let runtime = Runtime::new(MockLink::new(&["urn:std"]));
        (CommandDispatcher::new(Arc::clone(&runtime)), runtime)
    }

    async fn with_session(name: &str) -> (CommandDispatcher, Arc<Runtime>) {
        let (dispatcher, runtime) = dispatcher();
        runtime
            .create_session(name, SessionConfig::new("opc.tcp://localhost:4840"), 0)
            .unwrap();
        (dispatcher, runtime)
    }

    #[tokio::test]
    async fn create_session_requires_name_and_endpoint() {
        let (dispatcher, runtime) = dispatcher();
        let out = dispatcher
            .dispatch(AdminCommand::CreateSession {
                name: String::new(),
                endpoint_url: "opc.tcp://localhost:4840".to_string(),
                debug: 0,
            })
            .await;
        assert!(out.contains("ERROR : missing argument #1"));

        let out = dispatcher
            .dispatch(AdminCommand::CreateSession {
                name: "plc1".to_string(),
                endpoint_url: String::new(),
                debug: 0,
            })
            .await;
        assert!(out.contains("ERROR : missing argument #2"));
        assert!(!runtime.session_exists("plc1"));
    }

    #[tokio::test]
    async fn create_session_warns_on_negative_debug_but_creates() {
        let (dispatcher, runtime) = dispatcher();
        let out = dispatcher
            .dispatch(AdminCommand::CreateSession {
                name: "plc1".to_string(),
                endpoint_url: "opc.tcp://localhost:4840".to_string(),
                debug: -3,
            })
            .await;
        assert!(out.contains("WARN : invalid argument #3"));
        let session = runtime.find_session("plc1").unwrap();
        assert_eq!(session.debug(), 0);
    }

    #[tokio::test]
    async fn out_of_range_priority_warns_and_defaults() {
        let (dispatcher, runtime) = with_session("plc1").await;
        let out = dispatcher
            .dispatch(AdminCommand::CreateSubscription {
                name: "sub1".to_string(),
                session: "plc1".to_string(),
                publishing_interval_ms: 100,
                priority: 300,
                debug: 0,
            })
            .await;
        assert!(out.contains("WARN : invalid argument #4 (priority) '300'"));
        assert!(!out.contains("ERROR"));
        let sub = runtime.find_subscription("sub1").unwrap();
        assert_eq!(sub.priority(), 0);
        assert_eq!(sub.publishing_interval_ms(), 100);
    }

    #[tokio::test]
    async fn negative_interval_aborts_subscription_creation() {
        let (dispatcher, runtime) = with_session("plc1").await;
        let out = dispatcher
            .dispatch(AdminCommand::CreateSubscription {
                name: "sub1".to_string(),
                session: "plc1".to_string(),
                publishing_interval_ms: -5,
                priority: 0,
                debug: 0,
            })
            .await;
        assert!(out.contains("ERROR : invalid argument #3 (publishing interval) '-5'"));
        assert!(out.contains("ERROR - no subscription created"));
        assert!(!runtime.subscription_exists("sub1"));
    }

    #[tokio::test]
    async fn unknown_session_aborts_subscription_creation() {
        let (dispatcher, runtime) = dispatcher();
        let out = dispatcher
            .dispatch(AdminCommand::CreateSubscription {
                name: "sub1".to_string(),
                session: "ghost".to_string(),
                publishing_interval_ms: 0,
                priority: 0,
                debug: 0,
            })
            .await;
        assert!(out.contains("ERROR : session 'ghost' does not exist"));
        assert!(out.contains("ERROR - no subscription created"));
        assert!(!runtime.subscription_exists("sub1"));
    }

    #[tokio::test]
    async fn duplicate_subscription_name_is_reported() {
        let (dispatcher, _runtime) = with_session("plc1").await;
        let cmd = AdminCommand::CreateSubscription {
            name: "sub1".to_string(),
            session: "plc1".to_string(),
            publishing_interval_ms: 100,
            priority: 0,
            debug: 0,
        };
        let out = dispatcher.dispatch(cmd.clone()).await;
        assert!(out.is_empty());
        let out = dispatcher.dispatch(cmd).await;
        assert!(out.contains("ERROR : subscription name 'sub1' already in use"));
        assert!(out.contains("ERROR - no subscription created"));
    }

    #[tokio::test]
    async fn subscription_creation_reports_success_when_debugging() {
        let (dispatcher, _runtime) = with_session("plc1").await;
        let out = dispatcher
            .dispatch(AdminCommand::CreateSubscription {
                name: "sub1".to_string(),
                session: "plc1".to_string(),
                publishing_interval_ms: 100,
                priority: 0,
                debug: 1,
            })
            .await;
        assert!(out.contains("successfully configured subscription 'sub1'"));
    }

    #[tokio::test]
    async fn set_namespace_uri_on_disconnected_session_defers() {
        let (dispatcher, _runtime) = with_session("plc1").await;
        let out = dispatcher
            .dispatch(AdminCommand::SetNamespaceUri {
                session: "plc1".to_string(),
                uri: "urn:plant".to_string(),
                index: 1,
            })
            .await;
        assert!(out.contains(
            "session 'plc1' is not connected; namespace indexes will be updated"
        ));
    }

    #[tokio::test]
    async fn set_namespace_uri_validates_index_range() {
        let (dispatcher, _runtime) = with_session("plc1").await;
        for index in [-1_i64, u16::MAX as i64 + 1] {
            let out = dispatcher
                .dispatch(AdminCommand::SetNamespaceUri {
                    session: "plc1".to_string(),
                    uri: "urn:plant".to_string(),
                    index,
                })
                .await;
            assert!(out.contains("ERROR : invalid argument #3 (namespace index)"));
        }
    }

    #[tokio::test]
    async fn show_commands_render_registered_objects() {
        let (dispatcher, runtime) = with_session("plc1").await;
        runtime
            .create_subscription(crate::registry::SubscriptionParams {
                name: "sub1".to_string(),
                session: "plc1".to_string(),
                publishing_interval_ms: 100,
                priority: 0,
                debug: 0,
            })
            .unwrap();
        runtime
            .register_item(
                "rec:a",
                LinkConfig {
                    session: "plc1".to_string(),
                    subscription: None,
                    namespace_index: 0,
                    identifier: "s=Flow".to_string(),
                    elements: Vec::new(),
                },
                None,
            )
            .unwrap();

        let out = dispatcher
            .dispatch(AdminCommand::ShowSession {
                session: String::new(),
                verbosity: 1,
            })
            .await;
        assert!(out.contains("session 'plc1' state=Disconnected"));
        assert!(out.contains("subscription 'sub1'"));
        assert!(out.contains("s=Flow"));

        let out = dispatcher
            .dispatch(AdminCommand::ShowSubscription {
                name: "sub1".to_string(),
                verbosity: 0,
            })
            .await;
        assert!(out.contains("subscription 'sub1' session=plc1 interval=100ms"));

        let out = dispatcher
            .dispatch(AdminCommand::ShowItemData {
                record: "rec:a".to_string(),
            })
            .await;
        assert!(out.contains("item ns=0;s=Flow"));

        let out = dispatcher
            .dispatch(AdminCommand::ShowItemData {
                record: "rec:missing".to_string(),
            })
            .await;
        assert!(out.contains("ERROR : no such name: record 'rec:missing'"));
    }

    #[tokio::test]
    async fn set_debug_level_applies_to_all_sessions_when_unnamed() {
        let (dispatcher, runtime) = with_session("plc1").await;
        runtime
            .create_session("plc2", SessionConfig::new("opc.tcp://other:4840"), 0)
            .unwrap();
        let out = dispatcher
            .dispatch(AdminCommand::SetDebugLevel {
                session: String::new(),
                level: 2,
            })
            .await;
        assert!(out.is_empty());
        assert_eq!(runtime.find_session("plc1").unwrap().debug(), 2);
        assert_eq!(runtime.find_session("plc2").unwrap().debug(), 2);

        let out = dispatcher
            .dispatch(AdminCommand::SetDebugLevel {
                session: "plc1".to_string(),
                level: -1,
            })
            .await;
        assert!(out.contains("ERROR : invalid argument #2 (debug level) '-1'"));
    }
}
