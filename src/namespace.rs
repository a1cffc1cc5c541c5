//! Per-session namespace table with URI-to-index reconciliation.
//!
//! Server namespace indices are not stable across restarts. Each session
//! keeps a fixed-length table of expected URIs; after every successful
//! connect the table is reconciled against the server's live namespace array
//! and the effective runtime indices are rewritten. Resolved indices are
//! invalidated on every disconnect so a stale mapping is never reused.

use crate::error::{ClientError, ClientResult};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct NamespaceSlot {
    /// Configured/expected URI. None = slot not configured.
    uri: Option<String>,
    /// Live runtime index derived by the most recent reconciliation.
    resolved: Option<u16>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `(configured index, live index)` pairs that resolved.
    pub resolved: Vec<(u16, u16)>,
    /// Configured indices whose URI was absent from the server array.
    pub unresolved: Vec<u16>,
}

/// Fixed-length table mapping configured namespace indices to live ones.
///
/// Reads of the effective mapping are excluded against reconciliation and
/// administrative overrides by the inner lock; the table length never changes
/// after construction.
pub struct NamespaceTable {
    slots: RwLock<Vec<NamespaceSlot>>,
}

impl NamespaceTable {
    /// Build a table of `capacity.max(uris.len())` slots. Empty URI strings
    /// leave the slot unconfigured.
    pub fn new(uris: &[String], capacity: usize) -> Self {
        let len = capacity.max(uris.len());
        let mut slots = vec![NamespaceSlot::default(); len];
        for (i, uri) in uris.iter().enumerate() {
            if !uri.is_empty() {
                slots[i].uri = Some(uri.clone());
            }
        }
        Self {
            slots: RwLock::new(slots),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Administrative override of one slot's expected URI.
    ///
    /// Bounds-checked; out-of-range writes leave the table untouched. The
    /// slot's resolved index is cleared so the override cannot be combined
    /// with a mapping derived from the old URI.
    pub fn set_uri(&self, index: u16, uri: &str) -> ClientResult<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| ClientError::Transport("namespace table poisoned".to_string()))?;
        let len = slots.len();
        let slot = slots
            .get_mut(index as usize)
            .ok_or(ClientError::OutOfRange(index, len))?;
        slot.uri = if uri.is_empty() {
            None
        } else {
            Some(uri.to_string())
        };
        slot.resolved = None;
        Ok(())
    }

    /// Effective runtime index for a configured index.
    ///
    /// Unconfigured slots (and indices beyond the table) map to themselves;
    /// a configured slot must have been resolved by reconciliation since the
    /// last connect, otherwise the request fails with UnresolvedNamespace.
    pub fn resolve(&self, index: u16) -> ClientResult<u16> {
        let slots = self
            .slots
            .read()
            .map_err(|_| ClientError::Transport("namespace table poisoned".to_string()))?;
        match slots.get(index as usize) {
            Some(slot) if slot.uri.is_some() => {
                slot.resolved.ok_or(ClientError::UnresolvedNamespace(index))
            }
            _ => Ok(index),
        }
    }

    /// Resolve each configured URI against the server's live namespace array.
    pub fn reconcile(&self, server_uris: &[String]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Ok(mut slots) = self.slots.write() else {
            return report;
        };
        for (i, slot) in slots.iter_mut().enumerate() {
            let Some(uri) = slot.uri.as_deref() else {
                continue;
            };
            let index = i as u16;
            match server_uris.iter().position(|u| u == uri) {
                Some(live) => {
                    slot.resolved = Some(live as u16);
                    report.resolved.push((index, live as u16));
                }
                None => {
                    slot.resolved = None;
                    report.unresolved.push(index);
                    debug!(index, uri, "namespace URI not present on server");
                }
            }
        }
        report
    }

    /// Drop all resolved indices. Called on every disconnect; configured URIs
    /// survive for the next reconciliation.
    pub fn invalidate(&self) {
        if let Ok(mut slots) = self.slots.write() {
            for slot in slots.iter_mut() {
                slot.resolved = None;
            }
        }
    }

    /// `(resolved, configured)` slot counts for diagnostic output.
    pub fn summary(&self) -> (usize, usize) {
        match self.slots.read() {
            Ok(slots) => {
                let configured = slots.iter().filter(|s| s.uri.is_some()).count();
                let resolved = slots.iter().filter(|s| s.resolved.is_some()).count();
                (resolved, configured)
            }
            Err(_) => (0, 0),
        }
    }

    /// One line per configured slot, for `show` at verbosity >= 1.
    pub fn dump(&self) -> Vec<String> {
        match self.slots.read() {
            Ok(slots) => slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| {
                    slot.uri.as_deref().map(|uri| match slot.resolved {
                        Some(live) => format!("ns {i} -> {live} ({uri})"),
                        None => format!("ns {i} -> unresolved ({uri})"),
                    })
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
