//! Replication Set Reconciler
//!
//! Converges the set of active replication links (peer -> self) towards the
//! freshly resolved membership. Links are only recorded once CouchDB has
//! accepted the command, and a failed cancel keeps the link tracked so it is
//! retried on the next tick.

use std::collections::BTreeSet;
use std::sync::Arc;
use serde::Serialize;

use super::ReplicationControl;
use crate::membership::Endpoint;

/// Result of a single reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Links successfully started
    pub started: Vec<Endpoint>,
    /// Links successfully cancelled
    pub stopped: Vec<Endpoint>,
    /// Start commands that failed (will be retried)
    pub failed_starts: Vec<Endpoint>,
    /// Stop commands that failed (link still tracked)
    pub failed_stops: Vec<Endpoint>,
}

impl TickReport {
    /// Number of commands sent to the data engine
    pub fn commands_issued(&self) -> usize {
        self.started.len() + self.stopped.len() + self.failed_starts.len() + self.failed_stops.len()
    }

    /// Whether every command in this pass succeeded
    pub fn is_clean(&self) -> bool {
        self.failed_starts.is_empty() && self.failed_stops.is_empty()
    }
}

/// Links after a reconcile pass, plus what happened
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub links: BTreeSet<Endpoint>,
    pub report: TickReport,
}

/// Compute `(to_remove, to_add)` for moving from `current` to `resolved`
pub fn plan(
    current: &BTreeSet<Endpoint>,
    resolved: &BTreeSet<Endpoint>,
) -> (Vec<Endpoint>, Vec<Endpoint>) {
    let to_remove = current.difference(resolved).cloned().collect();
    let to_add = resolved.difference(current).cloned().collect();
    (to_remove, to_add)
}

/// Run one reconcile pass. Cancels run before starts; individual failures
/// are absorbed and reported, never returned.
pub async fn reconcile(
    control: &dyn ReplicationControl,
    current: &BTreeSet<Endpoint>,
    resolved: &BTreeSet<Endpoint>,
) -> ReconcileOutcome {
    let (to_remove, to_add) = plan(current, resolved);
    let mut links = current.clone();
    let mut report = TickReport::default();

    for peer in to_remove {
        if control.issue(&peer, false).await {
            tracing::info!("Stopped replication from {}", peer);
            links.remove(&peer);
            report.stopped.push(peer);
        } else {
            tracing::warn!("Failed to stop replication from {}, will retry", peer);
            report.failed_stops.push(peer);
        }
    }

    for peer in to_add {
        if control.issue(&peer, true).await {
            tracing::info!("Started replication from {}", peer);
            links.insert(peer.clone());
            report.started.push(peer);
        } else {
            tracing::warn!("Failed to start replication from {}, will retry", peer);
            report.failed_starts.push(peer);
        }
    }

    ReconcileOutcome { links, report }
}

/// Node-local set of active replication links
pub struct ReplicationSet {
    links: BTreeSet<Endpoint>,
    control: Arc<dyn ReplicationControl>,
}

impl ReplicationSet {
    pub fn new(control: Arc<dyn ReplicationControl>) -> Self {
        Self {
            links: BTreeSet::new(),
            control,
        }
    }

    /// Currently tracked links
    pub fn links(&self) -> &BTreeSet<Endpoint> {
        &self.links
    }

    /// Converge towards `resolved`, replacing the tracked set
    pub async fn apply(&mut self, resolved: &BTreeSet<Endpoint>) -> TickReport {
        let outcome = reconcile(self.control.as_ref(), &self.links, resolved).await;
        self.links = outcome.links;
        outcome.report
    }
}
