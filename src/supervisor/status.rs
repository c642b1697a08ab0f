//! Node status snapshot shared with the status API

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::membership::{Endpoint, NodeIdentity};
use crate::replication::TickReport;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    /// Registering and launching child processes
    Starting,
    /// Reconcile loop active
    Running,
    /// Graceful shutdown in progress
    Stopping,
    /// A supervised process died; the node is being recycled
    Recycling,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "STARTING"),
            SupervisorState::Running => write!(f, "RUNNING"),
            SupervisorState::Stopping => write!(f, "STOPPING"),
            SupervisorState::Recycling => write!(f, "RECYCLING"),
        }
    }
}

/// Point-in-time view of the node
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeIdentity,
    pub couch_endpoint: Endpoint,
    pub state: SupervisorState,
    pub started_at: DateTime<Utc>,
    /// Completed reconcile ticks
    pub ticks: u64,
    pub active_links: Vec<Endpoint>,
    pub last_tick: Option<TickReport>,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Most recent absorbed tick error
    pub last_error: Option<String>,
}

/// Shared, lock-protected node status
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<NodeStatus>>,
}

impl StatusBoard {
    pub fn new(node_id: NodeIdentity, couch_endpoint: Endpoint) -> Self {
        Self {
            inner: Arc::new(RwLock::new(NodeStatus {
                node_id,
                couch_endpoint,
                state: SupervisorState::Starting,
                started_at: Utc::now(),
                ticks: 0,
                active_links: Vec::new(),
                last_tick: None,
                last_tick_at: None,
                last_error: None,
            })),
        }
    }

    pub async fn snapshot(&self) -> NodeStatus {
        self.inner.read().await.clone()
    }

    pub async fn set_state(&self, state: SupervisorState) {
        self.inner.write().await.state = state;
    }

    /// Record a completed tick
    pub async fn record_tick(&self, links: Vec<Endpoint>, report: TickReport) {
        let mut status = self.inner.write().await;
        status.ticks += 1;
        status.active_links = links;
        status.last_tick = Some(report);
        status.last_tick_at = Some(Utc::now());
        status.last_error = None;
    }

    /// Record a tick that was skipped because of an absorbed error
    pub async fn record_error(&self, error: &crate::Error) {
        let mut status = self.inner.write().await;
        status.last_error = Some(error.to_string());
        status.last_tick_at = Some(Utc::now());
    }
}
