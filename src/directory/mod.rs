//! Peer Directory Module
//!
//! Shared registry mapping node identity to the endpoint its CouchDB
//! listens on. Every node registers itself at startup, reads the whole
//! directory on each reconcile tick, and deregisters on shutdown.

mod sqlite;

pub use sqlite::SqliteDirectory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::membership::{Endpoint, NodeIdentity};

/// A registration record in the peer directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Registering node
    pub identity: NodeIdentity,
    /// Published CouchDB endpoint
    pub endpoint: Endpoint,
    /// Insertion order tiebreak
    pub seq: i64,
    /// Fresh for every registration, so a restarted node is distinguishable
    pub registration_id: Uuid,
    /// When the entry was written
    pub registered_at: DateTime<Utc>,
}

/// Directory of cluster members
///
/// Implementations must keep at most one entry per identity: `upsert`
/// replaces any previous registration of the same identity.
#[async_trait::async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Register (or re-register) a node's endpoint
    async fn upsert(&self, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<()>;

    /// Remove the registration matching both identity and endpoint.
    /// Returns whether an entry was removed.
    async fn remove(&self, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<bool>;

    /// List every entry in insertion order
    async fn list_all(&self) -> Result<Vec<DirectoryEntry>>;

    /// Look up the endpoint registered for an identity
    async fn get(&self, identity: &NodeIdentity) -> Result<Option<Endpoint>>;
}
