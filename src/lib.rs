//! CouchMesh - Replication Membership for Clustered CouchDB
//!
//! A node host that keeps a set of CouchDB instances replicating into each
//! other. Each node publishes its CouchDB endpoint in a shared peer
//! directory, supervises its CouchDB and web-tier processes, and on every
//! tick converges its continuous replications to the set of reachable peers.
//!
//! # Architecture
//!
//! One supervisor loop per node drives everything:
//!
//! - check that the supervised processes are alive (recycle the node if not)
//! - resolve membership: directory entries minus self, minus unreachable peers
//! - reconcile: cancel replications from departed peers, start replications
//!   from new ones, tracking a link only once CouchDB accepted the command
//!
//! Failures in the steady state (directory outages, unreachable peers,
//! rejected replication commands) are absorbed and retried next tick.

pub mod config;
pub mod error;
pub mod directory;
pub mod membership;
pub mod replication;
pub mod supervisor;
pub mod api;

#[cfg(test)]
mod testing;

pub use config::CouchMeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CouchMeshConfig;
    pub use crate::error::{Error, Result};
    pub use crate::directory::{DirectoryEntry, PeerDirectory, SqliteDirectory};
    pub use crate::membership::{Endpoint, MembershipResolver, NodeIdentity, TcpProber};
    pub use crate::replication::{CouchClient, ReplicationControl, ReplicationSet};
    pub use crate::supervisor::{LivenessSupervisor, StatusBoard, SupervisorOutcome};
}
