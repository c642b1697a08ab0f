//! Replication Module
//!
//! Continuous CouchDB replication from every reachable peer into the local
//! database: command issuing and the link-set reconciler.

mod command;
pub mod reconciler;

pub use command::{CouchClient, ReplicationControl, ReplicationDirective};
pub use reconciler::{reconcile, ReconcileOutcome, ReplicationSet, TickReport};
