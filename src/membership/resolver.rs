//! Membership Resolver
//!
//! Computes the set of live peers: every directory entry except our own,
//! filtered down to the endpoints that currently accept connections.

use std::collections::BTreeSet;
use std::sync::Arc;
use futures::future::join_all;

use super::{Endpoint, NodeIdentity, ReachabilityProber};
use crate::directory::PeerDirectory;
use crate::error::Result;

/// Resolves reachable peers from the shared directory
pub struct MembershipResolver {
    /// This node's identity
    identity: NodeIdentity,
    /// Endpoint this node publishes
    self_endpoint: Endpoint,
    directory: Arc<dyn PeerDirectory>,
    prober: Arc<dyn ReachabilityProber>,
}

impl MembershipResolver {
    pub fn new(
        identity: NodeIdentity,
        self_endpoint: Endpoint,
        directory: Arc<dyn PeerDirectory>,
        prober: Arc<dyn ReachabilityProber>,
    ) -> Self {
        Self {
            identity,
            self_endpoint,
            directory,
            prober,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn self_endpoint(&self) -> &Endpoint {
        &self.self_endpoint
    }

    /// Resolve the current set of reachable peers (never includes self)
    pub async fn resolve(&self) -> Result<BTreeSet<Endpoint>> {
        let entries = self.directory.list_all().await?;

        let candidates: BTreeSet<Endpoint> = entries
            .into_iter()
            .filter(|entry| entry.endpoint != self.self_endpoint && entry.identity != self.identity)
            .map(|entry| entry.endpoint)
            .collect();

        let probes = candidates.iter().map(|endpoint| async move {
            let reachable = self.prober.is_reachable(endpoint).await;
            if !reachable {
                tracing::debug!("Peer {} is unreachable, excluding", endpoint);
            }
            (endpoint, reachable)
        });

        let reachable = join_all(probes)
            .await
            .into_iter()
            .filter(|(_, reachable)| *reachable)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();

        Ok(reachable)
    }
}
