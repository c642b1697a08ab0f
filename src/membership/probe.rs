//! Reachability probing
//!
//! A peer counts as reachable when a TCP connection to its CouchDB port can
//! be established within the probe timeout. No data is exchanged.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::Endpoint;

/// Checks whether a peer endpoint accepts connections
#[async_trait::async_trait]
pub trait ReachabilityProber: Send + Sync {
    async fn is_reachable(&self, endpoint: &Endpoint) -> bool;
}

/// Connect-only TCP prober with a bounded timeout
#[derive(Debug, Clone)]
pub struct TcpProber {
    connect_timeout: Duration,
}

impl TcpProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait::async_trait]
impl ReachabilityProber for TcpProber {
    async fn is_reachable(&self, endpoint: &Endpoint) -> bool {
        let target = (endpoint.address.as_str(), endpoint.port);
        match timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            Ok(Err(e)) => {
                tracing::trace!("Probe of {} failed: {}", endpoint, e);
                false
            }
            Err(_) => {
                tracing::trace!("Probe of {} timed out after {:?}", endpoint, self.connect_timeout);
                false
            }
        }
    }
}
