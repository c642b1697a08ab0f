//! Node startup: launch the data engine and web tier
//!
//! Readiness waits are best effort. A process that never answers is left
//! running and the liveness loop decides its fate.

use tokio_util::sync::CancellationToken;

use crate::config::CouchMeshConfig;
use crate::error::Result;
use crate::replication::CouchClient;

use super::{LaunchVars, SupervisedChild};

/// Launch the configured child processes in order: CouchDB, then the web
/// tier once the database exists.
pub async fn launch_children(config: &CouchMeshConfig, couch: &CouchClient) -> Result<Vec<SupervisedChild>> {
    let web = config.web_endpoint()?;
    let vars = LaunchVars {
        couch_url: couch.base_url(),
        database: couch.database().to_string(),
        web_host: web.as_ref().map(|e| e.address.clone()).unwrap_or_default(),
        web_port: web.as_ref().map(|e| e.port.to_string()).unwrap_or_default(),
    };

    let attempts = config.couchdb.startup_attempts;
    let retry_interval = config.couchdb.startup_retry_interval();
    let mut children = Vec::new();

    if let Some(process) = &config.processes.couchdb {
        children.push(SupervisedChild::spawn("couchdb", process, &vars)?);

        if couch.wait_until_up(&couch.base_url(), attempts, retry_interval).await {
            tracing::info!("CouchDB is up at {}", couch.local());
        } else {
            tracing::warn!("CouchDB at {} did not answer after {} attempts", couch.local(), attempts);
        }
    }

    if let Err(e) = couch.ensure_database().await {
        tracing::error!("Failed to create database {}: {}", couch.database(), e);
    }

    if let Some(process) = &config.processes.web {
        children.push(SupervisedChild::spawn("web", process, &vars)?);

        if let Some(web) = &web {
            if couch.wait_until_up(&web.base_url(), attempts, retry_interval).await {
                tracing::info!("Web tier is up at {}", web);
            } else {
                tracing::warn!("Web tier at {} did not answer after {} attempts", web, attempts);
            }
        }
    }

    Ok(children)
}

/// [`launch_children`], abandoned as soon as `shutdown` is cancelled.
///
/// Returns `Ok(None)` on cancellation. Children launched so far are killed
/// when the abandoned launch is dropped.
pub async fn launch_children_until(
    config: &CouchMeshConfig,
    couch: &CouchClient,
    shutdown: &CancellationToken,
) -> Result<Option<Vec<SupervisedChild>>> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested during startup, abandoning launch");
            Ok(None)
        }
        result = launch_children(config, couch) => result.map(Some),
    }
}
