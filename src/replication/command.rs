//! Replication command issuing
//!
//! Start and stop directives are POSTed to the local CouchDB's `_replicate`
//! endpoint. A directive only has to be accepted; convergence of the
//! replication itself is CouchDB's business.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::CouchDbConfig;
use crate::error::{Error, Result};
use crate::membership::Endpoint;

/// Body of a `_replicate` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationDirective {
    /// Remote database URL (`http://peer/db`)
    pub source: String,
    /// Local database name
    pub target: String,
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
}

impl ReplicationDirective {
    /// Directive that starts (or, with `start == false`, cancels) continuous
    /// replication of `database` from `peer` into the local database
    pub fn new(peer: &Endpoint, database: &str, start: bool) -> Self {
        Self {
            source: format!("{}{}", peer.base_url(), database),
            target: database.to_string(),
            continuous: true,
            cancel: if start { None } else { Some(true) },
        }
    }
}

/// Sends replication start/stop commands to the local data engine
#[async_trait::async_trait]
pub trait ReplicationControl: Send + Sync {
    /// Issue a start (`start == true`) or stop command for replication from
    /// `peer`. Returns whether the data engine accepted the command.
    async fn issue(&self, peer: &Endpoint, start: bool) -> bool;
}

/// HTTP client for the local CouchDB instance
pub struct CouchClient {
    http: reqwest::Client,
    /// Local CouchDB endpoint
    local: Endpoint,
    database: String,
    user: String,
    password: String,
}

impl CouchClient {
    /// Create a client for the CouchDB listening at `local`
    pub fn new(local: Endpoint, config: &CouchDbConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            local,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// URL of the local CouchDB server root
    pub fn base_url(&self) -> String {
        self.local.base_url()
    }

    /// Create the replicated database. An existing database is not an error.
    pub async fn ensure_database(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url(), self.database);
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Created database {}", self.database);
            Ok(())
        } else if status == reqwest::StatusCode::PRECONDITION_FAILED {
            tracing::debug!("Database {} already exists", self.database);
            Ok(())
        } else {
            Err(Error::Network(format!(
                "PUT {} returned {}",
                url, status
            )))
        }
    }

    /// Poll `url` until it answers with a success status.
    /// Returns false once `attempts` requests have failed.
    pub async fn wait_until_up(&self, url: &str, attempts: u32, retry_interval: Duration) -> bool {
        for attempt in 1..=attempts {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    tracing::debug!("{} answered {} (attempt {}/{})", url, response.status(), attempt, attempts);
                }
                Err(e) => {
                    tracing::debug!("{} not up yet (attempt {}/{}): {}", url, attempt, attempts, e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(retry_interval).await;
            }
        }
        false
    }

    async fn send_directive(&self, directive: &ReplicationDirective) -> Result<()> {
        let url = format!("{}_replicate", self.base_url());
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(directive)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::ReplicationCommand {
            peer: directive.source.clone(),
            reason: format!("{} {}", status, body.trim()),
        })
    }
}

#[async_trait::async_trait]
impl ReplicationControl for CouchClient {
    async fn issue(&self, peer: &Endpoint, start: bool) -> bool {
        let directive = ReplicationDirective::new(peer, &self.database, start);
        tracing::info!(
            "Replication command: {} {} -> {}",
            if start { "start" } else { "cancel" },
            directive.source,
            directive.target
        );

        match self.send_directive(&directive).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Replication command for {} failed: {}", peer, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use axum::{
        extract::{Json, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post, put},
        Router,
    };

    #[derive(Default)]
    struct FakeCouch {
        status: Mutex<u16>,
        requests: Mutex<Vec<(Option<String>, serde_json::Value)>>,
    }

    async fn handle_replicate(
        State(couch): State<Arc<FakeCouch>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        couch.requests.lock().unwrap().push((auth, body));
        StatusCode::from_u16(*couch.status.lock().unwrap()).unwrap()
    }

    async fn handle_create_db(State(couch): State<Arc<FakeCouch>>) -> StatusCode {
        StatusCode::from_u16(*couch.status.lock().unwrap()).unwrap()
    }

    async fn spawn_fake_couch(status: u16) -> (Endpoint, Arc<FakeCouch>) {
        let couch = Arc::new(FakeCouch {
            status: Mutex::new(status),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/", get(|| async { "{\"couchdb\":\"Welcome\"}" }))
            .route("/_replicate", post(handle_replicate))
            .route("/:db", put(handle_create_db))
            .with_state(Arc::clone(&couch));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (Endpoint::new("127.0.0.1", port), couch)
    }

    fn couch_config() -> CouchDbConfig {
        CouchDbConfig {
            database: "orders".to_string(),
            request_timeout_ms: 2000,
            ..CouchDbConfig::default()
        }
    }

    #[test]
    fn test_directive_shape() {
        let peer = Endpoint::new("1.2.3.5", 5984);

        let start = serde_json::to_value(ReplicationDirective::new(&peer, "orders", true)).unwrap();
        assert_eq!(
            start,
            serde_json::json!({
                "source": "http://1.2.3.5:5984/orders",
                "target": "orders",
                "continuous": true
            })
        );

        let stop = serde_json::to_value(ReplicationDirective::new(&peer, "orders", false)).unwrap();
        assert_eq!(stop["cancel"], serde_json::json!(true));
        assert_eq!(stop["continuous"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_issue_start_and_stop() {
        let (local, couch) = spawn_fake_couch(200).await;
        let client = CouchClient::new(local, &couch_config()).unwrap();
        let peer = Endpoint::new("1.2.3.5", 5984);

        assert!(client.issue(&peer, true).await);
        assert!(client.issue(&peer, false).await);

        let requests = couch.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        // admin:password
        assert_eq!(requests[0].0.as_deref(), Some("Basic YWRtaW46cGFzc3dvcmQ="));
        assert_eq!(requests[0].1["source"], "http://1.2.3.5:5984/orders");
        assert!(requests[0].1.get("cancel").is_none());
        assert_eq!(requests[1].1["cancel"], true);
    }

    #[tokio::test]
    async fn test_issue_rejected_is_failure() {
        let (local, _couch) = spawn_fake_couch(401).await;
        let client = CouchClient::new(local, &couch_config()).unwrap();

        assert!(!client.issue(&Endpoint::new("1.2.3.5", 5984), true).await);
    }

    #[tokio::test]
    async fn test_issue_unreachable_engine_is_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = CouchClient::new(Endpoint::new("127.0.0.1", port), &couch_config()).unwrap();
        assert!(!client.issue(&Endpoint::new("1.2.3.5", 5984), false).await);
    }

    #[tokio::test]
    async fn test_ensure_database_tolerates_existing() {
        let (local, couch) = spawn_fake_couch(412).await;
        let client = CouchClient::new(local, &couch_config()).unwrap();
        client.ensure_database().await.unwrap();

        *couch.status.lock().unwrap() = 500;
        assert!(client.ensure_database().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_until_up() {
        let (local, _couch) = spawn_fake_couch(200).await;
        let client = CouchClient::new(local, &couch_config()).unwrap();

        let up = client
            .wait_until_up(&client.base_url(), 3, Duration::from_millis(10))
            .await;
        assert!(up);
    }
}
