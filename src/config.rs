//! CouchMesh Configuration
//!
//! This module provides configuration structures for the CouchMesh node
//! host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::membership::{Endpoint, NodeIdentity};

/// Main CouchMesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchMeshConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Local CouchDB configuration
    #[serde(default)]
    pub couchdb: CouchDbConfig,

    /// Peer directory configuration
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Membership and reconcile loop configuration
    #[serde(default)]
    pub membership: MembershipConfig,

    /// Supervised child processes
    #[serde(default)]
    pub processes: ProcessesConfig,

    /// Status API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identity (role instance id)
    pub id: String,

    /// Endpoint the local CouchDB listens on, published to the directory
    pub couch_address: String,

    /// Endpoint the web tier listens on
    #[serde(default)]
    pub web_address: Option<String>,
}

/// Local CouchDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDbConfig {
    /// Admin user for replication commands
    #[serde(default = "default_couch_user")]
    pub user: String,

    /// Admin password
    #[serde(default = "default_couch_password")]
    pub password: String,

    /// Database replicated across the cluster
    #[serde(default = "default_database")]
    pub database: String,

    /// Timeout for each HTTP request to CouchDB in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Readiness polls after launching a process
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,

    /// Delay between readiness polls in milliseconds
    #[serde(default = "default_startup_retry_interval_ms")]
    pub startup_retry_interval_ms: u64,
}

/// Peer directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Path of the shared directory database
    #[serde(default = "default_directory_path")]
    pub path: PathBuf,
}

/// Membership and reconcile loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Interval between supervisor ticks in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// TCP connect timeout for reachability probes in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Supervised child processes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessesConfig {
    /// CouchDB data engine
    #[serde(default)]
    pub couchdb: Option<ProcessConfig>,

    /// Companion web tier
    #[serde(default)]
    pub web: Option<ProcessConfig>,
}

/// How to launch a supervised child process
///
/// Arguments may contain `{couch_url}`, `{database}`, `{web_host}` and
/// `{web_port}`, which are expanded at launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub command: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Status API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable the HTTP status API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_couch_user() -> String {
    "admin".to_string()
}

fn default_couch_password() -> String {
    "password".to_string()
}

fn default_database() -> String {
    "couchmesh".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_startup_attempts() -> u32 {
    11
}

fn default_startup_retry_interval_ms() -> u64 {
    3000
}

fn default_directory_path() -> PathBuf {
    PathBuf::from("/var/lib/couchmesh/directory.db")
}

fn default_tick_interval_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "127.0.0.1:8091".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CouchDbConfig {
    fn default() -> Self {
        Self {
            user: default_couch_user(),
            password: default_couch_password(),
            database: default_database(),
            request_timeout_ms: default_request_timeout_ms(),
            startup_attempts: default_startup_attempts(),
            startup_retry_interval_ms: default_startup_retry_interval_ms(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: default_directory_path(),
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CouchDbConfig {
    /// Get the per-request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the readiness poll interval as Duration
    pub fn startup_retry_interval(&self) -> Duration {
        Duration::from_millis(self.startup_retry_interval_ms)
    }
}

impl CouchMeshConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: CouchMeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.identity()?;
        self.couch_endpoint()?;
        self.web_endpoint()?;

        if self.couchdb.database.is_empty() {
            return Err(crate::Error::Config("couchdb.database cannot be empty".into()));
        }

        if self.couchdb.request_timeout_ms == 0 {
            return Err(crate::Error::Config("couchdb.request_timeout_ms must be positive".into()));
        }

        if self.membership.tick_interval_ms == 0 {
            return Err(crate::Error::Config("membership.tick_interval_ms must be positive".into()));
        }

        if self.membership.probe_timeout_ms == 0 {
            return Err(crate::Error::Config("membership.probe_timeout_ms must be positive".into()));
        }

        if self.processes.web.is_some() && self.node.web_address.is_none() {
            return Err(crate::Error::Config(
                "node.web_address is required when processes.web is configured".into(),
            ));
        }

        Ok(())
    }

    /// Get the node identity
    pub fn identity(&self) -> crate::Result<NodeIdentity> {
        NodeIdentity::new(self.node.id.clone())
    }

    /// Get the published CouchDB endpoint
    pub fn couch_endpoint(&self) -> crate::Result<Endpoint> {
        self.node.couch_address.parse()
    }

    /// Get the web tier endpoint, if configured
    pub fn web_endpoint(&self) -> crate::Result<Option<Endpoint>> {
        self.node
            .web_address
            .as_deref()
            .map(str::parse)
            .transpose()
    }

    /// Get tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.membership.tick_interval_ms)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.membership.probe_timeout_ms)
    }
}
