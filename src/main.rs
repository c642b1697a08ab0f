//! CouchMesh - Replication Membership for Clustered CouchDB
//!
//! Node host: registers the node, launches CouchDB and the web tier, and
//! runs the liveness/reconcile loop until shutdown or recycle.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use couchmesh::api::HttpServer;
use couchmesh::config::CouchMeshConfig;
use couchmesh::directory::{PeerDirectory, SqliteDirectory};
use couchmesh::error::Result;
use couchmesh::membership::TcpProber;
use couchmesh::replication::CouchClient;
use couchmesh::supervisor::{
    launch_children_until, LivenessSupervisor, StatusBoard, SupervisorOutcome, RECYCLE_EXIT_CODE,
};

/// CouchMesh - Replication Membership for Clustered CouchDB
#[derive(Parser)]
#[command(name = "couchmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "couchmesh.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node host
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "couchmesh.toml")]
        output: PathBuf,

        /// Node identity
        #[arg(long, default_value = "CouchHost_IN_0")]
        node_id: String,

        /// CouchDB endpoint published to peers (host:port)
        #[arg(long, default_value = "127.0.0.1:5984")]
        couch_address: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = match CouchMeshConfig::from_file(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to load configuration from {:?}: {}", cli.config, e);
                    return Err(e);
                }
            };
            let level = cli.log_level.unwrap_or_else(|| config.logging.level.clone());
            init_logging(&level, &config.logging.format);
            run_start(config).await
        }
        Commands::Init { output, node_id, couch_address } => {
            run_init(output, node_id, couch_address)
        }
        Commands::Validate => {
            run_validate(cli.config)
        }
        Commands::Info => {
            run_info(cli.config).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Start the node host
async fn run_start(config: CouchMeshConfig) -> Result<()> {
    let identity = config.identity()?;
    let endpoint = config.couch_endpoint()?;
    tracing::info!("Starting CouchMesh node {} ({})", identity, endpoint);

    let directory: Arc<dyn PeerDirectory> = match SqliteDirectory::open(&config.directory.path) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            tracing::error!("Failed to open peer directory {:?}: {}", config.directory.path, e);
            return Err(e);
        }
    };

    let couch = Arc::new(CouchClient::new(endpoint.clone(), &config.couchdb)?);
    let prober = Arc::new(TcpProber::new(config.probe_timeout()));
    let status = StatusBoard::new(identity.clone(), endpoint.clone());

    let mut supervisor = LivenessSupervisor::new(
        identity,
        endpoint,
        Arc::clone(&directory),
        prober,
        couch.clone(),
        config.tick_interval(),
        status.clone(),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Received shutdown signal");
        signal_token.cancel();
    });

    if let Err(e) = supervisor.register().await {
        tracing::warn!("Failed to register in peer directory, retrying each tick: {}", e);
    }

    let api = HttpServer::new(config.api.clone(), status, Arc::clone(&directory));
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api.start().await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    match launch_children_until(&config, &couch, &shutdown).await {
        Ok(Some(children)) => {
            for child in children {
                supervisor.supervise(child);
            }
        }
        Ok(None) => {
            supervisor.shutdown().await;
            api_handle.abort();
            tracing::info!("CouchMesh node stopped during startup");
            return Ok(());
        }
        Err(e) => {
            tracing::error!("Failed to launch supervised processes: {}", e);
            supervisor.shutdown().await;
            api_handle.abort();
            return Err(e);
        }
    }

    let outcome = supervisor.run(shutdown).await;
    api_handle.abort();

    match outcome {
        SupervisorOutcome::Shutdown => {
            tracing::info!("CouchMesh node stopped");
            Ok(())
        }
        SupervisorOutcome::Recycle { reason } => {
            tracing::error!("Requesting node recycle: {}", reason);
            std::process::exit(RECYCLE_EXIT_CODE);
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String, couch_address: String) -> Result<()> {
    let config_content = format!(r#"# CouchMesh Configuration
# Generated configuration file

[node]
id = "{node_id}"
couch_address = "{couch_address}"
# web_address = "127.0.0.1:8000"

[couchdb]
user = "admin"
password = "password"
database = "couchmesh"
request_timeout_ms = 5000
startup_attempts = 11
startup_retry_interval_ms = 3000

[directory]
# Shared by every node in the cluster
path = "/var/lib/couchmesh/directory.db"

[membership]
tick_interval_ms = 10000
probe_timeout_ms = 2000

[processes.couchdb]
command = "/opt/couchdb/bin/couchdb"
args = []

# [processes.web]
# command = "/usr/bin/node"
# args = ["server.js", "{{web_host}}", "{{web_port}}", "{{couch_url}}", "{{database}}"]
# working_dir = "/opt/couchmesh/webapp"

[api]
enabled = true
bind_address = "127.0.0.1:8091"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to point every node at the same directory path.");
    println!("Then start with: couchmesh start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match CouchMeshConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  CouchDB Endpoint: {}", config.node.couch_address);
            println!("  Database: {}", config.couchdb.database);
            println!("  Directory: {}", config.directory.path.display());
            println!("  Tick Interval: {} ms", config.membership.tick_interval_ms);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
async fn run_info(config_path: PathBuf) -> Result<()> {
    let config = CouchMeshConfig::from_file(&config_path)?;
    let identity = config.identity()?;

    println!("CouchMesh Node Information");
    println!("==========================");
    println!();
    println!("Node ID:          {}", identity);
    println!("CouchDB:          {}", config.node.couch_address);
    println!("Web Tier:         {}", config.node.web_address.as_deref().unwrap_or("(none)"));
    println!("Database:         {}", config.couchdb.database);
    println!();
    println!("Membership:");
    println!("  Tick Interval:  {} ms", config.membership.tick_interval_ms);
    println!("  Probe Timeout:  {} ms", config.membership.probe_timeout_ms);
    println!();
    println!("Peer Directory:   {}", config.directory.path.display());

    match SqliteDirectory::open(&config.directory.path) {
        Ok(directory) => {
            match directory.get(&identity).await {
                Ok(Some(endpoint)) => println!("  Published:      {}", endpoint),
                Ok(None) => println!("  Published:      (not registered)"),
                Err(e) => println!("  Published:      unavailable ({})", e),
            }
            match directory.list_all().await {
                Ok(entries) => println!("  Entries:        {}", entries.len()),
                Err(e) => println!("  Entries:        unavailable ({})", e),
            }
        }
        Err(e) => println!("  unavailable ({})", e),
    }

    Ok(())
}
