//! CouchMeshCtl - Command line tool for inspecting CouchMesh nodes
//!
//! Usage:
//!   couchmeshctl status                              - Show local node status
//!   couchmeshctl directory list                      - List peer directory entries
//!   couchmeshctl directory remove <id> <host:port>   - Prune a stale entry
//!   couchmeshctl check-config                        - Validate the config file

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use couchmesh::config::CouchMeshConfig;
use couchmesh::directory::{PeerDirectory, SqliteDirectory};
use couchmesh::membership::{Endpoint, NodeIdentity};

/// CouchMesh Node Control Tool
#[derive(Parser)]
#[command(name = "couchmeshctl")]
#[command(about = "Inspect CouchMesh nodes and the peer directory", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/couchmesh/couchmesh.toml")]
    config: PathBuf,

    /// Status API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status of the local node
    Status,
    /// Inspect or edit the peer directory
    Directory {
        #[command(subcommand)]
        action: DirectorySubcommand,
    },
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DirectorySubcommand {
    /// List all registered nodes
    List,
    /// Remove the entry of a node that will not come back
    Remove {
        /// Node identity
        identity: String,
        /// Registered CouchDB endpoint (host:port)
        endpoint: String,
    },
}

// ============ API Response Types ============

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    node_id: String,
    couch_endpoint: Endpoint,
    #[serde(default)]
    state: String,
    #[serde(default)]
    ticks: u64,
    #[serde(default)]
    active_links: Vec<Endpoint>,
    #[serde(default)]
    last_tick_at: Option<String>,
    #[serde(default)]
    last_error: Option<String>,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Status => {
            let endpoint = api_endpoint(&cli);
            show_status(&endpoint).await
        }
        Commands::Directory { action } => match action {
            DirectorySubcommand::List => list_directory(&cli.config).await,
            DirectorySubcommand::Remove { identity, endpoint } => {
                remove_entry(&cli.config, identity, endpoint).await
            }
        },
        Commands::CheckConfig { file } => {
            let config_path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&config_path)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Status API base URL from the flag, the config file, or the default
fn api_endpoint(cli: &Cli) -> String {
    if let Some(e) = &cli.endpoint {
        return e.clone();
    }

    let bind = CouchMeshConfig::from_file(&cli.config)
        .map(|c| c.api.bind_address)
        .unwrap_or_else(|_| "127.0.0.1:8091".to_string());

    // A wildcard bind is reachable on loopback
    if let Some(port) = bind.strip_prefix("0.0.0.0:") {
        format!("http://127.0.0.1:{}", port)
    } else {
        format!("http://{}", bind)
    }
}

fn open_directory(config_path: &Path) -> anyhow::Result<SqliteDirectory> {
    let config = CouchMeshConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    SqliteDirectory::open(&config.directory.path)
        .with_context(|| format!("opening directory {}", config.directory.path.display()))
}

// ============ Commands ============

async fn show_status(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", endpoint);
    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("connecting to {}", url))?;

    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }

    let status: StatusResponse = response.json().await?;

    println!();
    println!("CouchMesh Node Status (couchmeshctl v{})", env!("CARGO_PKG_VERSION"));
    println!("=========================================");
    println!();
    println!("Node:        {}", status.node_id);
    println!("CouchDB:     {}", status.couch_endpoint);
    println!("State:       {}", status.state);
    println!("Ticks:       {}", status.ticks);
    if let Some(at) = &status.last_tick_at {
        println!("Last Tick:   {}", at);
    }
    if let Some(err) = &status.last_error {
        println!("Last Error:  \x1b[31m{}\x1b[0m", err);
    }
    println!();

    if status.active_links.is_empty() {
        println!("No active replication links");
    } else {
        println!("Replicating from:");
        for link in &status.active_links {
            println!("  {}", link);
        }
    }
    println!();

    Ok(())
}

async fn list_directory(config_path: &Path) -> anyhow::Result<()> {
    let directory = open_directory(config_path)?;
    let entries = directory.list_all().await?;

    println!();
    println!("{:<6} {:<30} {:<25} {:<10} {}", "SEQ", "NODE ID", "ENDPOINT", "REG", "REGISTERED");
    println!("{}", "-".repeat(100));
    for entry in &entries {
        let registration = entry.registration_id.simple().to_string();
        println!(
            "{:<6} {:<30} {:<25} {:<10} {}",
            entry.seq,
            entry.identity,
            entry.endpoint.to_string(),
            &registration[..8],
            entry.registered_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();
    println!("{} entries", entries.len());

    Ok(())
}

async fn remove_entry(config_path: &Path, identity: &str, endpoint: &str) -> anyhow::Result<()> {
    let identity = NodeIdentity::new(identity)?;
    let endpoint: Endpoint = endpoint.parse()?;
    let directory = open_directory(config_path)?;

    if directory.remove(&identity, &endpoint).await? {
        println!("Removed {} at {}", identity, endpoint);
        Ok(())
    } else {
        bail!("no entry for {} at {}", identity, endpoint)
    }
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = CouchMeshConfig::from_file(config_path)
        .with_context(|| format!("checking {}", config_path.display()))?;

    println!("✓ {} is valid", config_path.display());
    println!("  Node ID:    {}", config.node.id);
    println!("  CouchDB:    {}", config.node.couch_address);
    println!("  Directory:  {}", config.directory.path.display());
    println!("  Supervised: {}{}",
        if config.processes.couchdb.is_some() { "couchdb " } else { "" },
        if config.processes.web.is_some() { "web" } else { "" });

    Ok(())
}
