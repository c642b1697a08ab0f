//! SQLite Peer Directory
//!
//! Directory table stored in a SQLite database file. Pointing every node at
//! the same file (shared storage) gives the cluster one registry.

use std::path::Path;
use std::time::Duration;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DirectoryEntry, PeerDirectory};
use crate::error::{Error, Result};
use crate::membership::{Endpoint, NodeIdentity};

/// How long a writer waits on a locked database file before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer directory backed by SQLite
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Create or open the directory database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(conn)
    }

    /// Create a private in-memory directory
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS role_endpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                role_id TEXT NOT NULL,
                address TEXT NOT NULL,
                port INTEGER NOT NULL,
                registration_id TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_role_endpoints_role
                ON role_endpoints(role_id);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn upsert_entry(conn: &mut Connection, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM role_endpoints WHERE role_id = ?1",
        params![identity.as_str()],
    )?;
    tx.execute(
        r#"
        INSERT INTO role_endpoints (role_id, address, port, registration_id, registered_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            identity.as_str(),
            endpoint.address,
            endpoint.port as i64,
            Uuid::new_v4().to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    tx.commit()?;
    Ok(())
}

struct EntryRow {
    role_id: String,
    address: String,
    port: i64,
    seq: i64,
    registration_id: String,
    registered_at: String,
}

fn row_to_entry(row: EntryRow) -> Result<DirectoryEntry> {
    let EntryRow { role_id, address, port, seq, registration_id, registered_at } = row;
    let port = u16::try_from(port)
        .map_err(|_| Error::DirectoryUnavailable(format!("invalid port {} for {}", port, role_id)))?;
    let registered_at = DateTime::parse_from_rfc3339(&registered_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::DirectoryUnavailable(format!("invalid timestamp for {}: {}", role_id, e)))?;
    let registration_id = Uuid::parse_str(&registration_id)
        .map_err(|e| Error::DirectoryUnavailable(format!("invalid registration id for {}: {}", role_id, e)))?;

    Ok(DirectoryEntry {
        identity: NodeIdentity::new(role_id)?,
        endpoint: Endpoint::new(address, port),
        seq,
        registration_id,
        registered_at,
    })
}

fn list_entries(conn: &Connection) -> Result<Vec<DirectoryEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT role_id, address, port, seq, registration_id, registered_at
        FROM role_endpoints ORDER BY seq
        "#,
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(EntryRow {
            role_id: row.get(0)?,
            address: row.get(1)?,
            port: row.get(2)?,
            seq: row.get(3)?,
            registration_id: row.get(4)?,
            registered_at: row.get(5)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        match row_to_entry(row?) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping malformed directory entry: {}", e),
        }
    }
    Ok(entries)
}

#[async_trait::async_trait]
impl PeerDirectory for SqliteDirectory {
    async fn upsert(&self, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<()> {
        let mut conn = self.conn.lock().await;
        upsert_entry(&mut conn, identity, endpoint)?;
        tracing::debug!("Registered {} at {}", identity, endpoint);
        Ok(())
    }

    async fn remove(&self, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM role_endpoints WHERE role_id = ?1 AND address = ?2 AND port = ?3",
            params![identity.as_str(), endpoint.address, endpoint.port as i64],
        )?;
        Ok(removed > 0)
    }

    async fn list_all(&self) -> Result<Vec<DirectoryEntry>> {
        let conn = self.conn.lock().await;
        list_entries(&conn)
    }

    async fn get(&self, identity: &NodeIdentity) -> Result<Option<Endpoint>> {
        let conn = self.conn.lock().await;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT address, port FROM role_endpoints WHERE role_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![identity.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((address, port)) => {
                let port = u16::try_from(port).map_err(|_| {
                    Error::DirectoryUnavailable(format!("invalid port {} for {}", port, identity))
                })?;
                Ok(Some(Endpoint::new(address, port)))
            }
            None => Ok(None),
        }
    }
}
