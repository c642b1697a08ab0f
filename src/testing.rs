//! Test doubles shared by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::directory::{DirectoryEntry, PeerDirectory, SqliteDirectory};
use crate::error::{Error, Result};
use crate::membership::{Endpoint, NodeIdentity, ReachabilityProber};
use crate::replication::ReplicationControl;

/// Prober answering from a fixed reachability table
pub struct FakeProber {
    default_reachable: bool,
    overrides: Mutex<HashMap<Endpoint, bool>>,
}

impl FakeProber {
    pub fn all_reachable() -> Self {
        Self {
            default_reachable: true,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        self.overrides.lock().unwrap().insert(endpoint.clone(), reachable);
    }
}

#[async_trait::async_trait]
impl ReachabilityProber for FakeProber {
    async fn is_reachable(&self, endpoint: &Endpoint) -> bool {
        self.overrides
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_reachable)
    }
}

/// Directory whose every call fails
pub struct FailingDirectory;

#[async_trait::async_trait]
impl PeerDirectory for FailingDirectory {
    async fn upsert(&self, _identity: &NodeIdentity, _endpoint: &Endpoint) -> Result<()> {
        Err(Error::DirectoryUnavailable("injected failure".into()))
    }

    async fn remove(&self, _identity: &NodeIdentity, _endpoint: &Endpoint) -> Result<bool> {
        Err(Error::DirectoryUnavailable("injected failure".into()))
    }

    async fn list_all(&self) -> Result<Vec<DirectoryEntry>> {
        Err(Error::DirectoryUnavailable("injected failure".into()))
    }

    async fn get(&self, _identity: &NodeIdentity) -> Result<Option<Endpoint>> {
        Err(Error::DirectoryUnavailable("injected failure".into()))
    }
}

/// In-memory directory whose first `n` upserts fail
pub struct FlakyDirectory {
    inner: SqliteDirectory,
    upsert_failures: AtomicUsize,
}

impl FlakyDirectory {
    pub fn failing_upserts(n: usize) -> Self {
        Self {
            inner: SqliteDirectory::in_memory().unwrap(),
            upsert_failures: AtomicUsize::new(n),
        }
    }

    /// The backing directory, bypassing injected failures
    pub fn inner(&self) -> &SqliteDirectory {
        &self.inner
    }
}

#[async_trait::async_trait]
impl PeerDirectory for FlakyDirectory {
    async fn upsert(&self, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<()> {
        let failing = self
            .upsert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::DirectoryUnavailable("injected upsert failure".into()));
        }
        self.inner.upsert(identity, endpoint).await
    }

    async fn remove(&self, identity: &NodeIdentity, endpoint: &Endpoint) -> Result<bool> {
        self.inner.remove(identity, endpoint).await
    }

    async fn list_all(&self) -> Result<Vec<DirectoryEntry>> {
        self.inner.list_all().await
    }

    async fn get(&self, identity: &NodeIdentity) -> Result<Option<Endpoint>> {
        self.inner.get(identity).await
    }
}

/// A replication command observed by [`RecordingControl`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(Endpoint),
    Stop(Endpoint),
}

/// Replication control that records commands and fails on demand
#[derive(Default)]
pub struct RecordingControl {
    commands: Mutex<Vec<Command>>,
    failing: Mutex<HashSet<Endpoint>>,
}

impl RecordingControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command for `endpoint` fail until cleared
    pub fn fail_for(&self, endpoint: &Endpoint) {
        self.failing.lock().unwrap().insert(endpoint.clone());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl ReplicationControl for RecordingControl {
    async fn issue(&self, peer: &Endpoint, start: bool) -> bool {
        let command = if start {
            Command::Start(peer.clone())
        } else {
            Command::Stop(peer.clone())
        };
        self.commands.lock().unwrap().push(command);
        !self.failing.lock().unwrap().contains(peer)
    }
}
