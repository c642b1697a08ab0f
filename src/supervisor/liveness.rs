//! Liveness Supervisor
//!
//! The node's single control loop. Every tick it first checks that the
//! supervised processes are still alive, then resolves membership and
//! reconciles replication links. A dead process recycles the node: the loop
//! stops, the node deregisters and kills its remaining children, and the
//! host exits with [`RECYCLE_EXIT_CODE`] so the platform restarts it.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{StatusBoard, SupervisedChild, SupervisorState};
use crate::directory::PeerDirectory;
use crate::error::{Error, Result};
use crate::membership::{Endpoint, MembershipResolver, NodeIdentity, ReachabilityProber};
use crate::replication::{ReplicationControl, ReplicationSet, TickReport};

/// Exit code asking the service manager for a full node restart
pub const RECYCLE_EXIT_CODE: i32 = 75;

/// How long each child gets to exit after being killed at shutdown
const CHILD_KILL_GRACE: Duration = Duration::from_secs(2);

/// Why the supervisor loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Shutdown was requested
    Shutdown,
    /// The node must be restarted
    Recycle { reason: String },
}

/// Node supervisor driving liveness checks and reconcile ticks
pub struct LivenessSupervisor {
    identity: NodeIdentity,
    endpoint: Endpoint,
    directory: Arc<dyn PeerDirectory>,
    resolver: MembershipResolver,
    replication: ReplicationSet,
    children: Vec<SupervisedChild>,
    /// Whether our directory entry has been written
    registered: bool,
    tick_interval: Duration,
    status: StatusBoard,
}

impl LivenessSupervisor {
    pub fn new(
        identity: NodeIdentity,
        endpoint: Endpoint,
        directory: Arc<dyn PeerDirectory>,
        prober: Arc<dyn ReachabilityProber>,
        control: Arc<dyn ReplicationControl>,
        tick_interval: Duration,
        status: StatusBoard,
    ) -> Self {
        let resolver = MembershipResolver::new(
            identity.clone(),
            endpoint.clone(),
            Arc::clone(&directory),
            prober,
        );

        Self {
            identity,
            endpoint,
            directory,
            resolver,
            replication: ReplicationSet::new(control),
            children: Vec::new(),
            registered: false,
            tick_interval,
            status,
        }
    }

    /// Put a child process under supervision
    pub fn supervise(&mut self, child: SupervisedChild) {
        tracing::info!("Supervising {} (pid {:?})", child.name(), child.pid());
        self.children.push(child);
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn active_links(&self) -> &std::collections::BTreeSet<Endpoint> {
        self.replication.links()
    }

    /// Publish this node's endpoint in the peer directory.
    /// Until this succeeds every tick retries it first.
    pub async fn register(&mut self) -> Result<()> {
        self.directory.upsert(&self.identity, &self.endpoint).await?;
        self.registered = true;
        tracing::info!("Registered {} at {} in peer directory", self.identity, self.endpoint);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Fail if any supervised child has exited
    pub fn check_children(&mut self) -> Result<()> {
        for child in &mut self.children {
            if let Some(status) = child.exit_status()? {
                return Err(Error::ChildProcessExited {
                    name: child.name().to_string(),
                    status: status.to_string(),
                });
            }
        }
        Ok(())
    }

    /// One supervisor tick: liveness check, then resolve and reconcile
    pub async fn tick(&mut self) -> Result<TickReport> {
        self.check_children()?;

        if !self.registered {
            self.register().await?;
        }

        let resolved = self.resolver.resolve().await?;
        tracing::debug!(
            "Reachable peers: {}",
            if resolved.is_empty() {
                "none".to_string()
            } else {
                resolved.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
            }
        );

        let report = self.replication.apply(&resolved).await;
        let links = self.replication.links().iter().cloned().collect();
        self.status.record_tick(links, report.clone()).await;
        Ok(report)
    }

    /// Run until shutdown is requested or the node must be recycled.
    /// Cleanup (deregistration, killing children) runs before returning.
    pub async fn run(&mut self, shutdown: CancellationToken) -> SupervisorOutcome {
        self.status.set_state(SupervisorState::Running).await;
        tracing::info!("Supervisor running, tick interval {:?}", self.tick_interval);

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; wait a full interval first
        interval.tick().await;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break SupervisorOutcome::Shutdown;
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(report) => {
                    if report.commands_issued() > 0 {
                        tracing::info!(
                            "Tick: started {}, stopped {}, failed {}",
                            report.started.len(),
                            report.stopped.len(),
                            report.failed_starts.len() + report.failed_stops.len()
                        );
                    }
                }
                Err(e) if e.requires_recycle() => {
                    tracing::error!("{}. Recycling node.", e);
                    break SupervisorOutcome::Recycle { reason: e.to_string() };
                }
                Err(e) => {
                    tracing::warn!("Reconcile tick skipped: {}", e);
                    self.status.record_error(&e).await;
                }
            }
        };

        let state = match outcome {
            SupervisorOutcome::Shutdown => SupervisorState::Stopping,
            SupervisorOutcome::Recycle { .. } => SupervisorState::Recycling,
        };
        self.status.set_state(state).await;
        self.shutdown().await;
        outcome
    }

    /// Best-effort deregistration and child termination. Never fails.
    pub async fn shutdown(&mut self) {
        match self.directory.remove(&self.identity, &self.endpoint).await {
            Ok(true) => tracing::info!("Removed {} from peer directory", self.identity),
            Ok(false) => tracing::warn!("No directory entry for {} at {}", self.identity, self.endpoint),
            Err(e) => tracing::warn!("Failed to remove directory entry: {}", e),
        }

        // Web tier first, then the data engine
        for child in self.children.iter_mut().rev() {
            if let Err(e) = child.terminate(CHILD_KILL_GRACE).await {
                tracing::warn!("Failed to terminate {}: {}", child.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::directory::SqliteDirectory;
    #[cfg(unix)]
    use crate::config::ProcessConfig;
    #[cfg(unix)]
    use crate::supervisor::LaunchVars;
    use crate::testing::{Command, FailingDirectory, FakeProber, FlakyDirectory, RecordingControl};

    fn id(s: &str) -> NodeIdentity {
        NodeIdentity::new(s).unwrap()
    }

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    struct Harness {
        supervisor: LivenessSupervisor,
        directory: Arc<SqliteDirectory>,
        prober: Arc<FakeProber>,
        control: Arc<RecordingControl>,
    }

    async fn harness(tick_interval: Duration) -> Harness {
        let directory = Arc::new(SqliteDirectory::in_memory().unwrap());
        directory.upsert(&id("B"), &ep("1.2.3.5:5984")).await.unwrap();
        let prober = Arc::new(FakeProber::all_reachable());
        let control = Arc::new(RecordingControl::new());

        let mut supervisor = LivenessSupervisor::new(
            id("A"),
            ep("1.2.3.4:5984"),
            directory.clone(),
            prober.clone(),
            control.clone(),
            tick_interval,
            StatusBoard::new(id("A"), ep("1.2.3.4:5984")),
        );
        supervisor.register().await.unwrap();

        Harness {
            supervisor,
            directory,
            prober,
            control,
        }
    }

    #[tokio::test]
    async fn test_tick_follows_membership() {
        let mut h = harness(Duration::from_secs(10)).await;
        let b = ep("1.2.3.5:5984");

        h.supervisor.tick().await.unwrap();
        assert_eq!(h.control.take_commands(), vec![Command::Start(b.clone())]);
        assert_eq!(h.supervisor.active_links(), &BTreeSet::from([b.clone()]));

        h.prober.set_reachable(&b, false);
        h.supervisor.tick().await.unwrap();
        assert_eq!(h.control.take_commands(), vec![Command::Stop(b.clone())]);
        assert!(h.supervisor.active_links().is_empty());

        let status = h.supervisor.status().snapshot().await;
        assert_eq!(status.ticks, 2);
        assert!(status.active_links.is_empty());
    }

    #[tokio::test]
    async fn test_failed_stop_survives_tick() {
        let mut h = harness(Duration::from_secs(10)).await;
        let b = ep("1.2.3.5:5984");

        h.supervisor.tick().await.unwrap();
        h.prober.set_reachable(&b, false);
        h.control.fail_for(&b);

        let report = h.supervisor.tick().await.unwrap();
        assert_eq!(report.failed_stops, vec![b.clone()]);
        assert!(h.supervisor.active_links().contains(&b));
    }

    #[tokio::test]
    async fn test_directory_failure_skips_tick() {
        let mut supervisor = LivenessSupervisor::new(
            id("A"),
            ep("1.2.3.4:5984"),
            Arc::new(FailingDirectory),
            Arc::new(FakeProber::all_reachable()),
            Arc::new(RecordingControl::new()),
            Duration::from_secs(10),
            StatusBoard::new(id("A"), ep("1.2.3.4:5984")),
        );

        let err = supervisor.tick().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.requires_recycle());
    }

    #[tokio::test]
    async fn test_shutdown_deregisters() {
        let mut h = harness(Duration::from_millis(20)).await;
        let token = CancellationToken::new();
        token.cancel();

        let outcome = h.supervisor.run(token).await;

        assert_eq!(outcome, SupervisorOutcome::Shutdown);
        assert!(h.directory.get(&id("A")).await.unwrap().is_none());
        assert!(h.directory.get(&id("B")).await.unwrap().is_some());
        let status = h.supervisor.status().snapshot().await;
        assert_eq!(status.state, SupervisorState::Stopping);
    }

    #[tokio::test]
    async fn test_registration_retried_on_tick() {
        let directory = Arc::new(FlakyDirectory::failing_upserts(1));
        directory.inner().upsert(&id("B"), &ep("1.2.3.5:5984")).await.unwrap();
        let control = Arc::new(RecordingControl::new());

        let mut supervisor = LivenessSupervisor::new(
            id("A"),
            ep("1.2.3.4:5984"),
            directory.clone(),
            Arc::new(FakeProber::all_reachable()),
            control.clone(),
            Duration::from_secs(10),
            StatusBoard::new(id("A"), ep("1.2.3.4:5984")),
        );

        let err = supervisor.register().await.unwrap_err();
        assert!(!err.requires_recycle());
        assert!(!supervisor.is_registered());

        supervisor.tick().await.unwrap();
        assert!(supervisor.is_registered());
        assert_eq!(
            directory.inner().get(&id("A")).await.unwrap(),
            Some(ep("1.2.3.4:5984"))
        );
        assert_eq!(control.commands(), vec![Command::Start(ep("1.2.3.5:5984"))]);
    }

    #[tokio::test]
    async fn test_failed_registration_skips_tick() {
        let directory = Arc::new(FlakyDirectory::failing_upserts(2));
        let control = Arc::new(RecordingControl::new());
        let mut supervisor = LivenessSupervisor::new(
            id("A"),
            ep("1.2.3.4:5984"),
            directory,
            Arc::new(FakeProber::all_reachable()),
            control.clone(),
            Duration::from_secs(10),
            StatusBoard::new(id("A"), ep("1.2.3.4:5984")),
        );

        assert!(supervisor.register().await.is_err());
        let err = supervisor.tick().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!supervisor.is_registered());
        assert!(control.commands().is_empty());

        supervisor.tick().await.unwrap();
        assert!(supervisor.is_registered());
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ProcessConfig {
        ProcessConfig {
            command: std::path::PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: None,
            env: std::collections::BTreeMap::new(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_completes_when_deregistration_fails() {
        let mut supervisor = LivenessSupervisor::new(
            id("A"),
            ep("1.2.3.4:5984"),
            Arc::new(FailingDirectory),
            Arc::new(FakeProber::all_reachable()),
            Arc::new(RecordingControl::new()),
            Duration::from_millis(20),
            StatusBoard::new(id("A"), ep("1.2.3.4:5984")),
        );
        supervisor.supervise(SupervisedChild::spawn("couchdb", &shell("sleep 30"), &LaunchVars::default()).unwrap());

        let token = CancellationToken::new();
        token.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor.run(token))
            .await
            .unwrap();

        assert_eq!(outcome, SupervisorOutcome::Shutdown);
        assert!(supervisor.children[0].exit_status().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exit_recycles_node() {
        let mut h = harness(Duration::from_millis(20)).await;
        h.supervisor
            .supervise(SupervisedChild::spawn("couchdb", &shell("exit 1"), &LaunchVars::default()).unwrap());

        let outcome = tokio::time::timeout(Duration::from_secs(5), h.supervisor.run(CancellationToken::new()))
            .await
            .unwrap();

        match outcome {
            SupervisorOutcome::Recycle { reason } => assert!(reason.contains("couchdb")),
            other => panic!("expected recycle, got {:?}", other),
        }
        assert!(h.directory.get(&id("A")).await.unwrap().is_none());
        let status = h.supervisor.status().snapshot().await;
        assert_eq!(status.state, SupervisorState::Recycling);
    }
}
