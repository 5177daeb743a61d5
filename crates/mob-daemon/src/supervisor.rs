//! The long-running supervisor: owns the pidfile singleton guard and runs
//! the patrol sweep and the nudge sweep on independent timers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use mob_core::bead_store::BeadStore;
use mob_core::config::Config;
use mob_core::pidfile::SupervisorPidFile;
use mob_core::roster_store::RosterStore;
use mob_core::shutdown::ShutdownSignal;
use mob_core::turf_store::TurfStore;
use mob_registry::Registry;
use tracing::{error, info};

use crate::patrol::{AgentSpawner, AgentTerminator, PatrolRunner};
use crate::scheduler::MailboxDispatcher;
use crate::worker::DaemonSpawner;

/// A no-op terminator used when the binary entrypoint has no subprocess
/// table to consult (e.g. tests).
pub struct NullTerminator;

impl AgentTerminator for NullTerminator {
    fn kill(&self, agent_id: &str, pid: Option<u32>) {
        info!(agent_id, ?pid, "terminator invoked with no process table wired in");
    }
}

pub struct Supervisor {
    mob_dir: PathBuf,
    config: Config,
    shutdown: ShutdownSignal,
    registry: Registry,
    roster: RosterStore,
    beads: BeadStore,
    dispatcher: MailboxDispatcher,
    terminator: Arc<dyn AgentTerminator>,
    spawner: Arc<dyn AgentSpawner>,
}

impl Supervisor {
    pub fn new(mob_dir: impl Into<PathBuf>, config: Config) -> Self {
        let mob_dir = mob_dir.into();
        let spawner: Arc<dyn AgentSpawner> = Arc::new(DaemonSpawner::new(
            mob_dir.clone(),
            Arc::new(Registry::new(mob_dir.clone())),
            Arc::new(BeadStore::new(mob_dir.join(".mob").join("beads"))),
            Arc::new(TurfStore::new(mob_dir.clone())),
        ));
        Self {
            registry: Registry::new(mob_dir.clone()),
            roster: RosterStore::new(mob_dir.join(".mob").join("soldati")),
            beads: BeadStore::new(mob_dir.join(".mob").join("beads")),
            dispatcher: MailboxDispatcher::new(mob_dir.clone()),
            mob_dir,
            config,
            shutdown: ShutdownSignal::new(),
            terminator: Arc::new(NullTerminator),
            spawner,
        }
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn AgentTerminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn AgentSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Acquire the singleton pidfile, refusing to start if another
    /// supervisor is already running against the same mob directory.
    pub fn acquire_pidfile(&self) -> Result<()> {
        SupervisorPidFile::acquire_or_fail(&self.mob_dir)
            .map_err(|msg| anyhow::anyhow!(msg))
            .context("failed to acquire supervisor pidfile")
    }

    /// Run the patrol and nudge-sweep timers until shutdown is triggered.
    /// Associate-timeout enforcement lives inside the patrol arm, not as a
    /// third independent timer, so a single stuck associate can only ever
    /// be caught on a patrol boundary.
    pub async fn run(&self) -> Result<()> {
        let mut patrol_interval = tokio::time::interval(self.config.daemon.heartbeat_interval);
        let mut nudge_interval = tokio::time::interval(self.config.daemon.boot_check_interval);
        patrol_interval.tick().await;
        nudge_interval.tick().await;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = patrol_interval.tick() => {
                    let runner = PatrolRunner::new(
                        &self.config,
                        &self.registry,
                        &self.roster,
                        &self.beads,
                        &self.dispatcher,
                        self.terminator.as_ref(),
                        self.spawner.as_ref(),
                    );
                    let report = runner.run();
                    info!(
                        nudged = report.associates_nudged,
                        killed = report.associates_killed,
                        reaped = report.associates_reaped,
                        stale_soldati = report.soldati_marked_stale,
                        spawned = report.soldati_spawned,
                        unregistered = report.soldati_unregistered,
                        assigned = report.beads_assigned,
                        "patrol completed"
                    );
                }
                _ = nudge_interval.tick() => {
                    if let Err(e) = self.boot_check() {
                        error!(error = %e, "boot check failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown_sequence();
        Ok(())
    }

    /// A lighter secondary sweep: flag registry records with no roster
    /// entry, and poke every soldati that is either busy or sitting on an
    /// unconsumed mailbox message with a plain "Do your job." nudge.
    fn boot_check(&self) -> Result<()> {
        let records = self.registry.list().context("listing registry")?;
        let roster = self.roster.list().context("listing roster")?;
        let known_names: std::collections::HashSet<_> =
            roster.iter().map(|r| r.name.as_str()).collect();

        for record in records
            .iter()
            .filter(|r| r.role == mob_core::types::AgentRole::Soldati)
        {
            if !known_names.contains(record.name.as_str()) {
                tracing::warn!(agent_id = %record.id, name = %record.name, "live soldati has no roster entry");
            }
        }

        for record in records
            .iter()
            .filter(|r| r.role == mob_core::types::AgentRole::Soldati)
        {
            let busy = record.status != mob_core::types::AgentStatus::Idle;
            let has_mail = mob_mailbox::Mailbox::open(&self.mob_dir, &record.name)
                .ok()
                .and_then(|m| m.read())
                .is_some();
            if busy || has_mail {
                self.spawner.poke(&record.name, "Do your job.");
            }
        }
        Ok(())
    }

    /// Cancel mailbox watchers, stop agent processes, unregister soldati,
    /// and drop the pidfile.
    fn shutdown_sequence(&self) {
        if let Ok(records) = self.registry.list() {
            for record in records {
                if record.role == mob_core::types::AgentRole::Soldati {
                    self.terminator.kill(&record.id, record.pid);
                    let _ = self.registry.unregister(&record.id);
                }
            }
        }
        let _ = SupervisorPidFile::remove(&self.mob_dir);
        info!("supervisor shutdown sequence complete");
    }
}
