//! The patrol sweep: associate discipline, roster reconciliation, and
//! auto-assignment of ready beads to idle soldati. Runs on `DaemonConfig`'s
//! `heartbeat_interval`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mob_core::bead_store::BeadStore;
use mob_core::config::Config;
use mob_core::roster_store::RosterStore;
use mob_core::types::{AgentRole, AgentStatus, BeadStatus, RegistryRecord};
use mob_registry::Registry;
use tracing::{debug, info, warn};

use crate::heartbeat::find_stale;
use crate::scheduler::MailboxDispatcher;

/// Summary of one patrol sweep, logged by the supervisor's run loop.
#[derive(Debug, Clone, Default)]
pub struct PatrolReport {
    pub associates_nudged: usize,
    pub associates_killed: usize,
    pub associates_reaped: usize,
    pub soldati_marked_stale: usize,
    pub soldati_spawned: usize,
    pub soldati_unregistered: usize,
    pub beads_assigned: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Terminates an agent process; wired in by the binary entrypoint since
/// the patrol sweep has no direct handle on subprocess lifecycles.
pub trait AgentTerminator: Send + Sync {
    fn kill(&self, agent_id: &str, pid: Option<u32>);
}

/// Starts or refreshes a soldati's background worker; wired in by the
/// binary entrypoint, mirroring [`AgentTerminator`].
pub trait AgentSpawner: Send + Sync {
    /// Start a worker for a roster name with no live registry record,
    /// returning the new record's id.
    fn spawn(&self, name: &str, turf: Option<&str>) -> String;
    /// Re-establish a worker for an existing registry id whose previous
    /// worker has gone stale.
    fn respawn(&self, agent_id: &str, name: &str);
    /// Drive a worker with free-form text outside the normal assign flow.
    fn poke(&self, name: &str, message: &str);
}

pub struct PatrolRunner<'a> {
    config: &'a Config,
    registry: &'a Registry,
    roster: &'a RosterStore,
    beads: &'a BeadStore,
    dispatcher: &'a MailboxDispatcher,
    terminator: &'a dyn AgentTerminator,
    spawner: &'a dyn AgentSpawner,
}

impl<'a> PatrolRunner<'a> {
    pub fn new(
        config: &'a Config,
        registry: &'a Registry,
        roster: &'a RosterStore,
        beads: &'a BeadStore,
        dispatcher: &'a MailboxDispatcher,
        terminator: &'a dyn AgentTerminator,
        spawner: &'a dyn AgentSpawner,
    ) -> Self {
        Self {
            config,
            registry,
            roster,
            beads,
            dispatcher,
            terminator,
            spawner,
        }
    }

    pub fn run(&self) -> PatrolReport {
        let mut report = PatrolReport {
            timestamp: Some(Utc::now()),
            ..Default::default()
        };

        self.associate_discipline(&mut report);
        self.roster_reconciliation(&mut report);
        self.auto_assign(&mut report);

        debug!(
            nudged = report.associates_nudged,
            killed = report.associates_killed,
            reaped = report.associates_reaped,
            stale_soldati = report.soldati_marked_stale,
            spawned = report.soldati_spawned,
            unregistered = report.soldati_unregistered,
            assigned = report.beads_assigned,
            "patrol sweep completed"
        );
        report
    }

    /// Nudge associates stuck past the configured timeout; kill ones that
    /// are still stuck after the grace period elapses on top of that.
    /// Reap terminal associates once they've aged past `cleanup_ttl`.
    fn associate_discipline(&self, report: &mut PatrolReport) {
        let records = match self.registry.list() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list registry during associate discipline");
                return;
            }
        };

        let now = Utc::now();
        for record in records.iter().filter(|r| r.role == AgentRole::Associate) {
            if record.status.is_terminal() {
                if let Some(completed_at) = record.completed_at {
                    let age = now.signed_duration_since(completed_at);
                    if age > chrono::Duration::from_std(self.config.associates.cleanup_ttl).unwrap_or_default() {
                        if self.registry.unregister(&record.id).is_ok() {
                            report.associates_reaped += 1;
                        }
                    }
                }
                continue;
            }

            let elapsed = now
                .signed_duration_since(record.last_ping)
                .to_std()
                .unwrap_or_default();
            if elapsed <= self.config.associates.timeout {
                continue;
            }

            let past_grace = elapsed
                > self.config.associates.timeout + self.config.associates.grace_period;
            if past_grace {
                self.terminator.kill(&record.id, record.pid);
                let _ = self.registry.update(&record.id, |r| {
                    r.status = AgentStatus::TimedOut;
                    r.completed_at = Some(now);
                    r.nudged_at = None;
                });
                report.associates_killed += 1;
            } else if record.nudged_at.is_none() {
                if let Some(bead_id) = &record.bead_id {
                    let worker = &record.id;
                    if self.dispatcher.nudge(worker, None).is_ok() {
                        let _ = self.registry.update(&record.id, |r| {
                            r.status = AgentStatus::Nudged;
                            r.nudged_at = Some(now);
                        });
                        report.associates_nudged += 1;
                    }
                    debug!(bead_id, "nudged stuck associate");
                }
            }
        }
    }

    /// Reconcile the roster against the live registry: spawn a worker for
    /// any roster name with no live soldati record, unregister soldati
    /// records whose name has left the roster, and respawn (keeping the
    /// same registry id) ones that have gone stale while still rostered.
    fn roster_reconciliation(&self, report: &mut PatrolReport) {
        let records = match self.registry.list() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list registry during roster reconciliation");
                return;
            }
        };
        let roster = match self.roster.list() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list roster during reconciliation");
                return;
            }
        };

        let soldati: Vec<&RegistryRecord> = records.iter().filter(|r| r.role == AgentRole::Soldati).collect();
        let roster_names: HashSet<&str> = roster.iter().map(|e| e.name.as_str()).collect();

        for entry in &roster {
            if soldati.iter().any(|r| r.name == entry.name) {
                continue;
            }
            let id = self.spawner.spawn(&entry.name, entry.primary_turf.as_deref());
            let mut record = RegistryRecord::new_soldati(id, entry.name.clone());
            record.turf = entry.primary_turf.clone();
            if self.registry.register(record).is_ok() {
                info!(name = %entry.name, "spawned soldati missing from the roster");
                report.soldati_spawned += 1;
            }
        }

        for record in &soldati {
            if roster_names.contains(record.name.as_str()) {
                continue;
            }
            self.terminator.kill(&record.id, record.pid);
            if self.registry.unregister(&record.id).is_ok() {
                warn!(agent_id = %record.id, name = %record.name, "unregistered soldati no longer on the roster");
                report.soldati_unregistered += 1;
            }
        }

        let stale = find_stale(
            &records,
            self.config.daemon.stuck_timeout,
            self.config.associates.timeout,
        );
        for agent in stale.into_iter().filter(|a| a.role == AgentRole::Soldati) {
            let Some(record) = soldati.iter().find(|r| r.id == agent.id) else {
                continue;
            };
            if !roster_names.contains(record.name.as_str()) {
                continue;
            }
            self.terminator.kill(&agent.id, record.pid);
            self.spawner.respawn(&agent.id, &record.name);
            let respawned = self.registry.update(&agent.id, |r| {
                r.status = AgentStatus::Idle;
                r.last_ping = Utc::now();
                r.nudged_at = None;
            });
            if respawned.is_ok() {
                warn!(agent_id = %agent.id, elapsed_secs = agent.elapsed.as_secs(), "stale soldati respawned");
                report.soldati_marked_stale += 1;
            }
        }
    }

    /// Hand the highest-priority ready bead in a soldati's turf to that
    /// soldati if it is idle.
    fn auto_assign(&self, report: &mut PatrolReport) {
        let records = match self.registry.list() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list registry during auto-assignment");
                return;
            }
        };

        for record in records
            .iter()
            .filter(|r| r.role == AgentRole::Soldati && r.status == AgentStatus::Idle)
        {
            let ready = match self.beads.list_ready(record.turf.as_deref()) {
                Ok(beads) => beads,
                Err(e) => {
                    warn!(error = %e, "failed to list ready beads");
                    continue;
                }
            };
            let Some(bead) = ready.into_iter().next() else {
                continue;
            };

            if self.dispatcher.assign(&record.name, &bead.id).is_err() {
                continue;
            }

            let mut bead = bead;
            bead.status = BeadStatus::InProgress;
            bead.assignee = Some(record.name.clone());
            if self.beads.update(bead.clone()).is_ok() {
                let _ = self.registry.update(&record.id, |r| {
                    r.status = AgentStatus::Working;
                    r.bead_id = Some(bead.id.clone());
                });
                info!(worker = %record.name, bead_id = %bead.id, "auto-assigned ready bead");
                report.beads_assigned += 1;
            }
        }
    }
}
