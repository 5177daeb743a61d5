//! Per-soldati background worker: watches one mailbox, drives the Agent
//! Runner on `assign`, and carries a completed bead through the merge
//! queue to its final status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use mob_core::bead_store::BeadStore;
use mob_core::merge_queue::{MergeOutcome, MergeQueue};
use mob_core::turf_store::TurfStore;
use mob_core::types::{AgentStatus, Bead, BeadStatus, HookType};
use mob_core::worktree_manager::WorktreeManager;
use mob_mailbox::{Mailbox, MailboxError};
use mob_registry::Registry;
use mob_runner::Runner;
use tracing::{info, warn};

use crate::patrol::AgentSpawner;

/// One soldati's worker: a mailbox watch loop plus the Agent Runner
/// conversation driving it.
pub struct AgentWorker {
    agent_id: String,
    name: String,
    mob_dir: PathBuf,
    registry: Arc<Registry>,
    beads: Arc<BeadStore>,
    turfs: Arc<TurfStore>,
    runner: Runner,
}

impl AgentWorker {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        mob_dir: PathBuf,
        registry: Arc<Registry>,
        beads: Arc<BeadStore>,
        turfs: Arc<TurfStore>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            mob_dir,
            registry,
            beads,
            turfs,
            runner: Runner::new(),
        }
    }

    /// Start the blocking mailbox watch on its own thread, bridging each
    /// `assign` hook onto the calling tokio runtime.
    pub fn spawn_watch_loop(self: Arc<Self>) -> Result<crossbeam_channel::Sender<()>, MailboxError> {
        let mailbox = Mailbox::open(&self.mob_dir, &self.name)?;
        let (rx, cancel) = mailbox.watch()?;
        let handle = tokio::runtime::Handle::current();
        let worker = self;

        std::thread::spawn(move || {
            while let Ok(hook) = rx.recv() {
                if hook.hook_type != HookType::Assign {
                    continue;
                }
                let Some(bead_id) = hook.bead_id.clone() else { continue };
                let message = hook.message.clone();
                handle.block_on(worker.handle_assign(&bead_id, message.as_deref()));
                if let Ok(mailbox) = Mailbox::open(&worker.mob_dir, &worker.name) {
                    let _ = mailbox.clear();
                }
            }
        });

        Ok(cancel)
    }

    /// Drive the Runner with free-form text outside the assign flow (the
    /// boot-check nudge sweep).
    pub async fn poke(&self, message: &str) {
        match self.runner.run_turn(message, None, None, None).await {
            Ok(_) => info!(agent = %self.name, "nudge turn completed"),
            Err(e) => warn!(agent = %self.name, error = %e, "nudge turn failed"),
        }
    }

    async fn handle_assign(&self, bead_id: &str, message: Option<&str>) {
        let prompt = match message {
            Some(m) => format!("[Bead {bead_id}] {m}"),
            None => format!("[Bead {bead_id}]"),
        };

        match self.runner.run_turn(&prompt, None, None, None).await {
            Ok(turn) => {
                info!(agent = %self.name, bead_id, duration_ms = ?turn.duration_ms, "turn completed");
                self.complete_bead(bead_id).await;
            }
            Err(e) => {
                warn!(agent = %self.name, bead_id, error = %e, "turn failed");
                self.fail_bead(bead_id, &e.to_string());
            }
        }

        let _ = self.registry.update(&self.agent_id, |r| {
            r.status = AgentStatus::Idle;
            r.bead_id = None;
        });
    }

    /// Carry a completed bead through the merge queue to its final status:
    /// closed on success, re-opened blocked with a machine `close_reason`
    /// on conflict or failure.
    async fn complete_bead(&self, bead_id: &str) {
        let bead = match self.beads.get(bead_id) {
            Ok(b) => b,
            Err(e) => {
                warn!(bead_id, error = %e, "bead vanished before merge");
                return;
            }
        };
        let Some(turf_name) = bead.turf.clone() else {
            warn!(bead_id, "bead has no turf, cannot merge");
            return;
        };
        let turf = match self.turfs.get(&turf_name) {
            Ok(t) => t,
            Err(e) => {
                warn!(bead_id, turf = %turf_name, error = %e, "unknown turf, cannot merge");
                return;
            }
        };

        let mut queue = MergeQueue::new(turf.path.clone(), turf.main_branch.clone());
        if let Err(e) = queue.add(bead_id, bead.branch.clone(), Vec::new()) {
            warn!(bead_id, error = %e, "could not enqueue merge");
            return;
        }

        match queue.process() {
            Ok(Some((_, MergeOutcome::Success { .. }))) => {
                let worktree = WorktreeManager::new(turf);
                let _ = worktree.remove(bead_id, true);
                let mut bead = bead;
                bead.status = BeadStatus::Closed;
                bead.close_reason = Some("completed".into());
                let _ = self.beads.update(bead);
            }
            Ok(Some((_, MergeOutcome::Conflict { conflict_files }))) => {
                self.reopen_blocked(bead, format!("merge failed: conflict in {}", conflict_files.join(", ")));
            }
            Ok(Some((_, MergeOutcome::Failed { message }))) => {
                self.reopen_blocked(bead, format!("merge failed: {message}"));
            }
            Ok(None) => {}
            Err(e) => {
                self.reopen_blocked(bead, format!("merge failed: {e}"));
            }
        }
    }

    fn reopen_blocked(&self, mut bead: Bead, reason: String) {
        bead.status = BeadStatus::Blocked;
        bead.close_reason = Some(reason);
        let _ = self.beads.update(bead);
    }

    fn fail_bead(&self, bead_id: &str, reason: &str) {
        if let Ok(mut bead) = self.beads.get(bead_id) {
            bead.status = BeadStatus::Blocked;
            bead.close_reason = Some(format!("agent failure: {reason}"));
            let _ = self.beads.update(bead);
        }
    }
}

/// The daemon's [`AgentSpawner`]: owns a live [`AgentWorker`] per soldati
/// name and starts/restarts their watch loops on spawn and respawn.
pub struct DaemonSpawner {
    mob_dir: PathBuf,
    registry: Arc<Registry>,
    beads: Arc<BeadStore>,
    turfs: Arc<TurfStore>,
    workers: Mutex<HashMap<String, (Arc<AgentWorker>, Option<crossbeam_channel::Sender<()>>)>>,
}

impl DaemonSpawner {
    pub fn new(mob_dir: PathBuf, registry: Arc<Registry>, beads: Arc<BeadStore>, turfs: Arc<TurfStore>) -> Self {
        Self {
            mob_dir,
            registry,
            beads,
            turfs,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn ensure_worker(&self, agent_id: &str, name: &str) -> Arc<AgentWorker> {
        let worker = Arc::new(AgentWorker::new(
            agent_id.to_string(),
            name.to_string(),
            self.mob_dir.clone(),
            self.registry.clone(),
            self.beads.clone(),
            self.turfs.clone(),
        ));

        let cancel = match worker.clone().spawn_watch_loop() {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(name, error = %e, "failed to start mailbox watch loop");
                None
            }
        };

        let mut workers = self.workers.lock().unwrap();
        if let Some((_, old_cancel)) = workers.insert(name.to_string(), (worker.clone(), cancel)) {
            if let Some(old_cancel) = old_cancel {
                let _ = old_cancel.send(());
            }
        }
        worker
    }
}

impl AgentSpawner for DaemonSpawner {
    fn spawn(&self, name: &str, _turf: Option<&str>) -> String {
        let id = mob_registry::generate_agent_id();
        self.ensure_worker(&id, name);
        id
    }

    fn respawn(&self, agent_id: &str, name: &str) {
        self.ensure_worker(agent_id, name);
    }

    fn poke(&self, name: &str, message: &str) {
        let worker = {
            let workers = self.workers.lock().unwrap();
            workers.get(name).map(|(w, _)| w.clone())
        };
        let Some(worker) = worker else {
            warn!(name, "poke requested for an agent with no live worker");
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(name, "poke requested outside a tokio runtime");
            return;
        };
        let message = message.to_string();
        handle.spawn(async move {
            worker.poke(&message).await;
        });
    }
}
