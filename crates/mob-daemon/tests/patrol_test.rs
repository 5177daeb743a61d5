use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use mob_core::bead_store::BeadStore;
use mob_core::config::Config;
use mob_core::roster_store::RosterStore;
use mob_core::types::{AgentStatus, BeadType, RegistryRecord};
use mob_daemon::patrol::{AgentSpawner, AgentTerminator, PatrolRunner};
use mob_daemon::scheduler::MailboxDispatcher;
use mob_mailbox::Mailbox;
use mob_registry::Registry;

struct RecordingTerminator {
    killed: AtomicUsize,
}

impl RecordingTerminator {
    fn new() -> Self {
        Self { killed: AtomicUsize::new(0) }
    }
}

impl AgentTerminator for RecordingTerminator {
    fn kill(&self, _agent_id: &str, _pid: Option<u32>) {
        self.killed.fetch_add(1, Ordering::SeqCst);
    }
}

struct RecordingSpawner {
    spawned: Mutex<Vec<String>>,
    respawned: Mutex<Vec<(String, String)>>,
    poked: Mutex<Vec<String>>,
}

impl RecordingSpawner {
    fn new() -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            respawned: Mutex::new(Vec::new()),
            poked: Mutex::new(Vec::new()),
        }
    }
}

impl AgentSpawner for RecordingSpawner {
    fn spawn(&self, name: &str, _turf: Option<&str>) -> String {
        self.spawned.lock().unwrap().push(name.to_string());
        format!("spawned-{name}")
    }

    fn respawn(&self, agent_id: &str, name: &str) {
        self.respawned.lock().unwrap().push((agent_id.to_string(), name.to_string()));
    }

    fn poke(&self, name: &str, _message: &str) {
        self.poked.lock().unwrap().push(name.to_string());
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: Config,
    registry: Registry,
    roster: RosterStore,
    beads: BeadStore,
    dispatcher: MailboxDispatcher,
    terminator: Arc<RecordingTerminator>,
    spawner: Arc<RecordingSpawner>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        let roster = RosterStore::new(dir.path().join(".mob").join("soldati"));
        let beads = BeadStore::new(dir.path().join(".mob").join("beads"));
        let dispatcher = MailboxDispatcher::new(dir.path());
        Self {
            _dir: dir,
            config: Config::default(),
            registry,
            roster,
            beads,
            dispatcher,
            terminator: Arc::new(RecordingTerminator::new()),
            spawner: Arc::new(RecordingSpawner::new()),
        }
    }

    fn run(&self) -> mob_daemon::patrol::PatrolReport {
        let runner = PatrolRunner::new(
            &self.config,
            &self.registry,
            &self.roster,
            &self.beads,
            &self.dispatcher,
            self.terminator.as_ref(),
            self.spawner.as_ref(),
        );
        runner.run()
    }
}

#[test]
fn empty_mob_directory_yields_a_clean_report() {
    let fx = Fixture::new();
    let report = fx.run();
    assert_eq!(report.associates_nudged, 0);
    assert_eq!(report.associates_killed, 0);
    assert_eq!(report.associates_reaped, 0);
    assert_eq!(report.soldati_marked_stale, 0);
    assert_eq!(report.soldati_spawned, 0);
    assert_eq!(report.soldati_unregistered, 0);
    assert_eq!(report.beads_assigned, 0);
}

#[test]
fn idle_soldati_gets_the_top_ready_bead_in_its_turf() {
    let mut fx = Fixture::new();
    fx.config.associates.timeout = std::time::Duration::from_secs(600);
    fx.roster.register("vinnie").unwrap();

    let mut soldati = RegistryRecord::new_soldati("a1", "vinnie");
    soldati.turf = Some("backend".into());
    fx.registry.register(soldati).unwrap();

    let mut bead = fx.beads.create("fix the thing", "", BeadType::Task, false).unwrap();
    bead.turf = Some("backend".into());
    fx.beads.update(bead.clone()).unwrap();

    // A bead in a different turf should not be picked up.
    let mut other = fx.beads.create("unrelated", "", BeadType::Task, false).unwrap();
    other.turf = Some("frontend".into());
    fx.beads.update(other).unwrap();

    let report = fx.run();
    assert_eq!(report.beads_assigned, 1);

    let record = fx.registry.get("a1").unwrap();
    assert_eq!(record.status, AgentStatus::Working);
    assert_eq!(record.bead_id.as_deref(), Some(bead.id.as_str()));

    let updated_bead = fx.beads.get(&bead.id).unwrap();
    assert_eq!(updated_bead.assignee.as_deref(), Some("vinnie"));

    let hook = Mailbox::open(fx._dir.path(), "vinnie").unwrap().read().unwrap();
    assert_eq!(hook.bead_id.as_deref(), Some(bead.id.as_str()));
}

#[test]
fn working_soldati_is_not_handed_another_bead() {
    let fx = Fixture::new();
    fx.roster.register("vinnie").unwrap();
    let mut soldati = RegistryRecord::new_soldati("a1", "vinnie");
    soldati.status = AgentStatus::Working;
    fx.registry.register(soldati).unwrap();
    fx.beads.create("ready task", "", BeadType::Task, false).unwrap();

    let report = fx.run();
    assert_eq!(report.beads_assigned, 0);
}

#[test]
fn stuck_associate_is_nudged_once_then_killed_after_the_grace_period() {
    let mut fx = Fixture::new();
    fx.config.associates.timeout = std::time::Duration::from_secs(60);
    fx.config.associates.grace_period = std::time::Duration::from_secs(60);

    let mut associate = RegistryRecord::new_associate("assoc-1", "bd-001");
    associate.last_ping = Utc::now() - chrono::Duration::seconds(90);
    fx.registry.register(associate).unwrap();

    // Past timeout but within grace: nudged, not killed.
    let report = fx.run();
    assert_eq!(report.associates_nudged, 1);
    assert_eq!(report.associates_killed, 0);
    let record = fx.registry.get("assoc-1").unwrap();
    assert!(record.nudged_at.is_some());
    assert_eq!(record.status, mob_core::types::AgentStatus::Nudged);

    // A second sweep at the same elapsed time must not nudge again.
    let report = fx.run();
    assert_eq!(report.associates_nudged, 0);

    // Push last_ping back further so it's now past timeout + grace_period.
    fx.registry.update("assoc-1", |r| {
        r.last_ping = Utc::now() - chrono::Duration::seconds(200);
    }).unwrap();

    let report = fx.run();
    assert_eq!(report.associates_killed, 1);
    assert_eq!(fx.terminator.killed.load(Ordering::SeqCst), 1);
    let record = fx.registry.get("assoc-1").unwrap();
    assert_eq!(record.status, mob_core::types::AgentStatus::TimedOut);
    assert!(record.completed_at.is_some());
    assert!(record.nudged_at.is_none());
}

#[test]
fn terminal_associate_is_reaped_once_past_cleanup_ttl() {
    let mut fx = Fixture::new();
    fx.config.associates.cleanup_ttl = std::time::Duration::from_secs(60);

    let mut associate = RegistryRecord::new_associate("assoc-done", "bd-002");
    associate.status = mob_core::types::AgentStatus::Completed;
    associate.completed_at = Some(Utc::now() - chrono::Duration::seconds(300));
    fx.registry.register(associate).unwrap();

    let report = fx.run();
    assert_eq!(report.associates_reaped, 1);
    assert!(fx.registry.get("assoc-done").is_err());
}

#[test]
fn recently_completed_associate_is_not_yet_reaped() {
    let mut fx = Fixture::new();
    fx.config.associates.cleanup_ttl = std::time::Duration::from_secs(600);

    let mut associate = RegistryRecord::new_associate("assoc-done", "bd-002");
    associate.status = mob_core::types::AgentStatus::Completed;
    associate.completed_at = Some(Utc::now());
    fx.registry.register(associate).unwrap();

    let report = fx.run();
    assert_eq!(report.associates_reaped, 0);
    assert!(fx.registry.get("assoc-done").is_ok());
}

#[test]
fn stale_soldati_still_on_roster_is_killed_and_respawned() {
    let mut fx = Fixture::new();
    fx.config.daemon.stuck_timeout = std::time::Duration::from_secs(60);
    fx.roster.register("vinnie").unwrap();

    let mut soldati = RegistryRecord::new_soldati("a1", "vinnie");
    soldati.last_ping = Utc::now() - chrono::Duration::seconds(300);
    fx.registry.register(soldati).unwrap();

    let report = fx.run();
    assert_eq!(report.soldati_marked_stale, 1);
    assert_eq!(fx.terminator.killed.load(Ordering::SeqCst), 1);
    assert_eq!(
        fx.spawner.respawned.lock().unwrap().as_slice(),
        &[("a1".to_string(), "vinnie".to_string())]
    );

    let record = fx.registry.get("a1").unwrap();
    assert_eq!(record.status, AgentStatus::Idle);
    assert!(record.nudged_at.is_none());
}

#[test]
fn roster_name_with_no_live_record_gets_spawned() {
    let fx = Fixture::new();
    fx.roster.register("newguy").unwrap();

    let report = fx.run();
    assert_eq!(report.soldati_spawned, 1);
    assert_eq!(fx.spawner.spawned.lock().unwrap().as_slice(), &["newguy".to_string()]);

    let records = fx.registry.list().unwrap();
    assert!(records
        .iter()
        .any(|r| r.name == "newguy" && r.role == mob_core::types::AgentRole::Soldati));
}

#[test]
fn live_soldati_not_on_roster_is_unregistered() {
    let fx = Fixture::new();
    let soldati = RegistryRecord::new_soldati("a1", "ghost");
    fx.registry.register(soldati).unwrap();

    let report = fx.run();
    assert_eq!(report.soldati_unregistered, 1);
    assert_eq!(fx.terminator.killed.load(Ordering::SeqCst), 1);
    assert!(fx.registry.get("a1").is_err());
}
