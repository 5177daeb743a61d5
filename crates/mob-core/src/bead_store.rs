//! Durable store of beads: one JSON file per bead under `beads/<id>.json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::RngCore;
use thiserror::Error;

use crate::types::{Bead, BeadHistoryEntry, BeadStatus, BeadType};

#[derive(Debug, Error)]
pub enum BeadStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BeadStoreError>;

#[derive(Debug, Default, Clone)]
pub struct BeadFilter {
    pub status: Option<BeadStatus>,
    pub turf: Option<String>,
    pub assignee: Option<String>,
    pub bead_type: Option<BeadType>,
}

pub struct BeadStore {
    root: PathBuf,
}

impl BeadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn archive_path_for(&self, id: &str) -> PathBuf {
        self.root.join("archive").join(format!("{id}.json"))
    }

    fn write_atomic(&self, path: &Path, bead: &Bead) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(bead)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn create(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        bead_type: BeadType,
        pending_approval: bool,
    ) -> Result<Bead> {
        let id = generate_id();
        let now = Utc::now();
        let status = if pending_approval {
            BeadStatus::PendingApproval
        } else {
            BeadStatus::Open
        };
        let bead = Bead {
            id: id.clone(),
            title: title.into(),
            description: description.into(),
            bead_type,
            priority: 2,
            status,
            assignee: None,
            labels: Vec::new(),
            parent: None,
            blocks: Vec::new(),
            related: Vec::new(),
            turf: None,
            worktree_path: None,
            branch: Bead::branch_for(&id),
            close_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            history: Vec::new(),
        };
        self.write_atomic(&self.path_for(&id), &bead)?;
        Ok(bead)
    }

    pub fn get(&self, id: &str) -> Result<Bead> {
        let text = std::fs::read_to_string(self.path_for(id))
            .map_err(|_| BeadStoreError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn update(&self, mut bead: Bead) -> Result<Bead> {
        let path = self.path_for(&bead.id);
        if !path.exists() {
            return Err(BeadStoreError::NotFound(bead.id));
        }
        bead.updated_at = Utc::now();
        self.write_atomic(&path, &bead)?;
        if bead.status == BeadStatus::Closed {
            if let Ok(text) = std::fs::read_to_string(&path) {
                let _ = std::fs::write(self.archive_path_for(&bead.id), text);
            }
        }
        Ok(bead)
    }

    pub fn add_comment(&self, id: &str, actor: impl Into<String>, text: impl Into<String>) -> Result<Bead> {
        let mut bead = self.get(id)?;
        bead.history.push(BeadHistoryEntry {
            actor: actor.into(),
            timestamp: Utc::now(),
            comment: text.into(),
        });
        self.update(bead)
    }

    pub fn list(&self, filter: &BeadFilter) -> Result<Vec<Bead>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            let Ok(bead) = serde_json::from_str::<Bead>(&text) else {
                continue;
            };
            if matches(&bead, filter) {
                out.push(bead);
            }
        }
        Ok(out)
    }

    /// Beads that are open and whose every blocker is closed. Unknown
    /// blocker IDs count as blocking. Sorted by priority, then created_at,
    /// then lexicographically by ID.
    pub fn list_ready(&self, turf: Option<&str>) -> Result<Vec<Bead>> {
        let all = self.list(&BeadFilter::default())?;
        let closed: HashSet<String> = all
            .iter()
            .filter(|b| b.status == BeadStatus::Closed)
            .map(|b| b.id.clone())
            .collect();

        let mut ready: Vec<Bead> = all
            .into_iter()
            .filter(|b| turf.is_none_or(|t| b.turf.as_deref() == Some(t)))
            .filter(|b| b.is_ready_given(|id| closed.contains(id)))
            .collect();

        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(ready)
    }
}

fn matches(bead: &Bead, filter: &BeadFilter) -> bool {
    if let Some(status) = filter.status {
        if bead.status != status {
            return false;
        }
    }
    if let Some(turf) = &filter.turf {
        if bead.turf.as_deref() != Some(turf.as_str()) {
            return false;
        }
    }
    if let Some(assignee) = &filter.assignee {
        if bead.assignee.as_deref() != Some(assignee.as_str()) {
            return false;
        }
    }
    if let Some(bead_type) = filter.bead_type {
        if bead.bead_type != bead_type {
            return false;
        }
    }
    true
}

pub fn generate_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("bd-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = BeadStore::new(dir.path());
        let bead = store.create("title", "desc", BeadType::Task, false).unwrap();
        let fetched = store.get(&bead.id).unwrap();
        assert_eq!(fetched.title, "title");
        assert_eq!(fetched.status, BeadStatus::Open);
        assert_eq!(fetched.branch, format!("mob/{}", bead.id));
    }

    #[test]
    fn pending_approval_has_no_assignee_path() {
        let dir = tempdir().unwrap();
        let store = BeadStore::new(dir.path());
        let bead = store.create("t", "d", BeadType::Feature, true).unwrap();
        assert_eq!(bead.status, BeadStatus::PendingApproval);
        assert!(bead.assignee.is_none());
    }

    #[test]
    fn update_missing_bead_fails() {
        let dir = tempdir().unwrap();
        let store = BeadStore::new(dir.path());
        let now = Utc::now();
        let bead = Bead {
            id: "bd-ghost".into(),
            title: "x".into(),
            description: String::new(),
            bead_type: BeadType::Task,
            priority: 0,
            status: BeadStatus::Open,
            assignee: None,
            labels: Vec::new(),
            parent: None,
            blocks: Vec::new(),
            related: Vec::new(),
            turf: None,
            worktree_path: None,
            branch: "mob/bd-ghost".into(),
            close_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            history: Vec::new(),
        };
        assert!(matches!(store.update(bead), Err(BeadStoreError::NotFound(_))));
    }

    #[test]
    fn ready_set_gating_and_ordering() {
        let dir = tempdir().unwrap();
        let store = BeadStore::new(dir.path());

        let a = store.create("A", "", BeadType::Task, false).unwrap();
        let mut b = store.create("B", "", BeadType::Task, false).unwrap();
        b.blocks = vec![a.id.clone()];
        store.update(b.clone()).unwrap();

        let mut c = store.create("C", "", BeadType::Task, false).unwrap();
        c.blocks = vec!["bd-unknown".into()];
        store.update(c).unwrap();

        let ready = store.list_ready(None).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, a.id);

        let mut a = store.get(&a.id).unwrap();
        a.status = BeadStatus::Closed;
        a.closed_at = Some(Utc::now());
        store.update(a.clone()).unwrap();

        let ready = store.list_ready(None).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, b.id);
    }
}
