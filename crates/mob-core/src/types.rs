//! Shared data model: beads, roster entries, turfs, worktrees, and the
//! records that flow through the registry and mailbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BeadType / BeadStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadType {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
    Review,
    Heresy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
    PendingApproval,
}

// ---------------------------------------------------------------------------
// Bead
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadHistoryEntry {
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub bead_type: BeadType,
    pub priority: u8,
    pub status: BeadStatus,
    pub assignee: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub parent: Option<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    pub turf: Option<String>,
    pub worktree_path: Option<String>,
    pub branch: String,
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<BeadHistoryEntry>,
}

impl Bead {
    /// Priority clamped to the displayable range, regardless of what was stored.
    pub fn display_priority(&self) -> u8 {
        self.priority.min(4)
    }

    pub fn branch_for(id: &str) -> String {
        format!("mob/{id}")
    }

    pub fn is_ready_given(&self, closed_ids: impl Fn(&str) -> bool) -> bool {
        self.status == BeadStatus::Open && self.blocks.iter().all(|b| closed_ids(b))
    }
}

// ---------------------------------------------------------------------------
// RosterEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterStats {
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub turfs: Vec<String>,
    pub primary_turf: Option<String>,
    #[serde(default)]
    pub stats: RosterStats,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            last_active: None,
            turfs: Vec::new(),
            primary_turf: None,
            stats: RosterStats::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Agent role / status, Registry Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Underboss,
    Soldati,
    Associate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Working,
    Nudged,
    Error,
    Completed,
    Failed,
    TimedOut,
    Paused,
}

impl AgentStatus {
    /// Terminal states get a `completed_at` stamp and are eventually purged.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub id: String,
    pub role: AgentRole,
    /// Empty for associates.
    #[serde(default)]
    pub name: String,
    pub turf: Option<String>,
    pub bead_id: Option<String>,
    pub task: Option<String>,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub nudged_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
}

impl RegistryRecord {
    pub fn new_soldati(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role: AgentRole::Soldati,
            name: name.into(),
            turf: None,
            bead_id: None,
            task: None,
            status: AgentStatus::Idle,
            started_at: now,
            last_ping: now,
            completed_at: None,
            nudged_at: None,
            pid: None,
        }
    }

    pub fn new_associate(id: impl Into<String>, bead_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role: AgentRole::Associate,
            name: String::new(),
            turf: None,
            bead_id: Some(bead_id.into()),
            task: None,
            status: AgentStatus::Active,
            started_at: now,
            last_ping: now,
            completed_at: None,
            nudged_at: None,
            pid: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Mailbox message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    Assign,
    Nudge,
    Abort,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    #[serde(rename = "type")]
    pub hook_type: HookType,
    pub bead_id: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Turf / Worktree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turf {
    pub name: String,
    pub path: String,
    pub main_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: String,
    pub branch: String,
    pub bead_id: String,
    pub created_at: DateTime<Utc>,
}

/// A branch is mob-managed iff it carries the `mob/` prefix and a non-empty suffix.
pub fn is_mob_managed(branch: &str) -> bool {
    branch
        .strip_prefix("mob/")
        .map(|suffix| !suffix.is_empty())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Merge queue item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeItemStatus {
    Pending,
    Merging,
    Conflict,
    Failed,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeQueueItem {
    pub bead_id: String,
    pub branch: String,
    pub turf: String,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    pub added_at: DateTime<Utc>,
    pub status: MergeItemStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_prefix_rule() {
        assert!(is_mob_managed("mob/bd-001"));
        assert!(!is_mob_managed(""));
        assert!(!is_mob_managed("main"));
        assert!(!is_mob_managed("master"));
        assert!(!is_mob_managed("feature/x"));
        assert!(!is_mob_managed("mob/"));
        assert!(!is_mob_managed("mobx"));
    }

    #[test]
    fn display_priority_clamps() {
        let bead = sample_bead();
        let mut hot = bead.clone();
        hot.priority = 9;
        assert_eq!(hot.display_priority(), 4);
    }

    fn sample_bead() -> Bead {
        let now = Utc::now();
        Bead {
            id: "bd-001".into(),
            title: "t".into(),
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
            branch: Bead::branch_for("bd-001"),
            close_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn ready_given_respects_blockers() {
        let mut bead = sample_bead();
        bead.blocks = vec!["bd-000".into()];
        assert!(!bead.is_ready_given(|_| false));
        assert!(bead.is_ready_given(|_| true));
    }
}
