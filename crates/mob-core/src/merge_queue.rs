//! Dependency-ordered serial merging of completed worktrees into a turf's
//! main branch.

use chrono::Utc;
use thiserror::Error;

use crate::types::{MergeItemStatus, MergeQueueItem};
use crate::worktree_manager::{GitOutput, GitRunner};

#[derive(Debug, Error)]
pub enum MergeQueueError {
    #[error("already queued: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("git command failed: {0}")]
    GitCommand(String),
}

pub type Result<T> = std::result::Result<T, MergeQueueError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Success { message: String },
    Conflict { conflict_files: Vec<String> },
    Failed { message: String },
}

pub struct MergeQueue {
    turf_path: String,
    main_branch: String,
    items: Vec<MergeQueueItem>,
    git: Box<dyn GitRunner>,
}

impl MergeQueue {
    pub fn new(turf_path: impl Into<String>, main_branch: impl Into<String>) -> Self {
        Self {
            turf_path: turf_path.into(),
            main_branch: main_branch.into(),
            items: Vec::new(),
            git: Box::new(crate::worktree_manager::RealGitRunner),
        }
    }

    pub fn with_git_runner(
        turf_path: impl Into<String>,
        main_branch: impl Into<String>,
        git: Box<dyn GitRunner>,
    ) -> Self {
        Self {
            turf_path: turf_path.into(),
            main_branch: main_branch.into(),
            items: Vec::new(),
            git,
        }
    }

    pub fn add(
        &mut self,
        bead_id: impl Into<String>,
        branch: impl Into<String>,
        blocked_by: Vec<String>,
    ) -> Result<()> {
        let bead_id = bead_id.into();
        if self.items.iter().any(|i| i.bead_id == bead_id) {
            return Err(MergeQueueError::AlreadyExists(bead_id));
        }
        self.items.push(MergeQueueItem {
            bead_id,
            branch: branch.into(),
            turf: self.turf_path.clone(),
            blocked_by,
            added_at: Utc::now(),
            status: MergeItemStatus::Pending,
        });
        Ok(())
    }

    pub fn remove(&mut self, bead_id: &str) -> Result<()> {
        let before = self.items.len();
        self.items.retain(|i| i.bead_id != bead_id);
        if self.items.len() == before {
            return Err(MergeQueueError::NotFound(bead_id.to_string()));
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<MergeQueueItem> {
        self.items.clone()
    }

    /// The oldest pending item whose blockers have all merged. An item
    /// referencing a blocker not present in the queue is not advanceable.
    pub fn next(&self) -> Option<MergeQueueItem> {
        self.items
            .iter()
            .filter(|i| i.status == MergeItemStatus::Pending)
            .filter(|i| {
                i.blocked_by.iter().all(|blocker| {
                    self.items
                        .iter()
                        .any(|other| &other.bead_id == blocker && other.status == MergeItemStatus::Merged)
                })
            })
            .min_by_key(|i| i.added_at)
            .cloned()
    }

    /// Advance the next eligible item through one merge attempt.
    pub fn process(&mut self) -> Result<Option<(String, MergeOutcome)>> {
        let Some(next) = self.next() else {
            return Ok(None);
        };

        let idx = self
            .items
            .iter()
            .position(|i| i.bead_id == next.bead_id)
            .expect("next() returned an item from self.items");
        self.items[idx].status = MergeItemStatus::Merging;

        let outcome = self.attempt_merge(&next)?;
        self.items[idx].status = match &outcome {
            MergeOutcome::Success { .. } => MergeItemStatus::Merged,
            MergeOutcome::Conflict { .. } => MergeItemStatus::Conflict,
            MergeOutcome::Failed { .. } => MergeItemStatus::Failed,
        };

        Ok(Some((next.bead_id, outcome)))
    }

    fn run(&self, args: &[&str]) -> std::result::Result<GitOutput, String> {
        self.git.run_git(&self.turf_path, args)
    }

    fn attempt_merge(&self, item: &MergeQueueItem) -> Result<MergeOutcome> {
        let checkout = self
            .run(&["checkout", &self.main_branch])
            .map_err(MergeQueueError::GitCommand)?;
        if !checkout.success {
            return Ok(MergeOutcome::Failed {
                message: checkout.stderr,
            });
        }

        let merge = self
            .run(&["merge", "--no-edit", &item.branch])
            .map_err(MergeQueueError::GitCommand)?;

        if merge.success {
            return Ok(MergeOutcome::Success {
                message: format!("merged {} into {}", item.branch, self.main_branch),
            });
        }

        let combined = format!("{}{}", merge.stdout, merge.stderr);
        if combined.contains("CONFLICT") || combined.contains("Merge conflict") {
            let status = self
                .run(&["diff", "--name-only", "--diff-filter=U"])
                .map_err(MergeQueueError::GitCommand)?;
            let conflict_files: Vec<String> = status
                .stdout
                .lines()
                .map(|l| l.to_string())
                .filter(|l| !l.is_empty())
                .collect();
            let _ = self.run(&["merge", "--abort"]);
            return Ok(MergeOutcome::Conflict { conflict_files });
        }

        Ok(MergeOutcome::Failed {
            message: merge.stderr,
        })
    }
}
