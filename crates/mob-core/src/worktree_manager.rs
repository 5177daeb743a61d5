//! Per-turf worktree lifecycle: one isolated working copy per bead.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use thiserror::Error;

use crate::types::{is_mob_managed, Turf, WorktreeInfo};

#[derive(Debug, Error)]
pub enum WorktreeManagerError {
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type Result<T> = std::result::Result<T, WorktreeManagerError>;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Abstraction over running a git subcommand in a directory, so tests can
/// substitute canned responses instead of touching a real repository.
pub trait GitRunner: Send + Sync {
    fn run_git(&self, dir: &str, args: &[&str]) -> std::result::Result<GitOutput, String>;
}

pub struct RealGitRunner;

impl GitRunner for RealGitRunner {
    fn run_git(&self, dir: &str, args: &[&str]) -> std::result::Result<GitOutput, String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| e.to_string())?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub struct WorktreeManager {
    turf: Turf,
    git: Box<dyn GitRunner>,
}

impl WorktreeManager {
    pub fn new(turf: Turf) -> Self {
        Self {
            turf,
            git: Box::new(RealGitRunner),
        }
    }

    pub fn with_git_runner(turf: Turf, git: Box<dyn GitRunner>) -> Self {
        Self { turf, git }
    }

    fn worktrees_dir(&self) -> PathBuf {
        Path::new(&self.turf.path).join(".mob-worktrees")
    }

    fn worktree_path(&self, bead_id: &str) -> PathBuf {
        self.worktrees_dir().join(bead_id)
    }

    fn main_ref(&self) -> Result<String> {
        for candidate in [self.turf.main_branch.as_str(), "main", "master", "HEAD"] {
            let out = self
                .git
                .run_git(&self.turf.path, &["rev-parse", "--verify", candidate])
                .map_err(WorktreeManagerError::GitCommand)?;
            if out.success {
                return Ok(candidate.to_string());
            }
        }
        Err(WorktreeManagerError::GitCommand(
            "no usable main ref found".into(),
        ))
    }

    /// Create an isolated worktree for `bead_id`, branching off the turf's
    /// main branch. Fails if a worktree directory already exists for this
    /// bead.
    pub fn create(&self, bead_id: &str) -> Result<WorktreeInfo> {
        let path = self.worktree_path(bead_id);
        if path.exists() {
            return Err(WorktreeManagerError::AlreadyExists(format!(
                "worktree for {bead_id} already exists at {}",
                path.display()
            )));
        }
        std::fs::create_dir_all(self.worktrees_dir())?;

        let branch = format!("mob/{bead_id}");
        let base = self.main_ref()?;
        let out = self
            .git
            .run_git(
                &self.turf.path,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &branch,
                    path.to_str().unwrap_or_default(),
                    &base,
                ],
            )
            .map_err(WorktreeManagerError::GitCommand)?;
        if !out.success {
            return Err(WorktreeManagerError::GitCommand(out.stderr));
        }

        let path_str = path.display().to_string();
        Ok(WorktreeInfo {
            created_at: dir_created_at(&path_str),
            path: path_str,
            branch,
            bead_id: bead_id.to_string(),
        })
    }

    /// Return the worktree for `bead_id` if one is registered with git.
    pub fn get(&self, bead_id: &str) -> Result<WorktreeInfo> {
        let path = self.worktree_path(bead_id);
        let branch = format!("mob/{bead_id}");
        let out = self
            .git
            .run_git(&self.turf.path, &["worktree", "list", "--porcelain"])
            .map_err(WorktreeManagerError::GitCommand)?;
        let path_str = path.display().to_string();
        if out.stdout.lines().any(|l| l == format!("worktree {path_str}")) {
            Ok(WorktreeInfo {
                created_at: dir_created_at(&path_str),
                path: path_str,
                branch,
                bead_id: bead_id.to_string(),
            })
        } else {
            Err(WorktreeManagerError::NotFound(bead_id.to_string()))
        }
    }

    /// List worktrees whose branch follows the `mob/` convention.
    pub fn list(&self) -> Result<Vec<WorktreeInfo>> {
        let out = self
            .git
            .run_git(&self.turf.path, &["worktree", "list", "--porcelain"])
            .map_err(WorktreeManagerError::GitCommand)?;

        let mut result = Vec::new();
        let mut cur_path: Option<String> = None;
        let mut cur_branch: Option<String> = None;
        for line in out.stdout.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                if let (Some(path), Some(branch)) = (cur_path.take(), cur_branch.take()) {
                    push_if_managed(&mut result, path, branch);
                }
                cur_path = Some(p.to_string());
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                cur_branch = Some(b.to_string());
            } else if line.is_empty() {
                if let (Some(path), Some(branch)) = (cur_path.take(), cur_branch.take()) {
                    push_if_managed(&mut result, path, branch);
                }
            }
        }
        if let (Some(path), Some(branch)) = (cur_path, cur_branch) {
            push_if_managed(&mut result, path, branch);
        }
        Ok(result)
    }

    /// Remove the worktree for `bead_id`, optionally deleting its branch.
    pub fn remove(&self, bead_id: &str, delete_branch: bool) -> Result<()> {
        let path = self.worktree_path(bead_id);
        let out = self
            .git
            .run_git(
                &self.turf.path,
                &["worktree", "remove", "--force", path.to_str().unwrap_or_default()],
            )
            .map_err(WorktreeManagerError::GitCommand)?;
        if !out.success && !out.stderr.contains("is not a working tree") {
            return Err(WorktreeManagerError::GitCommand(out.stderr));
        }

        if delete_branch {
            let branch = format!("mob/{bead_id}");
            let _ = self
                .git
                .run_git(&self.turf.path, &["branch", "-D", &branch]);
        }
        Ok(())
    }
}

/// The worktree directory's filesystem creation time, falling back to now
/// if the metadata call fails -- git itself doesn't record this anywhere.
fn dir_created_at(path: &str) -> chrono::DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.created())
        .map(chrono::DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn push_if_managed(out: &mut Vec<WorktreeInfo>, path: String, branch: String) {
    if is_mob_managed(&branch) {
        let bead_id = branch.trim_start_matches("mob/").to_string();
        let created_at = dir_created_at(&path);
        out.push(WorktreeInfo {
            path,
            branch,
            bead_id,
            created_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockGitRunner {
        responses: Mutex<Vec<GitOutput>>,
        commands: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockGitRunner {
        fn new(responses: Vec<GitOutput>) -> Self {
            Self {
                responses: Mutex::new(responses),
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    impl GitRunner for MockGitRunner {
        fn run_git(&self, dir: &str, args: &[&str]) -> std::result::Result<GitOutput, String> {
            self.commands.lock().unwrap().push((
                dir.to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            ));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(GitOutput {
                    success: true,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
            Ok(responses.remove(0))
        }
    }

    fn ok(stdout: &str) -> GitOutput {
        GitOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn turf(path: &str) -> Turf {
        Turf {
            name: "demo".into(),
            path: path.into(),
            main_branch: "main".into(),
        }
    }

    #[test]
    fn create_rejects_duplicate_directory() {
        let dir = tempfile::tempdir().unwrap();
        let t = turf(dir.path().to_str().unwrap());
        std::fs::create_dir_all(
            Path::new(&t.path).join(".mob-worktrees").join("bd-001"),
        )
        .unwrap();
        let mgr = WorktreeManager::with_git_runner(t, Box::new(MockGitRunner::new(vec![ok("")])));
        let err = mgr.create("bd-001").unwrap_err();
        assert!(matches!(err, WorktreeManagerError::AlreadyExists(_)));
    }

    #[test]
    fn create_builds_branch_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let t = turf(dir.path().to_str().unwrap());
        let mgr = WorktreeManager::with_git_runner(
            t.clone(),
            Box::new(MockGitRunner::new(vec![ok(""), ok("")])),
        );
        let info = mgr.create("bd-042").unwrap();
        assert_eq!(info.branch, "mob/bd-042");
        assert!(info.path.ends_with(".mob-worktrees/bd-042") || info.path.ends_with(".mob-worktrees\\bd-042"));
    }

    #[test]
    fn remove_tolerates_missing_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let t = turf(dir.path().to_str().unwrap());
        let mgr = WorktreeManager::with_git_runner(
            t,
            Box::new(MockGitRunner::new(vec![GitOutput {
                success: false,
                stdout: String::new(),
                stderr: "fatal: 'x' is not a working tree".into(),
            }])),
        );
        assert!(mgr.remove("bd-001", false).is_ok());
    }
}
