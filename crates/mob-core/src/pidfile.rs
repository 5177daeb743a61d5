//! Supervisor singleton guard: a PID file under `<mobdir>/.mob/daemon.pid`.
//!
//! One supervisor owns a mob directory. At startup it reads the PID file;
//! if the recorded PID is alive, it refuses to start; if the PID is dead
//! (a previous supervisor crashed without cleaning up), it removes the
//! stale file and takes over.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorPidFile {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub mob_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired,
    AlreadyRunning(u32),
    StaleRemoved,
}

impl SupervisorPidFile {
    pub fn path(mob_dir: &Path) -> PathBuf {
        mob_dir.join(".mob").join("daemon.pid")
    }

    pub fn new(mob_dir: &Path) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            mob_dir: mob_dir.display().to_string(),
        }
    }

    /// Attempt to acquire the singleton, adopting a stale PID file if found.
    pub fn acquire(mob_dir: &Path) -> io::Result<AcquireResult> {
        let path = Self::path(mob_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let record = Self::new(mob_dir);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let text = serde_json::to_string_pretty(&record)?;
                file.write_all(text.as_bytes())?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match Self::read(&path) {
                    Ok(existing) if pid_alive(existing.pid) => {
                        Ok(AcquireResult::AlreadyRunning(existing.pid))
                    }
                    _ => {
                        Self::remove(mob_dir)?;
                        Ok(AcquireResult::StaleRemoved)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Acquire or fail with a human-readable message; retries once after
    /// adopting a stale PID file.
    pub fn acquire_or_fail(mob_dir: &Path) -> Result<(), String> {
        match Self::acquire(mob_dir).map_err(|e| e.to_string())? {
            AcquireResult::Acquired => Ok(()),
            AcquireResult::AlreadyRunning(pid) => {
                Err(format!("daemon already running (PID {pid})"))
            }
            AcquireResult::StaleRemoved => {
                let path = Self::path(mob_dir);
                let record = Self::new(mob_dir);
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|e| e.to_string())?;
                let text = serde_json::to_string_pretty(&record).map_err(|e| e.to_string())?;
                file.write_all(text.as_bytes()).map_err(|e| e.to_string())?;
                Ok(())
            }
        }
    }

    pub fn read(path: &Path) -> io::Result<SupervisorPidFile> {
        let mut text = String::new();
        std::fs::File::open(path)?.read_to_string(&mut text)?;
        serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn read_valid(mob_dir: &Path) -> Option<SupervisorPidFile> {
        let path = Self::path(mob_dir);
        let record = Self::read(&path).ok()?;
        if pid_alive(record.pid) {
            Some(record)
        } else {
            None
        }
    }

    pub fn remove(mob_dir: &Path) -> io::Result<()> {
        let path = Self::path(mob_dir);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // Signal 0 performs no-op permission/existence checks only.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn current_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        assert!(!pid_alive(u32::MAX - 1));
    }

    #[test]
    fn acquire_then_refuse_then_adopt_stale() {
        let dir = tempdir().unwrap();
        assert_eq!(
            SupervisorPidFile::acquire(dir.path()).unwrap(),
            AcquireResult::Acquired
        );

        // A second acquire sees our own (live) PID and refuses.
        match SupervisorPidFile::acquire(dir.path()).unwrap() {
            AcquireResult::AlreadyRunning(pid) => assert_eq!(pid, std::process::id()),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }

        // Simulate a crash: rewrite the file with a dead PID.
        let path = SupervisorPidFile::path(dir.path());
        let stale = SupervisorPidFile {
            pid: u32::MAX - 1,
            started_at: Utc::now(),
            mob_dir: dir.path().display().to_string(),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert_eq!(
            SupervisorPidFile::acquire(dir.path()).unwrap(),
            AcquireResult::StaleRemoved
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        SupervisorPidFile::remove(dir.path()).unwrap();
        SupervisorPidFile::remove(dir.path()).unwrap();
    }
}
