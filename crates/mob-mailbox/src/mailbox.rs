use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mob_core::types::Hook;
use notify::{RecursiveMode, Watcher};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("watcher: {0}")]
    Watch(String),
}

pub type Result<T> = std::result::Result<T, MailboxError>;

/// A single worker's mailbox: one directory, one message file, atomic
/// temp-file-then-rename writes, a monotonic `seq`.
pub struct Mailbox {
    path: PathBuf,
    seq: Arc<AtomicU64>,
}

impl Mailbox {
    /// Opens (creating the directory if needed) the mailbox for `worker`
    /// under `mob_dir/.mob/soldati/<worker>/hook.json`. The sequence
    /// counter is initialized from any persisted message so a restart
    /// never regresses `seq`.
    pub fn open(mob_dir: &Path, worker: &str) -> Result<Self> {
        let dir = mob_dir.join(".mob").join("soldati").join(worker);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("hook.json");

        let seq = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Hook>(&text).map(|h| h.seq).unwrap_or(0),
            Err(_) => 0,
        };

        Ok(Self {
            path,
            seq: Arc::new(AtomicU64::new(seq)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `hook`, stamping it with the next sequence number, via a
    /// sibling temp file plus atomic rename.
    pub fn write(&self, mut hook: Hook) -> Result<Hook> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        hook.seq = seq;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&hook)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(hook)
    }

    /// Return the current message, if any. Never blocks, never consumes.
    pub fn read(&self) -> Option<Hook> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Remove the message file. Idempotent.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Watch for new messages, emitting only when `seq` advances. Returns a
    /// receiver of `Hook`s and a `Sender<()>` the caller can use to cancel
    /// the watcher thread; dropping the sender also stops the thread.
    pub fn watch(&self) -> Result<(Receiver<Hook>, Sender<()>)> {
        let (tx, rx) = unbounded::<Hook>();
        let (cancel_tx, cancel_rx) = unbounded::<()>();
        let path = self.path.clone();
        let last_seq = Arc::new(AtomicU64::new(self.seq.load(Ordering::SeqCst)));

        let (fs_tx, fs_rx) = unbounded();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = fs_tx.send(res);
        })
        .map_err(|e| MailboxError::Watch(e.to_string()))?;

        let watch_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| MailboxError::Watch(e.to_string()))?;

        std::thread::spawn(move || {
            // Keep the watcher alive for the lifetime of the thread.
            let _watcher = watcher;
            loop {
                if cancel_rx.try_recv().is_ok() {
                    break;
                }
                match fs_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(Ok(event)) => {
                        if !matches!(
                            event.kind,
                            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                        ) {
                            continue;
                        }
                        if !event.paths.iter().any(|p| p == &path) {
                            continue;
                        }
                        let Ok(text) = std::fs::read_to_string(&path) else {
                            continue;
                        };
                        let Ok(hook) = serde_json::from_str::<Hook>(&text) else {
                            continue;
                        };
                        let previous = last_seq.load(Ordering::SeqCst);
                        if hook.seq != previous {
                            last_seq.store(hook.seq, Ordering::SeqCst);
                            if tx.send(hook).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Err(_)) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok((rx, cancel_tx))
    }
}
