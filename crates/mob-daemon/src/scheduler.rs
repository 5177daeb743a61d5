//! Writes mailbox hooks on behalf of the patrol loop: assign, nudge,
//! abort, pause, resume.

use std::path::PathBuf;

use chrono::Utc;
use mob_core::types::{Hook, HookType};
use mob_mailbox::{Mailbox, MailboxError};
use tracing::info;

pub struct MailboxDispatcher {
    mob_dir: PathBuf,
}

impl MailboxDispatcher {
    pub fn new(mob_dir: impl Into<PathBuf>) -> Self {
        Self {
            mob_dir: mob_dir.into(),
        }
    }

    fn send(&self, worker: &str, hook_type: HookType, bead_id: Option<String>, message: Option<String>) -> Result<Hook, MailboxError> {
        let mailbox = Mailbox::open(&self.mob_dir, worker)?;
        let hook = mailbox.write(Hook {
            hook_type,
            bead_id,
            message,
            timestamp: Utc::now(),
            seq: 0,
        })?;
        info!(worker, hook_type = ?hook.hook_type, "dispatched mailbox hook");
        Ok(hook)
    }

    pub fn assign(&self, worker: &str, bead_id: &str) -> Result<Hook, MailboxError> {
        self.send(worker, HookType::Assign, Some(bead_id.to_string()), None)
    }

    pub fn nudge(&self, worker: &str, message: Option<String>) -> Result<Hook, MailboxError> {
        self.send(worker, HookType::Nudge, None, message)
    }

    pub fn abort(&self, worker: &str) -> Result<Hook, MailboxError> {
        self.send(worker, HookType::Abort, None, None)
    }

    pub fn pause(&self, worker: &str) -> Result<Hook, MailboxError> {
        self.send(worker, HookType::Pause, None, None)
    }

    pub fn resume(&self, worker: &str) -> Result<Hook, MailboxError> {
        self.send(worker, HookType::Resume, None, None)
    }
}
