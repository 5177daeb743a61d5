//! Per-worker single-slot mailbox: atomic file writes with a filesystem
//! watcher that re-reads on change and emits only when the message's
//! sequence number advances.

pub mod mailbox;

pub use mailbox::{Mailbox, MailboxError};
