use mob_core::types::HookType;
use mob_daemon::scheduler::MailboxDispatcher;
use mob_mailbox::Mailbox;

#[test]
fn assign_writes_a_hook_readable_from_the_workers_own_mailbox() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = MailboxDispatcher::new(dir.path());

    dispatcher.assign("vinnie", "bd-001").unwrap();

    let mailbox = Mailbox::open(dir.path(), "vinnie").unwrap();
    let hook = mailbox.read().expect("hook should be present");
    assert_eq!(hook.hook_type, HookType::Assign);
    assert_eq!(hook.bead_id.as_deref(), Some("bd-001"));
}

#[test]
fn different_workers_get_independent_mailboxes() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = MailboxDispatcher::new(dir.path());

    dispatcher.assign("vinnie", "bd-001").unwrap();
    dispatcher.assign("sal", "bd-002").unwrap();

    let vinnie = Mailbox::open(dir.path(), "vinnie").unwrap().read().unwrap();
    let sal = Mailbox::open(dir.path(), "sal").unwrap().read().unwrap();
    assert_eq!(vinnie.bead_id.as_deref(), Some("bd-001"));
    assert_eq!(sal.bead_id.as_deref(), Some("bd-002"));
}

#[test]
fn abort_pause_resume_write_the_expected_hook_types() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = MailboxDispatcher::new(dir.path());

    let aborted = dispatcher.abort("vinnie").unwrap();
    assert_eq!(aborted.hook_type, HookType::Abort);

    let paused = dispatcher.pause("vinnie").unwrap();
    assert_eq!(paused.hook_type, HookType::Pause);

    let resumed = dispatcher.resume("vinnie").unwrap();
    assert_eq!(resumed.hook_type, HookType::Resume);
    assert!(resumed.seq > paused.seq && paused.seq > aborted.seq);
}

#[test]
fn nudge_carries_an_optional_message() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = MailboxDispatcher::new(dir.path());

    let hook = dispatcher.nudge("vinnie", Some("check in".to_string())).unwrap();
    assert_eq!(hook.message.as_deref(), Some("check in"));
}
