#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cb_core::config::SchedulerConfig;
use cb_daemon::mail::{InboundMail, MailError, Mailbox, OutboundMail};
use cb_daemon::scheduler::{Scheduler, SchedulerState};
use cb_daemon::worker::Worker;
use cb_harness::shutdown::ShutdownSignal;
use cb_session::{SessionHandle, SessionOptions, ShellSession};

// ===========================================================================
// In-memory mailbox
// ===========================================================================

#[derive(Default)]
struct MemoryMailbox {
    inbox: Mutex<Vec<InboundMail>>,
    sent: Mutex<Vec<OutboundMail>>,
    fail_fetch: Mutex<bool>,
}

impl MemoryMailbox {
    fn push(&self, from: &str, body: &str) {
        self.inbox
            .lock()
            .expect("inbox lock")
            .push(InboundMail::new(from, body));
    }

    fn sent(&self) -> Vec<OutboundMail> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn fetch_unread(&self) -> Result<Vec<InboundMail>, MailError> {
        if *self.fail_fetch.lock().expect("flag lock") {
            return Err(MailError::Transport("server unavailable".into()));
        }
        Ok(std::mem::take(&mut *self.inbox.lock().expect("inbox lock")))
    }

    async fn send(&self, mail: OutboundMail) -> Result<(), MailError> {
        self.sent.lock().expect("sent lock").push(mail);
        Ok(())
    }
}

fn config(persistent: bool) -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_idle_secs: 60,
        poll_interval_active_secs: 5,
        active_timeout_secs: 300,
        session_persistence: persistent,
    }
}

fn fixture(persistent: bool) -> (Scheduler, Arc<MemoryMailbox>, SessionHandle, tempfile::TempDir) {
    let work = tempfile::tempdir().expect("work dir");
    let session = SessionHandle::new(ShellSession::new(
        SessionOptions::new(work.path()).with_default_timeout(Duration::from_secs(10)),
    ));
    let mailbox = Arc::new(MemoryMailbox::default());
    let scheduler = Scheduler::new(
        config(persistent),
        "Columba Agent Info",
        mailbox.clone(),
        Worker::new(session.clone()),
    );
    (scheduler, mailbox, session, work)
}

// ===========================================================================
// State transitions
// ===========================================================================

#[tokio::test]
async fn starts_idle_with_slow_interval() {
    let (scheduler, _mailbox, _session, _work) = fixture(false);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(scheduler.current_interval(), Duration::from_secs(60));
}

#[tokio::test]
async fn empty_poll_stays_idle() {
    let (mut scheduler, mailbox, _session, _work) = fixture(false);
    assert_eq!(scheduler.tick().await.expect("tick"), 0);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(mailbox.sent().is_empty());
}

#[tokio::test]
async fn mail_is_executed_and_answered() {
    let (mut scheduler, mailbox, session, _work) = fixture(false);
    mailbox.push("Boss <boss@example.com>", "echo hello_from_mail");

    assert_eq!(scheduler.tick().await.expect("tick"), 1);
    assert_eq!(scheduler.state(), SchedulerState::Active);
    assert_eq!(scheduler.current_interval(), Duration::from_secs(5));

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "Boss <boss@example.com>");
    assert_eq!(sent[0].subject, "Columba Agent Info");
    assert!(sent[0].body.contains("$ echo hello_from_mail"));
    assert!(sent[0].body.contains("[STDOUT]\nhello_from_mail"));
    assert!(session.is_running().await);
    session.stop().await;
}

#[tokio::test]
async fn active_times_out_and_stops_session() {
    let (mut scheduler, mailbox, session, _work) = fixture(false);
    mailbox.push("boss@example.com", "true");
    let start = Instant::now();
    scheduler.tick_at(start).await.expect("tick");
    assert!(session.is_running().await);

    scheduler
        .tick_at(start + Duration::from_secs(100))
        .await
        .expect("tick");
    assert_eq!(scheduler.state(), SchedulerState::Active);

    scheduler
        .tick_at(start + Duration::from_secs(301))
        .await
        .expect("tick");
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(!session.is_running().await);
}

#[tokio::test]
async fn persistent_session_survives_idle_transition() {
    let (mut scheduler, mailbox, session, _work) = fixture(true);
    mailbox.push("boss@example.com", "true");
    let start = Instant::now();
    scheduler.tick_at(start).await.expect("tick");
    scheduler
        .tick_at(start + Duration::from_secs(301))
        .await
        .expect("tick");

    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(session.is_running().await);
    session.stop().await;
}

#[tokio::test]
async fn fetch_errors_are_reported() {
    let (mut scheduler, mailbox, _session, _work) = fixture(false);
    *mailbox.fail_fetch.lock().expect("flag lock") = true;
    let err = scheduler.tick().await.expect_err("fetch should fail");
    assert!(format!("{err:#}").contains("server unavailable"));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

// ===========================================================================
// Run loop
// ===========================================================================

#[tokio::test]
async fn run_returns_on_shutdown_and_stops_session() {
    let (mut scheduler, _mailbox, session, _work) = fixture(true);
    session.start().await.expect("start");

    let shutdown = ShutdownSignal::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    tokio::time::timeout(Duration::from_secs(10), scheduler.run(shutdown))
        .await
        .expect("run should return after shutdown");
    assert!(!session.is_running().await);
}
