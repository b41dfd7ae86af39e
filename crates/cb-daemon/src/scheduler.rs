use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cb_core::config::SchedulerConfig;
use cb_harness::shutdown::ShutdownSignal;
use tracing::{debug, info, warn};

use crate::mail::{Mailbox, OutboundMail};
use crate::worker::Worker;

/// Polling cadence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No recent mail; poll slowly.
    Idle,
    /// Mail arrived recently; poll quickly.
    Active,
}

/// Polls the mailbox, hands mail to the worker and mails back replies.
///
/// Switches to [`SchedulerState::Active`] whenever mail is processed and
/// falls back to [`SchedulerState::Idle`] after `active_timeout_secs`
/// without any. Leaving the active state stops the shell session unless
/// `session_persistence` is set.
pub struct Scheduler {
    config: SchedulerConfig,
    reply_subject: String,
    mailbox: Arc<dyn Mailbox>,
    worker: Worker,
    state: SchedulerState,
    last_mail: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        reply_subject: impl Into<String>,
        mailbox: Arc<dyn Mailbox>,
        worker: Worker,
    ) -> Self {
        Self {
            config,
            reply_subject: reply_subject.into(),
            mailbox,
            worker,
            state: SchedulerState::Idle,
            last_mail: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Sleep between polls in the current state.
    pub fn current_interval(&self) -> Duration {
        match self.state {
            SchedulerState::Idle => Duration::from_secs(self.config.poll_interval_idle_secs),
            SchedulerState::Active => Duration::from_secs(self.config.poll_interval_active_secs),
        }
    }

    /// One poll. Returns the number of messages handled.
    pub async fn tick(&mut self) -> Result<usize> {
        self.tick_at(Instant::now()).await
    }

    /// [`tick`](Self::tick) with an explicit clock reading.
    pub async fn tick_at(&mut self, now: Instant) -> Result<usize> {
        let inbox = self
            .mailbox
            .fetch_unread()
            .await
            .context("failed to fetch mail")?;

        let mut handled = 0;
        for mail in inbox {
            info!(from = %mail.from, id = %mail.id, "processing mail");
            let body = self.worker.handle_body(&mail.body).await;
            let reply = OutboundMail {
                to: mail.from.clone(),
                subject: self.reply_subject.clone(),
                body,
            };
            if let Err(e) = self.mailbox.send(reply).await {
                warn!(to = %mail.from, "failed to send reply: {e}");
            }
            handled += 1;
        }

        if handled > 0 {
            if self.state == SchedulerState::Idle {
                info!("mail received, switching to active polling");
            }
            self.state = SchedulerState::Active;
            self.last_mail = Some(now);
        } else if self.state == SchedulerState::Active && self.active_expired(now) {
            self.go_idle().await;
        }
        Ok(handled)
    }

    fn active_expired(&self, now: Instant) -> bool {
        let limit = Duration::from_secs(self.config.active_timeout_secs);
        self.last_mail
            .is_none_or(|at| now.saturating_duration_since(at) >= limit)
    }

    async fn go_idle(&mut self) {
        info!("no mail for a while, switching to idle polling");
        self.state = SchedulerState::Idle;
        if !self.config.session_persistence {
            debug!("stopping idle shell session");
            self.worker.session().stop().await;
        }
    }

    /// Poll until `shutdown` fires, then stop the session.
    pub async fn run(&mut self, shutdown: ShutdownSignal) {
        let mut shutdown_rx = shutdown.subscribe();
        info!(
            idle_secs = self.config.poll_interval_idle_secs,
            active_secs = self.config.poll_interval_active_secs,
            "scheduler started"
        );

        while !shutdown.is_shutting_down() {
            let interval = self.current_interval();
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        warn!("poll failed: {e:#}");
                    }
                }
            }
        }

        info!("scheduler shutting down");
        self.worker.session().stop().await;
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("interval", &self.current_interval())
            .finish()
    }
}
