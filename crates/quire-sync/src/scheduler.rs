//! Auto-sync scheduling.
//!
//! Triggers (visibility, focus, a periodic timer, one delayed start-up tick
//! and manual requests) all funnel into [`SyncGate::admit`]. An admitted
//! trigger spawns the [`SyncJob`]; anything arriving while a round is in
//! flight is dropped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quire_core::SyncSettings;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::job::SyncJob;
use crate::log::SyncLog;

/// Capacity of the handle-to-scheduler command channel.
const COMMAND_CHANNEL_SIZE: usize = 32;

/// What asked for a sync round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Initial,
    Visible,
    Focus,
    Timer,
    Manual,
}

/// Why a trigger was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SkipReason {
    #[strum(to_string = "a round is already running")]
    InFlight,
    #[strum(to_string = "not connected")]
    Disconnected,
    #[strum(to_string = "minimum interval not elapsed")]
    TooSoon,
    #[strum(to_string = "user is editing")]
    Editing,
}

/// User-visible sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing { trigger: Trigger },
    Synced { at: DateTime<Utc>, summary: String },
    Failed { message: String, retryable: bool },
    Disconnected,
}

/// Admission rules for sync rounds.
#[derive(Debug, Clone)]
pub struct SyncGate {
    min_interval: Duration,
    quiet_window: Duration,
    connected: bool,
    in_flight: bool,
    last_start: Option<Instant>,
    last_edit: Option<Instant>,
}

impl SyncGate {
    pub fn new(min_interval: Duration, quiet_window: Duration, connected: bool) -> Self {
        Self {
            min_interval,
            quiet_window,
            connected,
            in_flight: false,
            last_start: None,
            last_edit: None,
        }
    }

    pub fn from_settings(settings: &SyncSettings, connected: bool) -> Self {
        Self::new(settings.min_interval, settings.quiet_window, connected)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Record a local edit.
    pub fn note_edit(&mut self, at: Instant) {
        self.last_edit = Some(at);
    }

    /// Admit a trigger and mark a round as started, or say why not.
    ///
    /// Manual triggers skip the interval and quiet-window checks, never the
    /// in-flight or connection checks.
    pub fn admit(&mut self, trigger: Trigger, now: Instant) -> Result<(), SkipReason> {
        if self.in_flight {
            return Err(SkipReason::InFlight);
        }
        if !self.connected {
            return Err(SkipReason::Disconnected);
        }
        if trigger != Trigger::Manual {
            if self
                .last_start
                .is_some_and(|at| now.duration_since(at) < self.min_interval)
            {
                return Err(SkipReason::TooSoon);
            }
            if self
                .last_edit
                .is_some_and(|at| now.duration_since(at) < self.quiet_window)
            {
                return Err(SkipReason::Editing);
            }
        }

        self.in_flight = true;
        self.last_start = Some(now);
        Ok(())
    }

    /// Mark the running round as finished.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }
}

#[derive(Debug)]
enum Command {
    Trigger(Trigger),
    Edited,
    Connect,
    Disconnect,
}

/// Cloneable front end for a running [`AutoSyncScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("scheduler has stopped, dropping command");
        }
    }

    /// The page or window became visible.
    pub async fn page_visible(&self) {
        self.send(Command::Trigger(Trigger::Visible)).await;
    }

    /// The window gained focus.
    pub async fn focused(&self) {
        self.send(Command::Trigger(Trigger::Focus)).await;
    }

    /// A note or folder was changed locally.
    pub async fn edited(&self) {
        self.send(Command::Edited).await;
    }

    /// Sync now, regardless of interval and quiet window.
    pub async fn sync_now(&self) {
        self.send(Command::Trigger(Trigger::Manual)).await;
    }

    /// Credentials became available again.
    pub async fn connected(&self) {
        self.send(Command::Connect).await;
    }

    /// Stop admitting rounds. A round already running completes.
    pub async fn disconnect(&self) {
        self.send(Command::Disconnect).await;
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Stop the scheduler loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Owns the gate, timers and status channel; [`run`](Self::run) is the loop.
pub struct AutoSyncScheduler {
    gate: SyncGate,
    job: Arc<dyn SyncJob>,
    periodic_interval: Duration,
    initial_delay: Duration,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<SyncStatus>,
    cancel: CancellationToken,
}

impl AutoSyncScheduler {
    /// Create a scheduler and its handle. Nothing runs until [`run`](Self::run).
    pub fn new(
        job: Arc<dyn SyncJob>,
        settings: &SyncSettings,
        connected: bool,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let initial = if connected {
            SyncStatus::Idle
        } else {
            SyncStatus::Disconnected
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let scheduler = Self {
            gate: SyncGate::from_settings(settings, connected),
            job,
            periodic_interval: settings.periodic_interval,
            initial_delay: settings.initial_delay,
            commands: command_rx,
            status: status_tx,
            cancel: cancel.clone(),
        };
        let handle = SchedulerHandle {
            commands: command_tx,
            status: status_rx,
            cancel,
        };
        (scheduler, handle)
    }

    /// Run until [`SchedulerHandle::shutdown`] is called.
    pub async fn run(mut self) {
        let start = Instant::now();
        let mut periodic =
            tokio::time::interval_at(start + self.periodic_interval, self.periodic_interval);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let initial = tokio::time::sleep(self.initial_delay);
        tokio::pin!(initial);
        let mut initial_fired = false;

        let (done_tx, mut done_rx) = mpsc::channel::<Result<SyncLog, SyncError>>(1);

        tracing::debug!("auto-sync scheduler started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = &mut initial, if !initial_fired => {
                    initial_fired = true;
                    self.trigger(Trigger::Initial, &done_tx);
                }
                _ = periodic.tick() => self.trigger(Trigger::Timer, &done_tx),
                Some(command) = self.commands.recv() => self.handle(command, &done_tx),
                Some(result) = done_rx.recv() => self.finish(result),
            }
        }
        tracing::debug!("auto-sync scheduler stopped");
    }

    fn handle(&mut self, command: Command, done: &mpsc::Sender<Result<SyncLog, SyncError>>) {
        match command {
            Command::Trigger(trigger) => self.trigger(trigger, done),
            Command::Edited => self.gate.note_edit(Instant::now()),
            Command::Connect => {
                self.gate.set_connected(true);
                if !self.gate.is_in_flight() {
                    self.status.send_replace(SyncStatus::Idle);
                }
            }
            Command::Disconnect => {
                self.gate.set_connected(false);
                self.status.send_replace(SyncStatus::Disconnected);
                tracing::info!("auto-sync disconnected");
            }
        }
    }

    fn trigger(&mut self, trigger: Trigger, done: &mpsc::Sender<Result<SyncLog, SyncError>>) {
        if let Err(reason) = self.gate.admit(trigger, Instant::now()) {
            tracing::debug!(%trigger, %reason, "sync trigger dropped");
            return;
        }

        tracing::info!(%trigger, "starting sync round");
        self.status.send_replace(SyncStatus::Syncing { trigger });

        let job = Arc::clone(&self.job);
        let done = done.clone();
        tokio::spawn(async move {
            let result = job.run().await;
            let _ = done.send(result).await;
        });
    }

    fn finish(&mut self, result: Result<SyncLog, SyncError>) {
        self.gate.finish();
        let status = match result {
            Ok(log) => {
                tracing::info!("sync round complete: {}", log.summary());
                SyncStatus::Synced {
                    at: Utc::now(),
                    summary: log.summary(),
                }
            }
            Err(e) if e.needs_reconnect() => {
                tracing::warn!("sync needs reconnect: {e}");
                self.gate.set_connected(false);
                SyncStatus::Disconnected
            }
            Err(e) => {
                tracing::warn!("sync round failed: {e}");
                SyncStatus::Failed {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                }
            }
        };
        // A disconnect during the round wins over its result.
        if self.gate.is_connected() || status == SyncStatus::Disconnected {
            self.status.send_replace(status);
        }
    }
}
