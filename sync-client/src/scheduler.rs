//! Background trigger loop.
//!
//! Interprets the [`CycleState`] machine from sync-core on a tokio task:
//! immediate requests start a cycle right away, debounced requests wait
//! for a quiet period, and a periodic timer runs while the user is
//! authenticated. At most one cycle is in flight; requests arriving during
//! a cycle collapse into a single follow-up.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{CycleAction, CycleEvent, CycleState, Debounce, TriggerKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::SyncConfig;

/// Something that runs a full sync cycle.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run one cycle. Failures are the runner's to report.
    async fn run_cycle(&self, trigger: TriggerKind);
}

#[derive(Debug)]
enum Command {
    Trigger(TriggerKind),
    Debounce,
    SetAuthenticated(bool),
    Shutdown,
}

/// Cheap handle for requesting cycles. Clones talk to the same scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Scheduler stopped; request dropped");
        }
    }

    /// Start a cycle as soon as possible.
    pub fn sync_now(&self) {
        self.send(Command::Trigger(TriggerKind::Immediate));
    }

    /// Start a cycle once local edits have been quiet for the debounce window.
    pub fn request_debounced(&self) {
        self.send(Command::Debounce);
    }

    /// Enable or disable the periodic trigger. Signing in also syncs
    /// immediately.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.send(Command::SetAuthenticated(authenticated));
    }
}

/// Running scheduler task.
#[derive(Debug)]
pub struct SyncScheduler {
    handle: SchedulerHandle,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn with timing from `config`.
    pub fn spawn(runner: Arc<dyn CycleRunner>, config: &SyncConfig) -> Self {
        Self::spawn_with(runner, config.debounce(), config.periodic_interval())
    }

    /// Spawn with explicit timing.
    pub fn spawn_with(
        runner: Arc<dyn CycleRunner>,
        debounce: Duration,
        periodic: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::info!(
            "Sync scheduler started (debounce: {}ms, periodic: {}s)",
            debounce.as_millis(),
            periodic.as_secs()
        );
        let task = tokio::spawn(run(runner, rx, debounce, periodic));
        Self {
            handle: SchedulerHandle { tx },
            task,
        }
    }

    /// A handle for requesting cycles.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the loop, waiting for an in-flight cycle to finish.
    pub async fn shutdown(self) {
        self.handle.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
    }
}

async fn run(
    runner: Arc<dyn CycleRunner>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    debounce_window: Duration,
    periodic: Duration,
) {
    let mut state = CycleState::Idle;
    let mut debounce = Debounce::new(debounce_window);
    let mut timer: Option<Interval> = None;
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        let event = tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Trigger(kind)) => Some(CycleEvent::Triggered(kind)),
                Some(Command::Debounce) => {
                    debounce.poke(Instant::now().into_std());
                    None
                }
                Some(Command::SetAuthenticated(true)) => {
                    if timer.is_some() {
                        None
                    } else {
                        let mut periodic_timer = interval_at(Instant::now() + periodic, periodic);
                        periodic_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        timer = Some(periodic_timer);
                        Some(CycleEvent::Triggered(TriggerKind::Immediate))
                    }
                }
                Some(Command::SetAuthenticated(false)) => {
                    timer = None;
                    None
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep_until(debounce.deadline()) => {
                debounce
                    .take_due(Instant::now().into_std())
                    .then_some(CycleEvent::Triggered(TriggerKind::Debounced))
            }
            _ = tick(&mut timer) => Some(CycleEvent::Triggered(TriggerKind::Periodic)),
            _ = join(&mut in_flight) => {
                in_flight = None;
                Some(CycleEvent::Finished)
            }
        };

        let Some(event) = event else { continue };
        let (next, actions) = state.on_event(event);
        state = next;
        for action in actions {
            match action {
                CycleAction::StartCycle(trigger) => {
                    tracing::debug!(?trigger, "Starting sync cycle");
                    let runner = runner.clone();
                    in_flight = Some(tokio::spawn(async move { runner.run_cycle(trigger).await }));
                }
            }
        }
    }

    if let Some(cycle) = in_flight {
        let _ = cycle.await;
    }
    tracing::info!("Sync scheduler stopped");
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join(cycle: &mut Option<JoinHandle<()>>) {
    match cycle {
        Some(cycle) => {
            if let Err(e) = cycle.await {
                tracing::error!("Sync cycle panicked: {}", e);
            }
        }
        None => std::future::pending().await,
    }
}
