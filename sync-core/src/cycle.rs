//! Sync cycle scheduling state machine.
//!
//! Pure and side-effect free, like every module in this crate: the tokio
//! scheduler in sync-client feeds it events and executes the actions it
//! returns.
//!
//! ```text
//! Idle --trigger--> Running --finished--> Idle
//!                     |  ^
//!             trigger |  | finished (rerun requested): start again
//!                     v  |
//!               Running { rerun_requested }
//! ```
//!
//! Any number of triggers arriving while a cycle runs collapse into a
//! single follow-up run.

use std::time::{Duration, Instant};

/// Default quiet period for debounced triggers.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Default interval for periodic triggers.
pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_secs(300);

/// Where a cycle request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Run as soon as possible
    Immediate,
    /// Quiet period after local edits elapsed
    Debounced,
    /// Periodic timer while authenticated
    Periodic,
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    /// No cycle in flight.
    #[default]
    Idle,
    /// A cycle is in flight.
    Running {
        /// A trigger arrived while running
        rerun_requested: bool,
    },
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// A trigger fired (debounce already elapsed for debounced requests).
    Triggered(TriggerKind),
    /// The in-flight cycle ended, successfully or not.
    Finished,
}

/// Work for the runtime to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    /// Start a sync cycle.
    StartCycle(TriggerKind),
}

impl CycleState {
    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: CycleEvent) -> (Self, Vec<CycleAction>) {
        match (self, event) {
            (Self::Idle, CycleEvent::Triggered(kind)) => (
                Self::Running {
                    rerun_requested: false,
                },
                vec![CycleAction::StartCycle(kind)],
            ),
            (Self::Running { .. }, CycleEvent::Triggered(_)) => (
                Self::Running {
                    rerun_requested: true,
                },
                vec![],
            ),
            (
                Self::Running {
                    rerun_requested: true,
                },
                CycleEvent::Finished,
            ) => (
                Self::Running {
                    rerun_requested: false,
                },
                vec![CycleAction::StartCycle(TriggerKind::Immediate)],
            ),
            (
                Self::Running {
                    rerun_requested: false,
                },
                CycleEvent::Finished,
            ) => (Self::Idle, vec![]),

            // Stray completion
            (Self::Idle, CycleEvent::Finished) => (Self::Idle, vec![]),
        }
    }

    /// Check if a cycle is in flight.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Sliding quiet-period timer holding at most one pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    /// Create with the given quiet period.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Register a request; pushes the deadline out to `now + window`.
    pub fn poke(&mut self, now: Instant) -> Instant {
        let deadline = now + self.window;
        self.deadline = Some(deadline);
        deadline
    }

    /// When the pending request is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the pending request if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for Debounce {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(state: CycleState, events: &[CycleEvent]) -> (CycleState, Vec<CycleAction>) {
        let mut state = state;
        let mut all = Vec::new();
        for event in events {
            let (next, actions) = state.on_event(*event);
            state = next;
            all.extend(actions);
        }
        (state, all)
    }

    // ===========================================
    // State transitions
    // ===========================================

    #[test]
    fn trigger_from_idle_starts_cycle() {
        let (state, actions) = CycleState::Idle.on_event(CycleEvent::Triggered(TriggerKind::Periodic));
        assert!(state.is_running());
        assert_eq!(actions, vec![CycleAction::StartCycle(TriggerKind::Periodic)]);
    }

    #[test]
    fn finish_without_rerun_goes_idle() {
        let (state, actions) = run(
            CycleState::Idle,
            &[CycleEvent::Triggered(TriggerKind::Immediate), CycleEvent::Finished],
        );
        assert_eq!(state, CycleState::Idle);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn triggers_while_running_collapse_into_one_rerun() {
        let (state, actions) = run(
            CycleState::Idle,
            &[
                CycleEvent::Triggered(TriggerKind::Immediate),
                CycleEvent::Triggered(TriggerKind::Debounced),
                CycleEvent::Triggered(TriggerKind::Periodic),
                CycleEvent::Triggered(TriggerKind::Immediate),
                CycleEvent::Finished,
                CycleEvent::Finished,
            ],
        );
        assert_eq!(state, CycleState::Idle);
        assert_eq!(
            actions,
            vec![
                CycleAction::StartCycle(TriggerKind::Immediate),
                CycleAction::StartCycle(TriggerKind::Immediate),
            ]
        );
    }

    #[test]
    fn stray_finish_is_ignored() {
        let (state, actions) = CycleState::Idle.on_event(CycleEvent::Finished);
        assert_eq!(state, CycleState::Idle);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Debounce
    // ===========================================

    #[test]
    fn debounce_slides_with_each_poke() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_secs(2));

        debounce.poke(start);
        let deadline = debounce.poke(start + Duration::from_secs(1));

        assert_eq!(deadline, start + Duration::from_secs(3));
        assert!(!debounce.take_due(start + Duration::from_secs(2)));
        assert!(debounce.take_due(start + Duration::from_secs(3)));
        assert!(debounce.deadline().is_none());
    }

    #[test]
    fn debounce_without_poke_is_never_due() {
        let mut debounce = Debounce::default();
        assert!(!debounce.take_due(Instant::now() + Duration::from_secs(60)));
    }
}
