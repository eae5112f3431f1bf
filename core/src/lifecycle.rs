//! Component lifecycle
//!
//! Every source, channel and sink moves through the same state machine:
//!
//! ```text
//! Idle ──► Starting ──► Running ──► Stopping ──► Stopped
//!             │                        │
//!             └──────► Failed ◄────────┘
//! ```
//!
//! `Stopped` and `Failed` are terminal for a component instance. A new
//! configuration builds new instances rather than restarting old ones.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Kind of pipeline component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Accepts upstream requests
    Source,
    /// Buffers events between sources and sinks
    Channel,
    /// Persists events through a backend
    Sink,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentKind::Source => "source",
            ComponentKind::Channel => "channel",
            ComponentKind::Sink => "sink",
        })
    }
}

/// Lifecycle state of a component instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum LifecycleState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl LifecycleState {
    /// Whether this instance can never run again
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                // A component that never ran can be discarded directly
                | (Idle, Stopped)
        )
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Idle,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopping,
            4 => LifecycleState::Stopped,
            _ => LifecycleState::Failed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Idle => "IDLE",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Failed => "FAILED",
        })
    }
}

/// Illegal lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct TransitionError {
    /// State the component was in
    pub from: LifecycleState,
    /// State that was requested
    pub to: LifecycleState,
}

/// Lock-free holder for a component's current state
///
/// Transitions are compare-and-swap so two concurrent `stop()` calls
/// cannot both move a component out of `Running`.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// New holder in [`LifecycleState::Idle`]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Idle as u8),
        }
    }

    /// Current state
    #[inline]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if legal from the current state
    pub fn transition(&self, next: LifecycleState) -> Result<LifecycleState, TransitionError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = LifecycleState::from_u8(current);
            if !from.can_transition_to(next) {
                return Err(TransitionError { from, to: next });
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lc = Lifecycle::new();
        assert_eq!(lc.get(), LifecycleState::Idle);
        lc.transition(LifecycleState::Starting).unwrap();
        lc.transition(LifecycleState::Running).unwrap();
        lc.transition(LifecycleState::Stopping).unwrap();
        lc.transition(LifecycleState::Stopped).unwrap();
        assert!(lc.get().is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [LifecycleState::Stopped, LifecycleState::Failed] {
            for next in [
                LifecycleState::Idle,
                LifecycleState::Starting,
                LifecycleState::Running,
                LifecycleState::Stopping,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_cannot_skip_starting() {
        let lc = Lifecycle::new();
        let err = lc.transition(LifecycleState::Running).unwrap_err();
        assert_eq!(err.from, LifecycleState::Idle);
        assert_eq!(err.to, LifecycleState::Running);
        assert_eq!(lc.get(), LifecycleState::Idle);
    }

    #[test]
    fn test_double_stop_rejected() {
        let lc = Lifecycle::new();
        lc.transition(LifecycleState::Starting).unwrap();
        lc.transition(LifecycleState::Running).unwrap();
        lc.transition(LifecycleState::Stopping).unwrap();
        assert!(lc.transition(LifecycleState::Stopping).is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        assert_eq!(LifecycleState::Running.to_string(), "RUNNING");
        assert_eq!(
            serde_json::to_string(&LifecycleState::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!(
            serde_json::to_string(&ComponentKind::Sink).unwrap(),
            "\"sink\""
        );
    }
}
