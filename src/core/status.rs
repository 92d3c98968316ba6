//! Supervisor state published for lock-free observation.

use crate::error::WatchError;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The cancellation token was raised.
    Cancelled,
    /// An open, arm or wait failure that retries could not clear.
    Fatal(WatchError),
}

impl TerminationReason {
    /// Whether the watcher died from an error rather than a shutdown request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Fatal(err) => write!(f, "fatal: {}", err),
        }
    }
}

/// Lifecycle of the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not started yet.
    Idle,
    /// Opening the configuration location.
    Opening,
    /// Armed and blocked on the next change.
    Waiting,
    /// Reading, comparing and possibly rewriting the entry.
    Reconciling,
    /// Stopped; the location has been closed.
    Terminated(TerminationReason),
}

impl SupervisorState {
    /// Whether the loop has stopped.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Counters collected over one run of the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    /// Notifications delivered
    pub notifications: u64,
    /// Reconciliation cycles run, including failed ones
    pub reconciliations: u64,
    /// Successful corrective writes
    pub writes: u64,
    /// Read or write failures that were logged and skipped
    pub transient_errors: u64,
    /// Arm or wait retries
    pub retries: u64,
}

/// Outcome of [`Supervisor::run`](super::Supervisor::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Why the loop ended.
    pub reason: TerminationReason,
    /// What the loop did before ending.
    pub stats: WatchStats,
}

/// Cheap, cloneable view of a supervisor's current state.
///
/// Reads never block the watch loop.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    current: Arc<ArcSwap<SupervisorState>>,
}

impl StatusHandle {
    pub(crate) fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(SupervisorState::Idle)),
        }
    }

    pub(crate) fn set(&self, state: SupervisorState) {
        self.current.store(Arc::new(state));
    }

    /// Current state.
    pub fn get(&self) -> Arc<SupervisorState> {
        self.current.load_full()
    }

    /// Whether the supervisor has stopped.
    pub fn is_terminated(&self) -> bool {
        self.current.load().is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let status = StatusHandle::new();
        assert_eq!(*status.get(), SupervisorState::Idle);
        assert!(!status.is_terminated());
    }

    #[test]
    fn test_clones_observe_updates() {
        let status = StatusHandle::new();
        let observer = status.clone();

        status.set(SupervisorState::Waiting);
        assert_eq!(*observer.get(), SupervisorState::Waiting);

        status.set(SupervisorState::Terminated(TerminationReason::Cancelled));
        assert!(observer.is_terminated());
    }

    #[test]
    fn test_reason_display() {
        let reason = TerminationReason::Fatal(WatchError::Wait("gone".to_string()));
        assert!(reason.is_fatal());
        assert_eq!(
            reason.to_string(),
            "fatal: Failed to wait for change notification: gone"
        );
        assert_eq!(TerminationReason::Cancelled.to_string(), "cancelled");
    }
}
