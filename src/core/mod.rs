//! The watch supervisor and its supporting types.

mod builder;
mod retry;
mod status;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use retry::RetryPolicy;
pub use status::{StatusHandle, SupervisorState, Termination, TerminationReason, WatchStats};
pub use supervisor::{Reconciled, Supervisor, reconcile};
