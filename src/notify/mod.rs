//! Change notification.
//!
//! The underlying mechanisms fire once per registration, so the interface is an
//! explicit `arm` / `wait` / `release` triple. Callers arm a fresh token for every
//! wait and release it afterwards on every branch.

mod cancel;
mod token;

pub use cancel::CancelToken;
pub use token::NotificationToken;

use crate::error::Result;
use std::time::Duration;

/// Shortest slice a blocking wait or sleep is cut into.
///
/// Poll intervals below this are raised to it; a zero slice would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result of a wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The registered change fired. The token is now spent.
    Signaled,
    /// The timeout elapsed without a change. The token is still armed.
    TimedOut,
    /// The cancellation signal was raised while waiting.
    Cancelled,
}

/// Blocks until a configuration location is modified.
pub trait ChangeNotifier {
    /// Open location the notifier registers against.
    type Location;

    /// Backend wait resource carried by a [`NotificationToken`].
    type Handle;

    /// Register interest in the next "value last set" change on `location`.
    ///
    /// Changes below the location do not fire.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Arm`](crate::error::WatchError::Arm) if the
    /// registration is rejected.
    fn arm(&self, location: &Self::Location) -> Result<NotificationToken<Self::Handle>>;

    /// Block until the armed change fires, `timeout` elapses, or `cancel` is raised.
    ///
    /// `None` waits without a deadline. The wait checks `cancel` at least once per
    /// poll interval of the backend.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::TokenSpent`](crate::error::WatchError::TokenSpent) when
    /// called on a token that already fired, and
    /// [`WatchError::Wait`](crate::error::WatchError::Wait) on a backend failure.
    fn wait(
        &self,
        token: &mut NotificationToken<Self::Handle>,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome>;

    /// Release the wait resource behind `token`.
    fn release(&self, token: NotificationToken<Self::Handle>);
}
