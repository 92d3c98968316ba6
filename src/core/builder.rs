//! Builder for constructing Supervisor instances.

use crate::core::{RetryPolicy, Supervisor};
use crate::logging::{LogSink, NoopSink};
use crate::notify::{CancelToken, ChangeNotifier, MIN_POLL_INTERVAL};
use crate::settings::Settings;
use crate::store::ConfigStore;
use crate::target::WatchTarget;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a [`Supervisor`].
///
/// Defaults: the `ProxyOverride` target, a muted logger, the default
/// [`RetryPolicy`], no start-up enforcement and a fresh cancellation token.
///
/// # Examples
///
/// ```rust
/// use proxy_guard::prelude::*;
/// use proxy_guard::logging::MemorySink;
/// use proxy_guard::store::MemoryStore;
///
/// let supervisor = Supervisor::builder()
///     .with_settings(&Settings::default())
///     .with_logger(MemorySink::new())
///     .build(MemoryStore::new());
///
/// assert_eq!(supervisor.target().entry(), "ProxyOverride");
/// ```
pub struct SupervisorBuilder {
    target: WatchTarget,
    logger: Arc<dyn LogSink>,
    retry: RetryPolicy,
    cancel: Option<CancelToken>,
    enforce_on_start: bool,
    poll_interval: Duration,
}

impl SupervisorBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            target: WatchTarget::proxy_override(),
            logger: Arc::new(NoopSink),
            retry: RetryPolicy::default(),
            cancel: None,
            enforce_on_start: false,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Enforce a different location, entry or value.
    pub fn with_target(mut self, target: WatchTarget) -> Self {
        self.target = target;
        self
    }

    /// Send status lines to `logger` instead of discarding them.
    pub fn with_logger<L: LogSink + 'static>(mut self, logger: L) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Retry policy for arm and wait failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share an existing cancellation token, e.g. one wired to Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Reconcile once right after opening the location.
    pub fn enforce_on_start(mut self, enabled: bool) -> Self {
        self.enforce_on_start = enabled;
        self
    }

    /// How often retry sleeps check for cancellation.
    ///
    /// Backends take their own poll interval for blocking waits. Intervals
    /// shorter than [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Apply runtime settings: retry policy, start-up enforcement and poll interval.
    pub fn with_settings(self, settings: &Settings) -> Self {
        self.with_retry(settings.retry_policy())
            .enforce_on_start(settings.enforce_on_start)
            .with_poll_interval(settings.poll_interval())
    }

    /// Build a supervisor over `backend`. Nothing is opened until `run`.
    pub fn build<B>(self, backend: B) -> Supervisor<B>
    where
        B: ConfigStore + ChangeNotifier<Location = <B as ConfigStore>::Location>,
    {
        Supervisor::from_parts(
            backend,
            self.target,
            self.logger,
            self.retry,
            self.cancel.unwrap_or_default(),
            self.enforce_on_start,
            self.poll_interval,
        )
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
