//! The watch-and-enforce loop.

use crate::core::status::{
    StatusHandle, SupervisorState, Termination, TerminationReason, WatchStats,
};
use crate::core::{RetryPolicy, SupervisorBuilder};
use crate::error::Result;
use crate::logging::{LogLevel, LogSink};
use crate::notify::{CancelToken, ChangeNotifier, WaitOutcome};
use crate::policy::{Action, ObservedValue, decide};
use crate::store::ConfigStore;
use crate::target::WatchTarget;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// What a reconciliation cycle changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The entry already held the desired value.
    Unchanged,
    /// The entry was absent and has been created.
    Created,
    /// The entry held a foreign value and has been overwritten.
    Restored {
        /// The value that was replaced
        previous: String,
    },
}

/// Read the entry, decide, and write the desired value if it differs.
///
/// # Errors
///
/// Returns the read or write error unchanged; callers decide whether it is fatal.
pub fn reconcile<S: ConfigStore + ?Sized>(
    store: &S,
    location: &S::Location,
    target: &WatchTarget,
    log: &dyn LogSink,
) -> Result<Reconciled> {
    let observed = store.read(location, target.entry())?;
    log.emit(
        LogLevel::Debug,
        &format!("Current value of {}: {}", target.entry(), observed),
    );

    match decide(&observed, target.desired()) {
        Action::NoOp => Ok(Reconciled::Unchanged),
        Action::Write(desired) => {
            store.write(location, target.entry(), desired.as_str())?;
            match observed {
                ObservedValue::Absent => {
                    log.emit(
                        LogLevel::Info,
                        &format!("{} was missing; set to {}", target.entry(), desired),
                    );
                    Ok(Reconciled::Created)
                }
                ObservedValue::Present(previous) => {
                    log.emit(
                        LogLevel::Info,
                        &format!(
                            "{} changed to {}; restored to {}",
                            target.entry(),
                            previous,
                            desired
                        ),
                    );
                    Ok(Reconciled::Restored { previous })
                }
            }
        }
    }
}

/// Closes the location exactly once, on every exit path.
struct OpenLocation<'a, S: ConfigStore> {
    store: &'a S,
    location: Option<S::Location>,
}

impl<'a, S: ConfigStore> OpenLocation<'a, S> {
    fn new(store: &'a S, location: S::Location) -> Self {
        Self {
            store,
            location: Some(location),
        }
    }
}

impl<S: ConfigStore> Deref for OpenLocation<'_, S> {
    type Target = S::Location;

    fn deref(&self) -> &S::Location {
        match &self.location {
            Some(location) => location,
            None => unreachable!("location is only taken on drop"),
        }
    }
}

impl<S: ConfigStore> Drop for OpenLocation<'_, S> {
    fn drop(&mut self) {
        if let Some(location) = self.location.take() {
            self.store.close(location);
        }
    }
}

/// Owns the configuration location and runs the watch loop on the calling thread.
///
/// ```text
/// Opening ─▶ Waiting ─▶ Reconciling ─▶ Waiting ─▶ … ─▶ Terminated(reason)
/// ```
///
/// Open failures terminate at once. Arm and wait failures are retried under the
/// [`RetryPolicy`] and terminate once it is exhausted. Read and write failures
/// during reconciliation are logged and the loop keeps going.
///
/// # Examples
///
/// ```rust
/// use proxy_guard::prelude::*;
/// use proxy_guard::store::MemoryStore;
/// use proxy_guard::target::Hive;
///
/// let store = MemoryStore::new();
/// store.create_location(Hive::CurrentUser, r"Software\Example");
///
/// let supervisor = Supervisor::builder()
///     .with_target(WatchTarget::new(Hive::CurrentUser, r"Software\Example", "Value", "on"))
///     .build(store);
///
/// let cancel = supervisor.cancel_token();
/// let handle = std::thread::spawn(move || supervisor.run());
/// cancel.cancel();
///
/// let termination = handle.join().unwrap();
/// assert_eq!(termination.reason, TerminationReason::Cancelled);
/// ```
pub struct Supervisor<B> {
    backend: B,
    target: WatchTarget,
    logger: Arc<dyn LogSink>,
    retry: RetryPolicy,
    cancel: CancelToken,
    status: StatusHandle,
    enforce_on_start: bool,
    poll_interval: Duration,
}

impl Supervisor<()> {
    /// Create a new builder for a supervisor.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }
}

impl<B> Supervisor<B>
where
    B: ConfigStore + ChangeNotifier<Location = <B as ConfigStore>::Location>,
{
    pub(crate) fn from_parts(
        backend: B,
        target: WatchTarget,
        logger: Arc<dyn LogSink>,
        retry: RetryPolicy,
        cancel: CancelToken,
        enforce_on_start: bool,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            target,
            logger,
            retry,
            cancel,
            status: StatusHandle::new(),
            enforce_on_start,
            poll_interval,
        }
    }

    /// Handle for observing the loop's state from another thread.
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The enforced target.
    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    fn log(&self, level: LogLevel, line: &str) {
        self.logger.emit(level, line);
    }

    /// Run until cancelled or until a fatal error.
    ///
    /// The location is closed exactly once before this returns, whichever way
    /// the loop ended.
    pub fn run(self) -> Termination {
        let mut stats = WatchStats::default();

        self.status.set(SupervisorState::Opening);
        let reason = match self.backend.open(self.target.hive(), self.target.path()) {
            Ok(location) => {
                let location = OpenLocation::new(&self.backend, location);
                self.watch(&location, &mut stats)
            }
            Err(err) => {
                self.log(LogLevel::Error, &format!("Cannot start watcher: {}", err));
                TerminationReason::Fatal(err)
            }
        };

        match &reason {
            TerminationReason::Cancelled => self.log(LogLevel::Info, "Watcher stopped"),
            TerminationReason::Fatal(err) => {
                self.log(LogLevel::Error, &format!("Watcher terminated: {}", err))
            }
        }
        self.status.set(SupervisorState::Terminated(reason.clone()));
        Termination { reason, stats }
    }

    fn watch(
        &self,
        location: &<B as ConfigStore>::Location,
        stats: &mut WatchStats,
    ) -> TerminationReason {
        self.log(LogLevel::Info, &format!("Watching {}", self.target));

        if self.enforce_on_start {
            self.status.set(SupervisorState::Reconciling);
            self.reconcile_logged(location, stats);
        }

        let mut failures = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return TerminationReason::Cancelled;
            }

            self.status.set(SupervisorState::Waiting);
            match self.next_change(location) {
                Ok(WaitOutcome::Signaled) => {
                    failures = 0;
                    stats.notifications += 1;
                    self.log(
                        LogLevel::Info,
                        &format!(
                            "Change detected in {}\\{}",
                            self.target.hive(),
                            self.target.path()
                        ),
                    );
                    self.status.set(SupervisorState::Reconciling);
                    self.reconcile_logged(location, stats);
                }
                Ok(WaitOutcome::TimedOut) => {}
                Ok(WaitOutcome::Cancelled) => return TerminationReason::Cancelled,
                Err(err) => {
                    failures += 1;
                    let delay = if err.is_retryable() {
                        self.retry.backoff(failures)
                    } else {
                        None
                    };
                    let Some(delay) = delay else {
                        return TerminationReason::Fatal(err);
                    };

                    stats.retries += 1;
                    self.log(
                        LogLevel::Warn,
                        &format!(
                            "{}; retrying in {:?} ({}/{})",
                            err,
                            delay,
                            failures,
                            self.retry.max_retries()
                        ),
                    );
                    if self.cancel.sleep(delay, self.poll_interval) {
                        return TerminationReason::Cancelled;
                    }
                }
            }
        }
    }

    /// Arm a fresh token, wait on it, and release it whatever the outcome.
    fn next_change(&self, location: &<B as ConfigStore>::Location) -> Result<WaitOutcome> {
        let mut token = self.backend.arm(location)?;
        let outcome = self.backend.wait(&mut token, None, &self.cancel);
        self.backend.release(token);
        outcome
    }

    fn reconcile_logged(&self, location: &<B as ConfigStore>::Location, stats: &mut WatchStats) {
        stats.reconciliations += 1;
        match reconcile(&self.backend, location, &self.target, self.logger.as_ref()) {
            Ok(Reconciled::Unchanged) => {
                self.log(
                    LogLevel::Debug,
                    &format!("{} already compliant", self.target.entry()),
                );
            }
            Ok(Reconciled::Created | Reconciled::Restored { .. }) => stats.writes += 1,
            Err(err) => {
                stats.transient_errors += 1;
                self.log(LogLevel::Warn, &err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::logging::MemorySink;
    use crate::store::MemoryStore;
    use crate::target::Hive;
    use std::thread;
    use std::time::Instant;

    const PATH: &str = r"Software\Test\Internet Settings";
    const ENTRY: &str = "ProxyOverride";
    const DESIRED: &str = "localhost;192.168.*.*;<local>";

    fn target() -> WatchTarget {
        WatchTarget::new(Hive::CurrentUser, PATH, ENTRY, DESIRED)
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new().with_poll_interval(Duration::from_millis(5));
        store.create_location(Hive::CurrentUser, PATH);
        store
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_reconcile_creates_absent_entry() {
        let store = store();
        let loc = store.open(Hive::CurrentUser, PATH).unwrap();

        let result = reconcile(&store, &loc, &target(), &MemorySink::new()).unwrap();
        assert_eq!(result, Reconciled::Created);
        assert_eq!(
            store.read(&loc, ENTRY).unwrap(),
            ObservedValue::Present(DESIRED.to_string())
        );
    }

    #[test]
    fn test_reconcile_self_write_converges() {
        let store = store();
        store.set_value(Hive::CurrentUser, PATH, ENTRY, "foo");
        let loc = store.open(Hive::CurrentUser, PATH).unwrap();
        let sink = MemorySink::new();

        let first = reconcile(&store, &loc, &target(), &sink).unwrap();
        assert_eq!(
            first,
            Reconciled::Restored {
                previous: "foo".to_string()
            }
        );

        let second = reconcile(&store, &loc, &target(), &sink).unwrap();
        assert_eq!(second, Reconciled::Unchanged);
        assert_eq!(store.stats().writes, 1);
    }

    #[test]
    fn test_reconcile_surfaces_read_error() {
        let store = store();
        let loc = store.open(Hive::CurrentUser, PATH).unwrap();
        store.fail_reads(1);

        let result = reconcile(&store, &loc, &target(), &MemorySink::new());
        assert!(matches!(result, Err(WatchError::Read { .. })));
        assert_eq!(store.stats().writes, 0);
    }

    #[test]
    fn test_open_failure_is_fatal_without_close() {
        let store = MemoryStore::new();
        let sink = MemorySink::new();
        let supervisor = Supervisor::builder()
            .with_target(target())
            .with_logger(sink.clone())
            .build(store.clone());
        let status = supervisor.status();

        let termination = supervisor.run();
        assert!(matches!(
            termination.reason,
            TerminationReason::Fatal(WatchError::Access { .. })
        ));
        assert!(status.is_terminated());
        assert_eq!(store.stats().closes, 0);
        assert!(sink.contains("Cannot start watcher"));
    }

    #[test]
    fn test_cancel_closes_location_once() {
        let store = store();
        let supervisor = Supervisor::builder().with_target(target()).build(store.clone());
        let cancel = supervisor.cancel_token();
        let status = supervisor.status();

        let handle = thread::spawn(move || supervisor.run());
        wait_until(|| *status.get() == SupervisorState::Waiting);
        cancel.cancel();

        let termination = handle.join().unwrap();
        assert_eq!(termination.reason, TerminationReason::Cancelled);
        let stats = store.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.arms, stats.releases);
    }

    #[test]
    fn test_enforce_on_start() {
        let store = store();
        let supervisor = Supervisor::builder()
            .with_target(target())
            .enforce_on_start(true)
            .build(store.clone());
        let cancel = supervisor.cancel_token();
        cancel.cancel();

        let termination = supervisor.run();
        assert_eq!(termination.stats.writes, 1);
        assert_eq!(
            store.value(Hive::CurrentUser, PATH, ENTRY).as_deref(),
            Some(DESIRED)
        );
    }

    #[test]
    fn test_wait_failures_retried_then_fatal() {
        let store = store();
        store.fail_waits(3);
        let supervisor = Supervisor::builder()
            .with_target(target())
            .with_retry(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                Duration::from_millis(2),
            ))
            .build(store.clone());

        let termination = supervisor.run();
        assert!(matches!(
            termination.reason,
            TerminationReason::Fatal(WatchError::Wait(_))
        ));
        assert_eq!(termination.stats.retries, 2);
        assert_eq!(store.stats().closes, 1);
        assert_eq!(store.stats().arms, store.stats().releases);
    }

    #[test]
    fn test_arm_failure_without_retry_is_fatal() {
        let store = store();
        store.fail_arms(1);
        let supervisor = Supervisor::builder()
            .with_target(target())
            .with_retry(RetryPolicy::no_retry())
            .build(store.clone());

        let termination = supervisor.run();
        assert!(matches!(
            termination.reason,
            TerminationReason::Fatal(WatchError::Arm(_))
        ));
        assert_eq!(termination.stats.retries, 0);
        assert_eq!(store.stats().closes, 1);
    }

    #[test]
    fn test_cancel_during_retry_backoff() {
        let store = store();
        store.fail_arms(1);
        let sink = MemorySink::new();
        let supervisor = Supervisor::builder()
            .with_target(target())
            .with_logger(sink.clone())
            .with_retry(RetryPolicy::new(
                3,
                Duration::from_secs(30),
                Duration::from_secs(30),
            ))
            .with_poll_interval(Duration::from_millis(5))
            .build(store.clone());
        let cancel = supervisor.cancel_token();

        let start = Instant::now();
        let handle = thread::spawn(move || supervisor.run());
        wait_until(|| sink.contains("retrying in"));
        cancel.cancel();

        let termination = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(termination.reason, TerminationReason::Cancelled);
        assert_eq!(termination.stats.retries, 1);
        let stats = store.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
        // The failed registration is the only attempt
        assert_eq!(stats.arms, 0);
    }

    #[test]
    fn test_recovers_after_transient_arm_failure() {
        let store = store();
        store.fail_arms(1);
        let supervisor = Supervisor::builder()
            .with_target(target())
            .with_retry(RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(1),
            ))
            .build(store.clone());
        let cancel = supervisor.cancel_token();
        let status = supervisor.status();

        let handle = thread::spawn(move || supervisor.run());
        wait_until(|| store.stats().arms >= 1 && *status.get() == SupervisorState::Waiting);

        store.set_value(Hive::CurrentUser, PATH, ENTRY, "foo");
        wait_until(|| store.value(Hive::CurrentUser, PATH, ENTRY).as_deref() == Some(DESIRED));
        cancel.cancel();

        let termination = handle.join().unwrap();
        assert_eq!(termination.reason, TerminationReason::Cancelled);
        assert_eq!(termination.stats.retries, 1);
        assert_eq!(termination.stats.writes, 1);
    }
}
