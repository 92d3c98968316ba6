//! End-to-end enforcement scenarios driven through the in-memory backend.

use proxy_guard::logging::{LogLevel, MemorySink};
use proxy_guard::notify::{ChangeNotifier, WaitOutcome};
use proxy_guard::prelude::*;
use proxy_guard::store::{ConfigStore, MemoryStore};
use proxy_guard::target::{
    DEFAULT_PROXY_OVERRIDE, Hive, INTERNET_SETTINGS_PATH, PROXY_OVERRIDE_NAME,
};
use std::thread;
use std::time::{Duration, Instant};

struct Harness {
    store: MemoryStore,
    sink: MemorySink,
    status: StatusHandle,
    cancel: CancelToken,
    handle: thread::JoinHandle<Termination>,
}

impl Harness {
    fn start(store: MemoryStore, retry: RetryPolicy) -> Self {
        let sink = MemorySink::new();
        let supervisor = Supervisor::builder()
            .with_logger(sink.clone())
            .with_retry(retry)
            .with_poll_interval(Duration::from_millis(5))
            .build(store.clone());
        let status = supervisor.status();
        let cancel = supervisor.cancel_token();
        let handle = thread::spawn(move || supervisor.run());

        let harness = Self {
            store,
            sink,
            status,
            cancel,
            handle,
        };
        harness.wait_for_arms(1);
        harness
    }

    /// Block until the supervisor has armed `count` tokens in total and is waiting.
    fn wait_for_arms(&self, count: usize) {
        wait_until(|| {
            self.store.stats().arms >= count && *self.status.get() == SupervisorState::Waiting
        });
    }

    fn external_write(&self, value: &str) {
        self.store.set_value(
            Hive::CurrentUser,
            INTERNET_SETTINGS_PATH,
            PROXY_OVERRIDE_NAME,
            value,
        );
    }

    fn current(&self) -> Option<String> {
        self.store
            .value(Hive::CurrentUser, INTERNET_SETTINGS_PATH, PROXY_OVERRIDE_NAME)
    }

    fn stop(self) -> (Termination, MemoryStore, MemorySink) {
        self.cancel.cancel();
        let termination = self.handle.join().unwrap();
        (termination, self.store, self.sink)
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn fast_store() -> MemoryStore {
    let store = MemoryStore::new().with_poll_interval(Duration::from_millis(5));
    store.create_location(Hive::CurrentUser, INTERNET_SETTINGS_PATH);
    store
}

#[test]
fn test_foreign_value_is_restored() {
    let harness = Harness::start(fast_store(), RetryPolicy::no_retry());
    assert_eq!(harness.current(), None);

    harness.external_write("foo");
    wait_until(|| harness.current().as_deref() == Some(DEFAULT_PROXY_OVERRIDE));

    let (termination, store, sink) = harness.stop();
    assert_eq!(termination.reason, TerminationReason::Cancelled);
    assert_eq!(termination.stats.writes, 1);
    assert_eq!(store.stats().writes, 1);
    assert!(sink.contains("restored to localhost;192.168.*.*;<local>"));
}

#[test]
fn test_same_value_rewrite_is_noop() {
    let store = fast_store();
    store.set_value(
        Hive::CurrentUser,
        INTERNET_SETTINGS_PATH,
        PROXY_OVERRIDE_NAME,
        DEFAULT_PROXY_OVERRIDE,
    );
    let harness = Harness::start(store, RetryPolicy::no_retry());

    harness.external_write(DEFAULT_PROXY_OVERRIDE);
    // Reconciliation finishes before the next arm
    harness.wait_for_arms(2);

    let (termination, store, _) = harness.stop();
    assert_eq!(termination.stats.notifications, 1);
    assert_eq!(termination.stats.reconciliations, 1);
    assert_eq!(termination.stats.writes, 0);
    assert_eq!(store.stats().writes, 0);
}

#[test]
fn test_deleted_entry_is_recreated() {
    let store = fast_store();
    store.set_value(
        Hive::CurrentUser,
        INTERNET_SETTINGS_PATH,
        PROXY_OVERRIDE_NAME,
        DEFAULT_PROXY_OVERRIDE,
    );
    let harness = Harness::start(store, RetryPolicy::no_retry());

    harness
        .store
        .delete_value(Hive::CurrentUser, INTERNET_SETTINGS_PATH, PROXY_OVERRIDE_NAME);
    wait_until(|| harness.current().as_deref() == Some(DEFAULT_PROXY_OVERRIDE));

    let (termination, _, sink) = harness.stop();
    assert_eq!(termination.stats.writes, 1);
    assert!(sink.contains("was missing"));
}

#[test]
fn test_every_notification_is_rearmed() {
    let harness = Harness::start(fast_store(), RetryPolicy::no_retry());

    for (round, value) in ["one", "two", "three"].into_iter().enumerate() {
        harness.external_write(value);
        wait_until(|| harness.current().as_deref() == Some(DEFAULT_PROXY_OVERRIDE));
        harness.wait_for_arms(round + 2);
    }

    let (termination, store, _) = harness.stop();
    assert_eq!(termination.stats.writes, 3);
    let stats = store.stats();
    assert_eq!(stats.arms, stats.releases);
    assert_eq!(stats.closes, 1);
}

#[test]
fn test_read_error_is_transient() {
    let store = fast_store();
    store.fail_reads(1);
    let harness = Harness::start(store, RetryPolicy::no_retry());

    harness.external_write("foo");
    harness.wait_for_arms(2);
    assert_eq!(*harness.status.get(), SupervisorState::Waiting);
    assert_eq!(harness.current().as_deref(), Some("foo"));

    // The next change heals the entry
    harness.external_write("bar");
    wait_until(|| harness.current().as_deref() == Some(DEFAULT_PROXY_OVERRIDE));

    let (termination, _, sink) = harness.stop();
    assert_eq!(termination.reason, TerminationReason::Cancelled);
    assert_eq!(termination.stats.transient_errors, 1);
    assert_eq!(sink.count(LogLevel::Warn), 1);
}

#[test]
fn test_write_error_is_transient() {
    let store = fast_store();
    store.fail_writes(1);
    let harness = Harness::start(store, RetryPolicy::no_retry());

    harness.external_write("foo");
    harness.wait_for_arms(2);
    assert!(!harness.status.is_terminated());

    harness.external_write("foo");
    wait_until(|| harness.current().as_deref() == Some(DEFAULT_PROXY_OVERRIDE));

    let (termination, _, _) = harness.stop();
    assert_eq!(termination.stats.transient_errors, 1);
    assert_eq!(termination.stats.writes, 1);
}

#[test]
fn test_wait_error_terminates() {
    let store = fast_store();
    let harness = Harness::start(store, RetryPolicy::no_retry());

    harness.store.fail_waits(1);
    harness.external_write("foo");
    wait_until(|| harness.status.is_terminated());

    let status = harness.status.get();
    assert!(matches!(
        &*status,
        SupervisorState::Terminated(TerminationReason::Fatal(WatchError::Wait(_)))
    ));

    let (termination, store, sink) = harness.stop();
    assert!(termination.reason.is_fatal());
    assert_eq!(store.stats().closes, 1);
    assert!(sink.contains("Watcher terminated"));
}

#[test]
fn test_cancel_during_wait() {
    let harness = Harness::start(fast_store(), RetryPolicy::default());

    let (termination, store, sink) = harness.stop();
    assert_eq!(termination.reason, TerminationReason::Cancelled);
    assert_eq!(termination.stats.notifications, 0);
    assert_eq!(store.stats().closes, 1);
    assert!(sink.contains("Watcher stopped"));
}

#[test]
fn test_spent_token_cannot_be_waited_twice() {
    let store = fast_store();
    let loc = store.open(Hive::CurrentUser, INTERNET_SETTINGS_PATH).unwrap();
    let cancel = CancelToken::new();

    let mut token = store.arm(&loc).unwrap();
    store.set_value(Hive::CurrentUser, INTERNET_SETTINGS_PATH, PROXY_OVERRIDE_NAME, "foo");
    assert_eq!(
        store.wait(&mut token, None, &cancel).unwrap(),
        WaitOutcome::Signaled
    );
    assert_eq!(
        store.wait(&mut token, Some(Duration::from_millis(10)), &cancel),
        Err(WatchError::TokenSpent)
    );
    store.release(token);
    store.close(loc);
}

#[tokio::test]
async fn test_host_style_spawn_blocking() {
    let store = fast_store();
    let cancel = CancelToken::new();
    let supervisor = Supervisor::builder()
        .with_cancel(cancel.clone())
        .with_poll_interval(Duration::from_millis(5))
        .build(store.clone());
    let status = supervisor.status();

    let watcher = tokio::task::spawn_blocking(move || supervisor.run());
    while *status.get() != SupervisorState::Waiting {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    store.set_value(Hive::CurrentUser, INTERNET_SETTINGS_PATH, PROXY_OVERRIDE_NAME, "foo");
    let restored = tokio::time::timeout(Duration::from_secs(5), async {
        while store
            .value(Hive::CurrentUser, INTERNET_SETTINGS_PATH, PROXY_OVERRIDE_NAME)
            .as_deref()
            != Some(DEFAULT_PROXY_OVERRIDE)
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(restored.is_ok());

    cancel.cancel();
    let termination = watcher.await.unwrap();
    assert_eq!(termination.reason, TerminationReason::Cancelled);
}
