//! In-process configuration store.
//!
//! Mirrors the registry model closely enough to drive the supervisor in tests and
//! on hosts without a registry: locations are case-insensitive paths, every set
//! or delete of a value bumps that location's change generation, and an armed
//! token fires once when the generation moves past the one it captured.

use crate::error::{Result, WatchError};
use crate::notify::{
    CancelToken, ChangeNotifier, MIN_POLL_INTERVAL, NotificationToken, WaitOutcome,
};
use crate::policy::ObservedValue;
use crate::store::ConfigStore;
use crate::target::Hive;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default slice between cancellation checks while waiting.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Open location in a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLocation {
    key: String,
}

/// Pending change registration in a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWatch {
    key: String,
    generation: u64,
}

/// Call counters, for asserting on what the supervisor did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Successful opens
    pub opens: usize,
    /// Closes
    pub closes: usize,
    /// Read calls, including failed ones
    pub reads: usize,
    /// Write calls, including failed ones
    pub writes: usize,
    /// Successful arms
    pub arms: usize,
    /// Wait calls, including failed ones
    pub waits: usize,
    /// Released tokens
    pub releases: usize,
}

#[derive(Debug, Default)]
struct KeyState {
    values: HashMap<String, String>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Faults {
    deny_open: bool,
    read_failures: u32,
    write_failures: u32,
    arm_failures: u32,
    wait_failures: u32,
}

#[derive(Debug, Default)]
struct State {
    keys: HashMap<String, KeyState>,
    faults: Faults,
    stats: MemoryStats,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

/// Thread-safe in-memory store. Clones share the same data, so a test can hand
/// one clone to the supervisor and act as the external writer through another.
///
/// # Examples
///
/// ```rust
/// use proxy_guard::store::{ConfigStore, MemoryStore};
/// use proxy_guard::policy::ObservedValue;
/// use proxy_guard::target::Hive;
///
/// let store = MemoryStore::new();
/// store.create_location(Hive::CurrentUser, r"Software\Example");
///
/// let loc = store.open(Hive::CurrentUser, r"Software\Example").unwrap();
/// assert_eq!(store.read(&loc, "Value").unwrap(), ObservedValue::Absent);
/// store.close(loc);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    poll_interval: Duration,
}

fn key_of(hive: Hive, path: &str) -> String {
    format!("{}\\{}", hive, path.trim_matches('\\')).to_ascii_lowercase()
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often a blocking wait checks for cancellation.
    ///
    /// Intervals shorter than [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create an empty location if it does not exist yet.
    pub fn create_location(&self, hive: Hive, path: &str) {
        self.lock().keys.entry(key_of(hive, path)).or_default();
    }

    /// Set a value as an outside writer would, creating the location if needed.
    ///
    /// Fires pending notifications on that location only.
    pub fn set_value(&self, hive: Hive, path: &str, name: &str, value: &str) {
        let mut state = self.lock();
        let key = state.keys.entry(key_of(hive, path)).or_default();
        key.values.insert(name.to_ascii_lowercase(), value.to_string());
        key.generation += 1;
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Delete a value as an outside writer would. Returns whether it existed.
    pub fn delete_value(&self, hive: Hive, path: &str, name: &str) -> bool {
        let mut state = self.lock();
        let Some(key) = state.keys.get_mut(&key_of(hive, path)) else {
            return false;
        };
        let existed = key.values.remove(&name.to_ascii_lowercase()).is_some();
        if existed {
            key.generation += 1;
        }
        drop(state);
        self.shared.changed.notify_all();
        existed
    }

    /// Current value of an entry, bypassing fault injection and counters.
    pub fn value(&self, hive: Hive, path: &str, name: &str) -> Option<String> {
        self.lock()
            .keys
            .get(&key_of(hive, path))
            .and_then(|key| key.values.get(&name.to_ascii_lowercase()).cloned())
    }

    /// Refuse every subsequent open.
    pub fn deny_open(&self) {
        self.lock().faults.deny_open = true;
    }

    /// Fail the next `count` reads.
    pub fn fail_reads(&self, count: u32) {
        self.lock().faults.read_failures = count;
    }

    /// Fail the next `count` writes.
    pub fn fail_writes(&self, count: u32) {
        self.lock().faults.write_failures = count;
    }

    /// Reject the next `count` arms.
    pub fn fail_arms(&self, count: u32) {
        self.lock().faults.arm_failures = count;
    }

    /// Fail the next `count` waits.
    pub fn fail_waits(&self, count: u32) {
        self.lock().faults.wait_failures = count;
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn take_fault(remaining: &mut u32) -> bool {
    if *remaining == 0 {
        return false;
    }
    *remaining -= 1;
    true
}

impl ConfigStore for MemoryStore {
    type Location = MemoryLocation;

    fn open(&self, hive: Hive, path: &str) -> Result<MemoryLocation> {
        let mut state = self.lock();
        let display = format!("{}\\{}", hive, path);
        if state.faults.deny_open {
            return Err(WatchError::access(display, "access denied"));
        }
        let key = key_of(hive, path);
        if !state.keys.contains_key(&key) {
            return Err(WatchError::access(display, "location not found"));
        }
        state.stats.opens += 1;
        Ok(MemoryLocation { key })
    }

    fn read(&self, location: &MemoryLocation, name: &str) -> Result<ObservedValue> {
        let mut state = self.lock();
        state.stats.reads += 1;
        if take_fault(&mut state.faults.read_failures) {
            return Err(WatchError::read(name, "simulated read fault"));
        }
        let key = state
            .keys
            .get(&location.key)
            .ok_or_else(|| WatchError::read(name, "location was removed"))?;
        Ok(match key.values.get(&name.to_ascii_lowercase()) {
            Some(value) => ObservedValue::Present(value.clone()),
            None => ObservedValue::Absent,
        })
    }

    fn write(&self, location: &MemoryLocation, name: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.stats.writes += 1;
        if take_fault(&mut state.faults.write_failures) {
            return Err(WatchError::write(name, "simulated write fault"));
        }
        let key = state
            .keys
            .get_mut(&location.key)
            .ok_or_else(|| WatchError::write(name, "location was removed"))?;
        key.values.insert(name.to_ascii_lowercase(), value.to_string());
        key.generation += 1;
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn close(&self, _location: MemoryLocation) {
        self.lock().stats.closes += 1;
    }
}

impl ChangeNotifier for MemoryStore {
    type Location = MemoryLocation;
    type Handle = MemoryWatch;

    fn arm(&self, location: &MemoryLocation) -> Result<NotificationToken<MemoryWatch>> {
        let mut state = self.lock();
        if take_fault(&mut state.faults.arm_failures) {
            return Err(WatchError::Arm("simulated registration failure".to_string()));
        }
        let generation = state
            .keys
            .get(&location.key)
            .map(|key| key.generation)
            .ok_or_else(|| WatchError::Arm("location was removed".to_string()))?;
        state.stats.arms += 1;
        Ok(NotificationToken::new(MemoryWatch {
            key: location.key.clone(),
            generation,
        }))
    }

    fn wait(
        &self,
        token: &mut NotificationToken<MemoryWatch>,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome> {
        let mut state = self.lock();
        state.stats.waits += 1;
        token.ensure_armed()?;
        if take_fault(&mut state.faults.wait_failures) {
            return Err(WatchError::Wait("simulated wait failure".to_string()));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let watch = token.handle().clone();
        loop {
            let current = state
                .keys
                .get(&watch.key)
                .map(|key| key.generation)
                .ok_or_else(|| WatchError::Wait("location was removed".to_string()))?;
            if current > watch.generation {
                token.mark_spent();
                return Ok(WaitOutcome::Signaled);
            }
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }

            let mut slice = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(WaitOutcome::TimedOut);
                }
                slice = slice.min(deadline - now);
            }

            state = match self.shared.changed.wait_timeout(state, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn release(&self, _token: NotificationToken<MemoryWatch>) {
        self.lock().stats.releases += 1;
    }
}
