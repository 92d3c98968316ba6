//! Configuration store backends.

mod memory;

#[cfg(windows)]
mod registry;

pub use memory::{MemoryLocation, MemoryStats, MemoryStore, MemoryWatch};

#[cfg(windows)]
pub use registry::{EventHandle, RegistryKey, RegistryStore};

use crate::error::Result;
use crate::policy::ObservedValue;
use crate::target::Hive;

/// Access to a hierarchical configuration store.
///
/// Implement this trait (together with
/// [`ChangeNotifier`](crate::notify::ChangeNotifier)) to enforce a value in a
/// different store.
pub trait ConfigStore {
    /// Handle to an open location. Obtained once and reused by the supervisor.
    type Location;

    /// Open `path` below `hive` with read, write and notify rights together.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Access`](crate::error::WatchError::Access) if the
    /// location does not exist or the rights cannot be granted.
    fn open(&self, hive: Hive, path: &str) -> Result<Self::Location>;

    /// Read entry `name`.
    ///
    /// A missing entry is [`ObservedValue::Absent`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Read`](crate::error::WatchError::Read) on any other fault.
    fn read(&self, location: &Self::Location, name: &str) -> Result<ObservedValue>;

    /// Create or overwrite entry `name` with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Write`](crate::error::WatchError::Write) on I/O faults or
    /// insufficient rights.
    fn write(&self, location: &Self::Location, name: &str, value: &str) -> Result<()>;

    /// Release the location. Called exactly once per successful `open`.
    fn close(&self, location: Self::Location);
}
