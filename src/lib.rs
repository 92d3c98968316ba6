//! # proxy-guard
//!
//! Keeps a single configuration entry pinned to a fixed value. The shipped
//! deployment watches
//! `HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\Internet Settings`
//! and restores `ProxyOverride` to `localhost;192.168.*.*;<local>` whenever
//! something else changes it.
//!
//! ## Overview
//!
//! A [`Supervisor`](core::Supervisor) opens the location once, then loops:
//! arm a one-shot change notification, block until it fires, read the entry,
//! and rewrite it if it differs from the pinned value.
//!
//! - Backends implement [`ConfigStore`](store::ConfigStore) and
//!   [`ChangeNotifier`](notify::ChangeNotifier). The registry backend is
//!   available on Windows; [`MemoryStore`](store::MemoryStore) works everywhere.
//! - Status lines go to an injected [`LogSink`](logging::LogSink), muted by default.
//! - The loop stops cleanly when its [`CancelToken`](notify::CancelToken) is raised.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proxy_guard::prelude::*;
//! use proxy_guard::store::MemoryStore;
//!
//! # fn example() -> proxy_guard::error::Result<()> {
//! let settings = Settings::load(None)?;
//! let supervisor = Supervisor::builder()
//!     .with_settings(&settings)
//!     .build(MemoryStore::new());
//!
//! let status = supervisor.status();
//! let handle = std::thread::spawn(move || supervisor.run());
//!
//! println!("watcher state: {:?}", status.get());
//! let termination = handle.join().expect("watcher panicked");
//! println!("watcher ended: {}", termination.reason);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tracing` (default): enables [`TracingSink`](logging::TracingSink) and the
//!   `proxy-guard` binary.

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod logging;
pub mod notify;
pub mod policy;
pub mod settings;
pub mod store;
pub mod target;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        RetryPolicy, StatusHandle, Supervisor, SupervisorBuilder, SupervisorState, Termination,
        TerminationReason,
    };
    pub use crate::error::{Result, WatchError};
    pub use crate::logging::{LogLevel, LogSink, NoopSink};
    pub use crate::notify::CancelToken;
    pub use crate::settings::Settings;
    pub use crate::target::WatchTarget;

    #[cfg(feature = "tracing")]
    pub use crate::logging::TracingSink;
}
