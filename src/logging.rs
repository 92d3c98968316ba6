//! Injected line logger.
//!
//! Every component reports one-line status and error messages through a
//! [`LogSink`]. The default sink discards everything, so muting output never
//! changes watcher behavior.

use std::sync::{Arc, Mutex};

/// Severity attached to an emitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Verbose progress, e.g. a value that already matches.
    Debug,
    /// Normal status, e.g. a notification or a successful rewrite.
    Info,
    /// A transient failure the loop recovers from.
    Warn,
    /// A failure that ends the watcher.
    Error,
}

/// Receiver of status lines.
pub trait LogSink: Send + Sync {
    /// Emit a single line.
    fn emit(&self, level: LogLevel, line: &str);
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn emit(&self, level: LogLevel, line: &str) {
        (**self).emit(level, line)
    }
}

/// Discards every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn emit(&self, _level: LogLevel, _line: &str) {}
}

/// Forwards lines to `tracing` events under the `proxy_guard` target.
#[cfg(feature = "tracing")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[cfg(feature = "tracing")]
impl LogSink for TracingSink {
    fn emit(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "proxy_guard", "{}", line),
            LogLevel::Info => tracing::info!(target: "proxy_guard", "{}", line),
            LogLevel::Warn => tracing::warn!(target: "proxy_guard", "{}", line),
            LogLevel::Error => tracing::error!(target: "proxy_guard", "{}", line),
        }
    }
}

/// Keeps every line in memory. Useful in tests and for embedding hosts that
/// want to show recent activity.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines captured so far.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of captured lines at `level`.
    pub fn count(&self, level: LogLevel) -> usize {
        self.lines().iter().filter(|(l, _)| *l == level).count()
    }

    /// Whether any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn emit(&self, level: LogLevel, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push((level, line.to_string()));
    }
}
