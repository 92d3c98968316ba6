//! Runtime settings.
//!
//! Settings tune how the watcher runs, never what it enforces: the location,
//! entry and pinned value are compiled in (see [`crate::target`]).
//!
//! Sources are merged in order, later ones overriding earlier ones:
//! built-in defaults, an optional settings file, then `PROXY_GUARD_*`
//! environment variables (`__` separates nested keys, e.g.
//! `PROXY_GUARD_RETRY__MAX_RETRIES=5`).

use crate::core::RetryPolicy;
use crate::error::{Result, WatchError};
use config::{Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PROXY_GUARD";

/// Retry behavior for notification subsystem failures.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after an arm or wait failure before the watcher terminates.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Randomize each delay by up to a quarter of its length.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            jitter: true,
        }
    }
}

/// Watcher runtime settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Print the banner and forward status lines to the log.
    pub verbose: bool,
    /// `tracing-subscriber` filter directive used by the binary.
    pub log_filter: String,
    /// Reconcile once right after opening, before the first change.
    pub enforce_on_start: bool,
    /// How often blocking waits check for cancellation, in milliseconds.
    pub poll_interval_ms: u64,
    /// Notification failure retries.
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: true,
            log_filter: "info".to_string(),
            enforce_on_start: false,
            poll_interval_ms: 100,
            retry: RetrySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Settings`] if the file is missing, has an unsupported
    /// extension, cannot be parsed, or the merged values fail validation.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            validate_extension(path)?;
            if !path.exists() {
                return Err(WatchError::Settings(format!(
                    "Settings file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Settings`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(WatchError::Settings(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(WatchError::Settings(format!(
                "retry.max_backoff_ms ({}) must be >= retry.initial_backoff_ms ({})",
                self.retry.max_backoff_ms, self.retry.initial_backoff_ms
            )));
        }
        Ok(())
    }

    /// Cancellation poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry policy for the supervisor.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
        .with_jitter(self.retry.jitter)
    }
}

fn validate_extension(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            WatchError::Settings(format!(
                "Unable to determine file format for: {}",
                path.display()
            ))
        })?;

    match extension {
        "yaml" | "yml" | "toml" | "json" => Ok(()),
        _ => Err(WatchError::Settings(format!(
            "Unsupported file extension: {}. Supported: .yaml, .yml, .toml, .json",
            extension
        ))),
    }
}
