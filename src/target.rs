//! The watched location, entry name and pinned value.

use crate::policy::DesiredValue;
use std::fmt;

/// Value written to `ProxyOverride` whenever it drifts.
pub const DEFAULT_PROXY_OVERRIDE: &str = "localhost;192.168.*.*;<local>";

/// Key holding the per-user WinINet proxy settings.
pub const INTERNET_SETTINGS_PATH: &str =
    r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

/// Entry listing hosts that bypass the proxy.
pub const PROXY_OVERRIDE_NAME: &str = "ProxyOverride";

/// Root hive the location path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hive {
    /// `HKEY_CURRENT_USER`
    CurrentUser,
    /// `HKEY_LOCAL_MACHINE`
    LocalMachine,
}

impl fmt::Display for Hive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentUser => f.write_str("HKEY_CURRENT_USER"),
            Self::LocalMachine => f.write_str("HKEY_LOCAL_MACHINE"),
        }
    }
}

/// A configuration location plus the single entry inside it that is enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    hive: Hive,
    path: String,
    entry: String,
    desired: DesiredValue,
}

impl WatchTarget {
    /// Build a target from its parts.
    pub fn new(
        hive: Hive,
        path: impl Into<String>,
        entry: impl Into<String>,
        desired: impl Into<String>,
    ) -> Self {
        Self {
            hive,
            path: path.into(),
            entry: entry.into(),
            desired: DesiredValue::new(desired.into()),
        }
    }

    /// `HKCU\...\Internet Settings\ProxyOverride` pinned to [`DEFAULT_PROXY_OVERRIDE`].
    pub fn proxy_override() -> Self {
        Self::new(
            Hive::CurrentUser,
            INTERNET_SETTINGS_PATH,
            PROXY_OVERRIDE_NAME,
            DEFAULT_PROXY_OVERRIDE,
        )
    }

    /// Root hive.
    pub fn hive(&self) -> Hive {
        self.hive
    }

    /// Location path below the hive.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entry name inside the location.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Pinned value.
    pub fn desired(&self) -> &DesiredValue {
        &self.desired
    }
}

impl Default for WatchTarget {
    fn default() -> Self {
        Self::proxy_override()
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}\\{}", self.hive, self.path, self.entry)
    }
}
