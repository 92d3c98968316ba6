//! Windows registry backend.
//!
//! Locations are registry keys opened with `KEY_NOTIFY | KEY_READ | KEY_WRITE`.
//! Notifications use `RegNotifyChangeKeyValue` with `REG_NOTIFY_CHANGE_LAST_SET`
//! on an auto-reset event, which fires once per registration.

#![allow(unsafe_code)]

use crate::error::{Result, WatchError};
use crate::notify::{
    CancelToken, ChangeNotifier, MIN_POLL_INTERVAL, NotificationToken, WaitOutcome,
};
use crate::policy::ObservedValue;
use crate::store::ConfigStore;
use crate::target::Hive;
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::time::{Duration, Instant};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_SUCCESS, HANDLE, WAIT_FAILED,
    WAIT_OBJECT_0, WAIT_TIMEOUT, WIN32_ERROR,
};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_NOTIFY, KEY_READ, KEY_WRITE,
    REG_EXPAND_SZ, REG_NOTIFY_CHANGE_LAST_SET, REG_SZ, REG_VALUE_TYPE, RegCloseKey,
    RegNotifyChangeKeyValue, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

/// Default slice between cancellation checks while waiting.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Attempts at sizing a value that keeps growing between queries.
const READ_ATTEMPTS: usize = 4;

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn os_error(code: WIN32_ERROR) -> io::Error {
    io::Error::from_raw_os_error(code as i32)
}

fn root_key(hive: Hive) -> HKEY {
    match hive {
        Hive::CurrentUser => HKEY_CURRENT_USER,
        Hive::LocalMachine => HKEY_LOCAL_MACHINE,
    }
}

/// An open registry key.
#[derive(Debug)]
pub struct RegistryKey {
    hkey: HKEY,
    path: String,
}

impl RegistryKey {
    /// Display path of the key, including the hive.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Auto-reset event signalled by a change registration. Closed on drop.
#[derive(Debug)]
pub struct EventHandle(HANDLE);

impl Drop for EventHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from CreateEventW and is closed only here.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Registry-backed [`ConfigStore`] and [`ChangeNotifier`].
#[derive(Debug, Clone)]
pub struct RegistryStore {
    poll_interval: Duration,
}

impl RegistryStore {
    /// Create a backend with the default cancellation poll interval.
    pub fn new() -> Self {
        Self {
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
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for RegistryStore {
    type Location = RegistryKey;

    fn open(&self, hive: Hive, path: &str) -> Result<RegistryKey> {
        let display = format!("{}\\{}", hive, path);
        let path_w = wide(path);
        let mut hkey: HKEY = ptr::null_mut();

        // SAFETY: path_w is NUL-terminated and hkey is a valid out pointer.
        let status = unsafe {
            RegOpenKeyExW(
                root_key(hive),
                path_w.as_ptr(),
                0,
                KEY_NOTIFY | KEY_READ | KEY_WRITE,
                &mut hkey,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(WatchError::access(display, os_error(status)));
        }

        Ok(RegistryKey {
            hkey,
            path: display,
        })
    }

    fn read(&self, location: &RegistryKey, name: &str) -> Result<ObservedValue> {
        let name_w = wide(name);

        for _ in 0..READ_ATTEMPTS {
            let mut value_type: REG_VALUE_TYPE = 0;
            let mut size: u32 = 0;

            // SAFETY: a null data pointer asks only for the type and byte size.
            let status = unsafe {
                RegQueryValueExW(
                    location.hkey,
                    name_w.as_ptr(),
                    ptr::null(),
                    &mut value_type,
                    ptr::null_mut(),
                    &mut size,
                )
            };
            if status == ERROR_FILE_NOT_FOUND {
                return Ok(ObservedValue::Absent);
            }
            if status != ERROR_SUCCESS {
                return Err(WatchError::read(name, os_error(status)));
            }
            if value_type != REG_SZ && value_type != REG_EXPAND_SZ {
                return Err(WatchError::read(
                    name,
                    format!("unexpected value type {}", value_type),
                ));
            }

            let mut buf = vec![0u16; (size as usize).div_ceil(2) + 1];
            let mut len = (buf.len() * 2) as u32;

            // SAFETY: buf holds len bytes and outlives the call.
            let status = unsafe {
                RegQueryValueExW(
                    location.hkey,
                    name_w.as_ptr(),
                    ptr::null(),
                    &mut value_type,
                    buf.as_mut_ptr().cast(),
                    &mut len,
                )
            };
            match status {
                ERROR_SUCCESS => {
                    buf.truncate(len as usize / 2);
                    while buf.last() == Some(&0) {
                        buf.pop();
                    }
                    return String::from_utf16(&buf)
                        .map(ObservedValue::Present)
                        .map_err(|e| WatchError::read(name, e));
                }
                ERROR_MORE_DATA => continue,
                ERROR_FILE_NOT_FOUND => return Ok(ObservedValue::Absent),
                other => return Err(WatchError::read(name, os_error(other))),
            }
        }

        Err(WatchError::read(name, "value kept growing while being read"))
    }

    fn write(&self, location: &RegistryKey, name: &str, value: &str) -> Result<()> {
        let name_w = wide(name);
        let value_w = wide(value);
        let bytes = u32::try_from(value_w.len() * 2)
            .map_err(|_| WatchError::write(name, "value too large"))?;

        // SAFETY: value_w is NUL-terminated and `bytes` covers it exactly.
        let status = unsafe {
            RegSetValueExW(
                location.hkey,
                name_w.as_ptr(),
                0,
                REG_SZ,
                value_w.as_ptr().cast(),
                bytes,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(WatchError::write(name, os_error(status)));
        }
        Ok(())
    }

    fn close(&self, location: RegistryKey) {
        // SAFETY: the key was opened by `open` and ownership ends here.
        unsafe {
            RegCloseKey(location.hkey);
        }
    }
}

impl ChangeNotifier for RegistryStore {
    type Location = RegistryKey;
    type Handle = EventHandle;

    fn arm(&self, location: &RegistryKey) -> Result<NotificationToken<EventHandle>> {
        // SAFETY: default security, auto-reset, initially unsignalled, unnamed.
        let raw = unsafe { CreateEventW(ptr::null(), 0, 0, ptr::null()) };
        if raw.is_null() {
            return Err(WatchError::Arm(format!(
                "failed to create event: {}",
                io::Error::last_os_error()
            )));
        }
        let event = EventHandle(raw);

        // SAFETY: both the key and the event are live for the call.
        let status = unsafe {
            RegNotifyChangeKeyValue(location.hkey, 0, REG_NOTIFY_CHANGE_LAST_SET, event.0, 1)
        };
        if status != ERROR_SUCCESS {
            return Err(WatchError::Arm(os_error(status).to_string()));
        }

        Ok(NotificationToken::new(event))
    }

    fn wait(
        &self,
        token: &mut NotificationToken<EventHandle>,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome> {
        token.ensure_armed()?;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
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
            let millis = u32::try_from(slice.as_millis()).unwrap_or(u32::MAX).max(1);

            // SAFETY: the event handle is owned by the token and still open.
            let result = unsafe { WaitForSingleObject(token.handle().0, millis) };
            match result {
                WAIT_OBJECT_0 => {
                    token.mark_spent();
                    return Ok(WaitOutcome::Signaled);
                }
                WAIT_TIMEOUT => continue,
                WAIT_FAILED => {
                    return Err(WatchError::Wait(io::Error::last_os_error().to_string()));
                }
                other => {
                    return Err(WatchError::Wait(format!("unexpected wait result {}", other)));
                }
            }
        }
    }

    fn release(&self, token: NotificationToken<EventHandle>) {
        drop(token.into_handle());
    }
}
