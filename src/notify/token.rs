//! One-shot notification token.

use crate::error::{Result, WatchError};

/// Handle to a single pending change signal.
///
/// Created by [`ChangeNotifier::arm`](super::ChangeNotifier::arm), consumed by
/// exactly one successful wait and then handed back through
/// [`ChangeNotifier::release`](super::ChangeNotifier::release). A token that has
/// fired is spent; waiting on it again is an error.
#[derive(Debug)]
pub struct NotificationToken<H> {
    handle: H,
    spent: bool,
}

impl<H> NotificationToken<H> {
    /// Wrap a backend wait resource in a fresh, armed token.
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            spent: false,
        }
    }

    /// Whether the token has already fired.
    pub fn is_spent(&self) -> bool {
        self.spent
    }

    /// Fail with [`WatchError::TokenSpent`] if the token already fired.
    pub fn ensure_armed(&self) -> Result<()> {
        if self.spent {
            return Err(WatchError::TokenSpent);
        }
        Ok(())
    }

    /// Record that the signal was delivered.
    pub fn mark_spent(&mut self) {
        self.spent = true;
    }

    /// Backend wait resource.
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Give the wait resource back to the backend for release.
    pub fn into_handle(self) -> H {
        self.handle
    }
}
