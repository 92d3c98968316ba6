//! Enforcement policy: decides whether the watched entry needs rewriting.

use std::fmt;
use std::sync::Arc;

/// The value currently stored at the watched entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedValue {
    /// The entry exists and holds this string.
    Present(String),
    /// The entry does not exist yet.
    Absent,
}

impl ObservedValue {
    /// The stored string, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }
}

impl fmt::Display for ObservedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(value) => write!(f, "{}", value),
            Self::Absent => write!(f, "<absent>"),
        }
    }
}

/// The value the entry is pinned to. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredValue(Arc<str>);

impl DesiredValue {
    /// Wrap a policy constant.
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// The pinned string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DesiredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What reconciliation must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The entry already holds the desired value.
    NoOp,
    /// Write the given value to the entry, creating it if needed.
    Write(DesiredValue),
}

/// Decide what to do about an observed value.
///
/// Total over both inputs: an absent entry or a foreign value yields
/// `Write(desired)`, an exact match yields `NoOp`. The comparison is byte-exact.
pub fn decide(observed: &ObservedValue, desired: &DesiredValue) -> Action {
    match observed {
        ObservedValue::Present(value) if value.as_str() == desired.as_str() => Action::NoOp,
        ObservedValue::Present(_) | ObservedValue::Absent => Action::Write(desired.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DESIRED: &str = "localhost;192.168.*.*;<local>";

    #[test]
    fn test_absent_creates_entry() {
        let desired = DesiredValue::new(DESIRED);
        assert_eq!(
            decide(&ObservedValue::Absent, &desired),
            Action::Write(desired.clone())
        );
    }

    #[test]
    fn test_equal_value_is_noop() {
        let desired = DesiredValue::new(DESIRED);
        let observed = ObservedValue::Present(DESIRED.to_string());
        assert_eq!(decide(&observed, &desired), Action::NoOp);
    }

    #[test]
    fn test_foreign_value_is_rewritten() {
        let desired = DesiredValue::new(DESIRED);
        let observed = ObservedValue::Present("foo".to_string());
        assert_eq!(decide(&observed, &desired), Action::Write(desired.clone()));
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let desired = DesiredValue::new(DESIRED);
        let observed = ObservedValue::Present(DESIRED.to_uppercase());
        assert!(matches!(decide(&observed, &desired), Action::Write(_)));
    }

    #[test]
    fn test_observed_display() {
        assert_eq!(ObservedValue::Absent.to_string(), "<absent>");
        assert_eq!(ObservedValue::Present("x".into()).to_string(), "x");
    }

    proptest! {
        #[test]
        fn prop_matching_value_never_writes(value in ".*") {
            let desired = DesiredValue::new(value.as_str());
            prop_assert_eq!(decide(&ObservedValue::Present(value), &desired), Action::NoOp);
        }

        #[test]
        fn prop_applying_write_converges(observed in proptest::option::of(".*"), target in ".+") {
            let desired = DesiredValue::new(target.as_str());
            let observed = match observed {
                Some(value) => ObservedValue::Present(value),
                None => ObservedValue::Absent,
            };

            let after = match decide(&observed, &desired) {
                Action::Write(value) => ObservedValue::Present(value.as_str().to_string()),
                Action::NoOp => observed,
            };
            prop_assert_eq!(decide(&after, &desired), Action::NoOp);
        }
    }
}
