//! Channel labels.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DomainError, DomainResult};

/// Label identifying a class of data channel (e.g. "servo").
///
/// Labels are compared byte for byte. The transport assigns a label to every
/// channel it opens, and channel managers register under the label they
/// want to receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Creates a label without validation.
    ///
    /// The transport may hand us any string, including an empty one, so
    /// incoming labels are never rejected.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Creates a label for registration, rejecting empty strings.
    pub fn parse(label: impl Into<String>) -> DomainResult<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(DomainError::EmptyLabel);
        }
        Ok(Self(label))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_equality_is_exact() {
        assert_eq!(Label::new("servo"), Label::from("servo"));
        assert_ne!(Label::new("servo"), Label::new("Servo"));
        assert_ne!(Label::new("servo"), Label::new("servo "));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(Label::parse(""), Err(DomainError::EmptyLabel));
        assert_eq!(Label::parse("servo").map(|l| l.to_string()), Ok("servo".to_string()));
    }
}
