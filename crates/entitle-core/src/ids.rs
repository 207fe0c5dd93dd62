//! Strongly Typed Identifiers
//!
//! Newtype wrappers so that unit identifiers, external codes and run
//! identifiers cannot be swapped by accident.
//!
//! # Example
//!
//! ```
//! use entitle_core::{RunId, UnitId};
//!
//! let unit = UnitId::from("b7c1e2");
//! let run = RunId::new();
//!
//! fn requires_unit(id: &UnitId) -> &str {
//!     id.as_str()
//! }
//!
//! assert_eq!(requires_unit(&unit), "b7c1e2");
//! assert_ne!(run, RunId::new());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Internal identifier of an organizational unit (e.g. a school).
///
/// Unit identifiers are opaque strings owned by the directory; the
/// synchronizer never generates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the raw identifier.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for UnitId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError {
                id_type: "UnitId",
                message: "identifier is empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run ID using UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|e| ParseIdError {
            id_type: "RunId",
            message: e.to_string(),
        })
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_parse_trims() {
        let id: UnitId = "  abc-123 ".parse().unwrap();
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn test_unit_id_parse_empty_fails() {
        let err = "   ".parse::<UnitId>().unwrap_err();
        assert_eq!(err.id_type, "UnitId");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_unit_id_serde_transparent() {
        let id = UnitId::from("u-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"u-1\"");
        let back: UnitId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_run_id_roundtrip_display() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_run_id_parse_invalid() {
        let result = "not-a-uuid".parse::<RunId>();
        assert!(result.is_err());
    }
}
