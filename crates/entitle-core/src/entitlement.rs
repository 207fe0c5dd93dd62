//! Entitlement records.

use serde::{Deserialize, Serialize};

/// One application a unit is authorized to use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationEntitlement {
    /// Application code as reported by the remote service (e.g. `AGENDA`).
    pub code: String,
}

impl ApplicationEntitlement {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// The entitlements of a single unit, as returned by the latest successful
/// fetch.
///
/// A record is always fully populated from one reply. It is replaced
/// wholesale on the next run and never merged with a previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    /// External code of the unit the record was fetched for.
    pub external_code: String,
    /// Entitlements in the order the remote service listed them.
    pub applications: Vec<ApplicationEntitlement>,
}

impl EntitlementRecord {
    /// Create a new record.
    pub fn new(external_code: impl Into<String>, applications: Vec<ApplicationEntitlement>) -> Self {
        Self {
            external_code: external_code.into(),
            applications,
        }
    }

    /// Whether the unit is entitled to the given application code.
    #[must_use]
    pub fn has_application(&self, code: &str) -> bool {
        self.applications.iter().any(|app| app.code == code)
    }

    /// Iterate over the entitlement codes.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.applications.iter().map(|app| app.code.as_str())
    }

    /// Whether the record carries no entitlement at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EntitlementRecord {
        EntitlementRecord::new(
            "0123456A",
            vec![
                ApplicationEntitlement::new("AGENDA"),
                ApplicationEntitlement::new("NOTES"),
            ],
        )
    }

    #[test]
    fn test_has_application() {
        let r = record();
        assert!(r.has_application("AGENDA"));
        assert!(r.has_application("NOTES"));
        assert!(!r.has_application("agenda"));
        assert!(!r.has_application("TEXTES"));
    }

    #[test]
    fn test_codes_preserve_order() {
        let r = record();
        let codes: Vec<&str> = r.codes().collect();
        assert_eq!(codes, vec!["AGENDA", "NOTES"]);
    }

    #[test]
    fn test_is_empty() {
        assert!(!record().is_empty());
        assert!(EntitlementRecord::new("X", vec![]).is_empty());
    }

    #[test]
    fn test_serde_camel_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["externalCode"], "0123456A");
        assert_eq!(json["applications"][1]["code"], "NOTES");
    }
}
