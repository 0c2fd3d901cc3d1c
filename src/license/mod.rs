// =============================================================================
// License subsystem — machine-bound credential validated against a registry
// =============================================================================

pub mod fingerprint;
pub mod manager;
pub mod registry;
pub mod store;

pub use manager::LicenseManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// License data
// =============================================================================

/// Validity period a key was sold for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseDuration {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
}

impl LicenseDuration {
    pub fn months(self) -> u32 {
        match self {
            Self::OneMonth => 1,
            Self::ThreeMonths => 3,
            Self::SixMonths => 6,
            Self::OneYear => 12,
        }
    }
}

/// Lifecycle state of a key as the registry reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseStatus {
    Available,
    Activated,
    Expired,
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Activated => write!(f, "activated"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Full license record, shared between the registry wire format and the local
/// encrypted cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseInfo {
    pub key: String,
    pub duration: LicenseDuration,
    pub issued_date: DateTime<Utc>,
    /// Set on activation: `activated_date` plus the duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: LicenseStatus,
    /// Stable fingerprint of the bound host; empty until activation.
    #[serde(default)]
    pub machine_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
}

impl LicenseInfo {
    /// Whole days until expiry; negative once past it.
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry_date.map(|exp| (exp - now).num_days())
    }
}

// =============================================================================
// Validation outcomes
// =============================================================================

/// Why a validation failed (or `Ok` when it did not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseErrorKind {
    Ok,
    MachineMismatch,
    Expired,
    NetworkError,
    NotFound,
    Required,
}

impl LicenseErrorKind {
    /// Machine-readable code for problem+json bodies.
    pub fn code(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::MachineMismatch => "LICENSE_MACHINE_MISMATCH",
            Self::Expired => "LICENSE_EXPIRED",
            Self::NetworkError => "LICENSE_NETWORK_ERROR",
            Self::NotFound => "LICENSE_NOT_FOUND",
            Self::Required => "LICENSE_REQUIRED",
        }
    }
}

/// Renewal posture surfaced to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalStatus {
    pub license_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,
    /// `days_left <= 7`.
    pub critical: bool,
    /// `days_left <= 30`.
    pub warning: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_serialises_to_short_codes() {
        assert_eq!(serde_json::to_string(&LicenseDuration::OneMonth).unwrap(), "\"1m\"");
        assert_eq!(serde_json::to_string(&LicenseDuration::OneYear).unwrap(), "\"1y\"");
        let d: LicenseDuration = serde_json::from_str("\"6m\"").unwrap();
        assert_eq!(d, LicenseDuration::SixMonths);
        assert_eq!(d.months(), 6);
    }

    #[test]
    fn error_kind_codes() {
        assert_eq!(LicenseErrorKind::MachineMismatch.code(), "LICENSE_MACHINE_MISMATCH");
        assert_eq!(LicenseErrorKind::Required.code(), "LICENSE_REQUIRED");
    }

    #[test]
    fn days_left_goes_negative_after_expiry() {
        let now = Utc::now();
        let info = LicenseInfo {
            key: "K".into(),
            duration: LicenseDuration::OneMonth,
            issued_date: now,
            expiry_date: Some(now - chrono::Duration::days(3)),
            status: LicenseStatus::Activated,
            machine_id: String::new(),
            activated_date: None,
            last_connected: None,
        };
        assert!(info.days_left(now).unwrap() < 0);
    }
}
