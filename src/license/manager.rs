// =============================================================================
// License Manager — activation, validation, machine binding, renewal flags
// =============================================================================
//
// Validation order: local cache first (machine binding, expiry), then a
// registry re-check when the last one is stale. Concurrent validations are
// coalesced so protected endpoints cannot trigger more than one registry
// round-trip per second. A registry outage never locks out a locally-valid
// license; it only surfaces as `network_error` when there is no usable cache.
// =============================================================================

use std::time::{Duration, Instant};

use chrono::{Months, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::errors::ServiceError;

use super::registry::{RegistryClient, RegistryError};
use super::store::LicenseStore;
use super::{LicenseErrorKind, LicenseInfo, LicenseStatus, RenewalStatus};

/// Minimum spacing between validation evaluations.
const COALESCE_WINDOW: Duration = Duration::from_secs(1);
/// How long a registry confirmation stays fresh.
const REVALIDATE_AFTER: Duration = Duration::from_secs(3600);

pub struct LicenseManager {
    registry: RegistryClient,
    store: LicenseStore,
    fingerprint: String,
    cache: Mutex<Option<LicenseInfo>>,
    /// Last validation verdict, reused inside the coalescing window.
    last_verdict: Mutex<Option<(Instant, bool, LicenseErrorKind)>>,
    /// When the registry last confirmed the cached record.
    last_remote_check: Mutex<Option<Instant>>,
}

impl LicenseManager {
    pub fn new(registry: RegistryClient, store: LicenseStore, fingerprint: String) -> Self {
        let cache = store.load(&fingerprint);
        if let Some(info) = &cache {
            info!(status = %info.status, "license cache loaded");
        }
        Self {
            registry,
            store,
            fingerprint,
            cache: Mutex::new(cache),
            last_verdict: Mutex::new(None),
            last_remote_check: Mutex::new(None),
        }
    }

    /// This host's machine fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn map_registry_error(e: RegistryError) -> ServiceError {
        match e {
            RegistryError::NotFound => ServiceError::LicenseNotFound,
            RegistryError::AlreadyActivated => ServiceError::LicenseAlreadyActivated,
            RegistryError::Expired => ServiceError::LicenseExpired,
            RegistryError::Unreachable(detail) => ServiceError::RegistryUnreachable(detail),
            RegistryError::Protocol(detail) => {
                ServiceError::Internal(anyhow::anyhow!("registry protocol error: {detail}"))
            }
        }
    }

    fn adopt(&self, mut info: LicenseInfo) -> LicenseInfo {
        // The registry is authoritative for dates; derive the expiry locally
        // when it omitted one.
        if info.expiry_date.is_none() {
            if let Some(activated) = info.activated_date {
                info.expiry_date = activated.checked_add_months(Months::new(info.duration.months()));
            }
        }
        if let Err(e) = self.store.save(&info, &self.fingerprint) {
            warn!(error = %e, "failed to persist license cache");
        }
        *self.cache.lock() = Some(info.clone());
        *self.last_remote_check.lock() = Some(Instant::now());
        self.invalidate_verdict();
        info
    }

    fn invalidate_verdict(&self) {
        *self.last_verdict.lock() = None;
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Bind an `Available` key to this machine and cache the result.
    pub async fn activate(&self, key: &str) -> Result<LicenseInfo, ServiceError> {
        let info = self
            .registry
            .activate(key, &self.fingerprint)
            .await
            .map_err(Self::map_registry_error)?;
        let info = self.adopt(info);
        info!(expiry = ?info.expiry_date, "license activated");
        Ok(info)
    }

    /// Rebind an already-activated key to this machine. Requires `force`.
    pub async fn transfer(&self, key: &str, force: bool) -> Result<LicenseInfo, ServiceError> {
        if !force {
            return Err(ServiceError::LicenseAlreadyActivated);
        }
        let info = self
            .registry
            .transfer(key, &self.fingerprint, true)
            .await
            .map_err(Self::map_registry_error)?;
        let info = self.adopt(info);
        info!("license transferred to this machine");
        Ok(info)
    }

    /// Presence heartbeat. Best-effort: a registry outage is reported but the
    /// cached license is untouched.
    pub async fn update_last_connected(&self) -> Result<(), ServiceError> {
        let key = match self.cache.lock().as_ref() {
            Some(info) => info.key.clone(),
            None => return Err(ServiceError::LicenseNotFound),
        };

        match self.registry.heartbeat(&key, &self.fingerprint).await {
            Ok(info) => {
                self.adopt(info);
                Ok(())
            }
            Err(RegistryError::Unreachable(detail)) => {
                warn!(detail = %detail, "license heartbeat skipped — registry unreachable");
                Err(ServiceError::RegistryUnreachable(detail))
            }
            Err(e) => Err(Self::map_registry_error(e)),
        }
    }

    /// Evaluate the license. Returns `(valid, kind)`; `kind` is `Ok` iff
    /// `valid`.
    pub async fn validate(&self) -> (bool, LicenseErrorKind) {
        // Coalesce: reuse a verdict that is under a second old.
        if let Some((at, valid, kind)) = *self.last_verdict.lock() {
            if at.elapsed() < COALESCE_WINDOW {
                return (valid, kind);
            }
        }

        let verdict = self.evaluate().await;
        *self.last_verdict.lock() = Some((Instant::now(), verdict.0, verdict.1));
        verdict
    }

    async fn evaluate(&self) -> (bool, LicenseErrorKind) {
        let cached = self.cache.lock().clone();
        let Some(info) = cached else {
            return (false, LicenseErrorKind::Required);
        };

        if !info.machine_id.is_empty() && info.machine_id != self.fingerprint {
            return (false, LicenseErrorKind::MachineMismatch);
        }

        let now = Utc::now();
        if matches!(info.status, LicenseStatus::Expired)
            || info.expiry_date.is_some_and(|exp| exp < now)
        {
            return (false, LicenseErrorKind::Expired);
        }

        // Locally valid. Refresh from the registry when the confirmation is
        // stale; an outage does not invalidate a live local license.
        let stale = self
            .last_remote_check
            .lock()
            .map_or(true, |at| at.elapsed() > REVALIDATE_AFTER);
        if stale {
            match self.registry.fetch(&info.key).await {
                Ok(remote) => {
                    let remote = self.adopt(remote);
                    if !remote.machine_id.is_empty() && remote.machine_id != self.fingerprint {
                        return (false, LicenseErrorKind::MachineMismatch);
                    }
                    if matches!(remote.status, LicenseStatus::Expired)
                        || remote.expiry_date.is_some_and(|exp| exp < now)
                    {
                        return (false, LicenseErrorKind::Expired);
                    }
                }
                Err(RegistryError::NotFound) => return (false, LicenseErrorKind::NotFound),
                Err(RegistryError::Expired) => return (false, LicenseErrorKind::Expired),
                Err(e) => {
                    warn!(error = %e, "registry re-check failed — trusting local cache");
                }
            }
        }

        (true, LicenseErrorKind::Ok)
    }

    // ── Read-only queries ───────────────────────────────────────────────

    /// Current cached license, if any.
    pub fn license_info(&self) -> Option<LicenseInfo> {
        self.cache.lock().clone()
    }

    /// Renewal posture for the UI: critical at ≤ 7 days left, warning at
    /// ≤ 30.
    pub fn renewal_status(&self) -> RenewalStatus {
        let now = Utc::now();
        let cached = self.cache.lock().clone();

        match cached {
            None => RenewalStatus {
                license_status: "not_activated".to_string(),
                days_left: None,
                critical: false,
                warning: false,
            },
            Some(info) => {
                let days_left = info.days_left(now);
                let expired = matches!(info.status, LicenseStatus::Expired)
                    || days_left.is_some_and(|d| d < 0);
                let status = if expired {
                    "expired".to_string()
                } else {
                    info.status.to_string()
                };
                RenewalStatus {
                    license_status: status,
                    days_left,
                    critical: !expired && days_left.is_some_and(|d| d <= 7),
                    warning: !expired && days_left.is_some_and(|d| d <= 30),
                }
            }
        }
    }

    /// Test seam: install a license record directly into the cache.
    #[cfg(test)]
    pub fn install_for_tests(&self, info: LicenseInfo) {
        *self.cache.lock() = Some(info);
        *self.last_remote_check.lock() = Some(Instant::now());
        self.invalidate_verdict();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::LicenseDuration;

    fn manager_with(info: Option<LicenseInfo>) -> LicenseManager {
        let tmp = tempfile::tempdir().unwrap();
        let store = LicenseStore::new(tmp.path().join("license.dat"));
        // TEST-NET registry: any network call fails, which the manager must
        // tolerate whenever a usable cache exists.
        let registry = RegistryClient::new("http://192.0.2.1:9", "k", "s");
        let mgr = LicenseManager::new(registry, store, "this-machine".to_string());
        if let Some(info) = info {
            mgr.install_for_tests(info);
        }
        mgr
    }

    fn license(machine_id: &str, days_from_now: i64) -> LicenseInfo {
        let now = Utc::now();
        LicenseInfo {
            key: "ISX-TEST-0001".into(),
            duration: LicenseDuration::OneMonth,
            issued_date: now,
            expiry_date: Some(now + chrono::Duration::days(days_from_now)),
            status: LicenseStatus::Activated,
            machine_id: machine_id.to_string(),
            activated_date: Some(now),
            last_connected: None,
        }
    }

    #[tokio::test]
    async fn validate_without_cache_requires_license() {
        let mgr = manager_with(None);
        assert_eq!(mgr.validate().await, (false, LicenseErrorKind::Required));
    }

    #[tokio::test]
    async fn validate_accepts_bound_unexpired_license() {
        let mgr = manager_with(Some(license("this-machine", 60)));
        assert_eq!(mgr.validate().await, (true, LicenseErrorKind::Ok));
    }

    #[tokio::test]
    async fn validate_rejects_other_machine() {
        let mgr = manager_with(Some(license("someone-else", 60)));
        assert_eq!(
            mgr.validate().await,
            (false, LicenseErrorKind::MachineMismatch)
        );
    }

    #[tokio::test]
    async fn validate_rejects_expired() {
        let mgr = manager_with(Some(license("this-machine", -1)));
        assert_eq!(mgr.validate().await, (false, LicenseErrorKind::Expired));
    }

    #[tokio::test]
    async fn verdicts_are_coalesced_within_the_window() {
        let mgr = manager_with(Some(license("this-machine", 60)));
        let first = mgr.validate().await;
        // Expire the cache behind the coalescer's back; the stale verdict
        // must still be served inside the window.
        mgr.cache.lock().as_mut().unwrap().expiry_date =
            Some(Utc::now() - chrono::Duration::days(1));
        let second = mgr.validate().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn transfer_without_force_is_refused() {
        let mgr = manager_with(Some(license("this-machine", 60)));
        let result = mgr.transfer("ISX-TEST-0001", false).await;
        assert!(matches!(result, Err(ServiceError::LicenseAlreadyActivated)));
    }

    #[test]
    fn renewal_flags_follow_days_left() {
        let mgr = manager_with(Some(license("this-machine", 5)));
        let status = mgr.renewal_status();
        assert!(status.critical);
        assert!(status.warning);

        let mgr = manager_with(Some(license("this-machine", 20)));
        let status = mgr.renewal_status();
        assert!(!status.critical);
        assert!(status.warning);

        let mgr = manager_with(Some(license("this-machine", 200)));
        let status = mgr.renewal_status();
        assert!(!status.critical);
        assert!(!status.warning);

        let mgr = manager_with(None);
        assert_eq!(mgr.renewal_status().license_status, "not_activated");
    }
}
