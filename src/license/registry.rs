// =============================================================================
// License Registry Client — HMAC-SHA256 signed requests to the remote API
// =============================================================================
//
// SECURITY: the shared secret is used exclusively for request signing and is
// never logged or serialized. Every request carries the API key as a header
// plus an `X-Signature` over the body. Calls use a 30-second timeout; the
// lightweight status fetch uses 5 seconds so UI reads stay snappy.
// =============================================================================

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use super::LicenseInfo;

type HmacSha256 = Hmac<Sha256>;

/// Timeout for mutating registry calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for read-only status fetches.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Errors
// =============================================================================

/// Failures the registry can report. Network-level problems collapse into
/// `Unreachable` so callers can fall back to the local cache.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("license key not found")]
    NotFound,

    #[error("license already activated on another machine")]
    AlreadyActivated,

    #[error("license expired")]
    Expired,

    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected registry response: {0}")]
    Protocol(String),
}

// =============================================================================
// Client
// =============================================================================

pub struct RegistryClient {
    base_url: String,
    shared_secret: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct BindRequest<'a> {
    machine_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    force: Option<bool>,
}

impl RegistryClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` — registry API root, no trailing slash.
    /// * `api_key`  — account identifier (sent as a header).
    /// * `shared_secret` — HMAC signing key, never transmitted.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-Api-Key", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            shared_secret: shared_secret.into(),
            client,
        }
    }

    /// HMAC-SHA256 hex signature of a request body.
    fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.shared_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn post_bind(
        &self,
        endpoint: &str,
        key: &str,
        machine_id: &str,
        force: Option<bool>,
    ) -> Result<LicenseInfo, RegistryError> {
        let url = format!("{}/licenses/{key}/{endpoint}", self.base_url);
        let body = serde_json::to_vec(&BindRequest { machine_id, force })
            .map_err(|e| RegistryError::Protocol(e.to_string()))?;
        let signature = self.sign(&body);

        let resp = self
            .client
            .post(&url)
            .header("X-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;

        Self::decode(resp).await
    }

    async fn decode(resp: reqwest::Response) -> Result<LicenseInfo, RegistryError> {
        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => resp
                .json::<LicenseInfo>()
                .await
                .map_err(|e| RegistryError::Protocol(e.to_string())),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound),
            StatusCode::CONFLICT => Err(RegistryError::AlreadyActivated),
            StatusCode::GONE | StatusCode::PAYMENT_REQUIRED => Err(RegistryError::Expired),
            status => {
                let detail = resp.text().await.unwrap_or_default();
                warn!(%status, detail = %detail, "unexpected registry response");
                Err(RegistryError::Protocol(format!("{status}: {detail}")))
            }
        }
    }

    /// Fetch the current registry record for a key (5 s timeout).
    pub async fn fetch(&self, key: &str) -> Result<LicenseInfo, RegistryError> {
        let url = format!("{}/licenses/{key}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;

        debug!(key_suffix = &key[key.len().saturating_sub(4)..], "registry fetch");
        Self::decode(resp).await
    }

    /// Bind an `Available` key to this machine.
    pub async fn activate(
        &self,
        key: &str,
        machine_id: &str,
    ) -> Result<LicenseInfo, RegistryError> {
        self.post_bind("activate", key, machine_id, None).await
    }

    /// Rebind an already-activated key to this machine.
    pub async fn transfer(
        &self,
        key: &str,
        machine_id: &str,
        force: bool,
    ) -> Result<LicenseInfo, RegistryError> {
        self.post_bind("transfer", key, machine_id, Some(force)).await
    }

    /// Presence heartbeat; returns the refreshed record.
    pub async fn heartbeat(
        &self,
        key: &str,
        machine_id: &str,
    ) -> Result<LicenseInfo, RegistryError> {
        self.post_bind("heartbeat", key, machine_id, None).await
    }
}

// =============================================================================
// Tests
// =============================================================================
