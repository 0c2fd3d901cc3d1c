// =============================================================================
// Application Configuration — JSON file with per-field serde defaults
// =============================================================================
//
// Loaded from `config.json` beside the executable. Every field carries a serde
// default so that older config files keep loading after new fields are added.
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. Environment variables override individual fields at startup.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_scrape_base_url() -> String {
    "http://www.isx-iq.net/reports/daily".to_string()
}

fn default_registry_url() -> String {
    "https://registry.isxpulse.app/api/v1".to_string()
}

fn default_extractor_path() -> String {
    "isx-extract".to_string()
}

fn default_web_dir() -> String {
    "web".to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_pipeline_history() -> usize {
    50
}

// =============================================================================
// RegistryCredentials
// =============================================================================

/// Credentials for the remote license registry. Normally read from the
/// `ISX_CREDENTIALS` environment variable as inline JSON; the config file
/// fields act as a fallback for development setups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryCredentials {
    #[serde(default)]
    pub api_key: String,
    /// Shared secret for request signing. Never logged.
    #[serde(default)]
    pub shared_secret: String,
}

impl RegistryCredentials {
    /// Parse credentials from the `ISX_CREDENTIALS` environment variable when
    /// present, otherwise fall back to the supplied config values.
    pub fn resolve(fallback: &RegistryCredentials) -> RegistryCredentials {
        match std::env::var("ISX_CREDENTIALS") {
            Ok(raw) if !raw.trim().is_empty() => match serde_json::from_str(&raw) {
                Ok(creds) => creds,
                Err(e) => {
                    tracing::warn!(error = %e, "ISX_CREDENTIALS is not valid JSON — ignoring");
                    fallback.clone()
                }
            },
            _ => fallback.clone(),
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to. Overridable via `ISX_BIND_ADDR`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL daily workbooks are fetched from.
    #[serde(default = "default_scrape_base_url")]
    pub scrape_base_url: String,

    /// Base URL of the remote license registry.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Path of the external spreadsheet extractor executable.
    #[serde(default = "default_extractor_path")]
    pub extractor_path: String,

    /// Directory holding the browser UI assets.
    #[serde(default = "default_web_dir")]
    pub web_dir: String,

    /// Expected client heartbeat interval in seconds. Connections silent for
    /// twice this long are treated as dead.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// How many completed pipelines to retain in memory.
    #[serde(default = "default_pipeline_history")]
    pub pipeline_history: usize,

    /// Fallback registry credentials (the `ISX_CREDENTIALS` env var wins).
    #[serde(default)]
    pub registry_credentials: RegistryCredentials,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            scrape_base_url: default_scrape_base_url(),
            registry_url: default_registry_url(),
            extractor_path: default_extractor_path(),
            web_dir: default_web_dir(),
            heartbeat_secs: default_heartbeat_secs(),
            pipeline_history: default_pipeline_history(),
            registry_credentials: RegistryCredentials::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(path = %path.display(), bind_addr = %config.bind_addr, "config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("ISX_BIND_ADDR") {
            if !addr.is_empty() {
                self.bind_addr = addr;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
