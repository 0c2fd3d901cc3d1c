// =============================================================================
// License Store — AES-256-GCM encrypted cache file (`license.dat`)
// =============================================================================
//
// The encryption key is derived from the machine fingerprint, so the file is
// useless when copied to another host. Layout: 12-byte nonce, then
// ciphertext. A file that fails to decrypt is treated as absent (the manager
// falls back to the registry), not as a hard error.
// =============================================================================

use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::LicenseInfo;

/// Length of the AES-GCM nonce prefix.
const NONCE_LEN: usize = 12;

pub struct LicenseStore {
    path: PathBuf,
}

impl LicenseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn cipher(fingerprint: &str) -> Aes256Gcm {
        let key_bytes = Sha256::digest(fingerprint.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Aes256Gcm::new(key)
    }

    /// Encrypt and persist the license record atomically.
    pub fn save(&self, info: &LicenseInfo, fingerprint: &str) -> Result<()> {
        let plaintext = serde_json::to_vec(info).context("failed to serialise license")?;

        let cipher = Self::cipher(fingerprint);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| anyhow::anyhow!("license encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        let tmp = self.path.with_extension("dat.tmp");
        std::fs::write(&tmp, &blob)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to rename license cache into {}", self.path.display()))?;

        debug!(path = %self.path.display(), "license cache saved");
        Ok(())
    }

    /// Load and decrypt the cached record. Returns `None` when the file is
    /// missing, truncated, or does not decrypt under this machine's key.
    pub fn load(&self, fingerprint: &str) -> Option<LicenseInfo> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read license cache");
                return None;
            }
        };

        if blob.len() <= NONCE_LEN {
            warn!(path = %self.path.display(), "license cache truncated — ignoring");
            return None;
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Self::cipher(fingerprint);
        let plaintext = match cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(path = %self.path.display(), "license cache does not decrypt on this machine");
                return None;
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "license cache is corrupt — ignoring");
                None
            }
        }
    }

    /// Remove the cache file, if present.
    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::{LicenseDuration, LicenseStatus};
    use chrono::Utc;

    fn sample() -> LicenseInfo {
        LicenseInfo {
            key: "ISX-TEST-0001".into(),
            duration: LicenseDuration::ThreeMonths,
            issued_date: Utc::now(),
            expiry_date: Some(Utc::now() + chrono::Duration::days(90)),
            status: LicenseStatus::Activated,
            machine_id: "fp".into(),
            activated_date: Some(Utc::now()),
            last_connected: None,
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LicenseStore::new(tmp.path().join("license.dat"));

        store.save(&sample(), "fingerprint-a").unwrap();
        let loaded = store.load("fingerprint-a").unwrap();
        assert_eq!(loaded.key, "ISX-TEST-0001");
        assert_eq!(loaded.status, LicenseStatus::Activated);
    }

    #[test]
    fn load_with_wrong_fingerprint_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LicenseStore::new(tmp.path().join("license.dat"));

        store.save(&sample(), "fingerprint-a").unwrap();
        assert!(store.load("fingerprint-b").is_none());
    }

    #[test]
    fn missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LicenseStore::new(tmp.path().join("license.dat"));
        assert!(store.load("anything").is_none());
    }

    #[test]
    fn file_is_not_plaintext() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("license.dat");
        let store = LicenseStore::new(&path);
        store.save(&sample(), "fingerprint-a").unwrap();

        let raw = std::fs::read(&path).unwrap();
        let as_text = String::from_utf8_lossy(&raw);
        assert!(!as_text.contains("ISX-TEST-0001"));
    }

    #[test]
    fn clear_removes_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LicenseStore::new(tmp.path().join("license.dat"));
        store.save(&sample(), "fp").unwrap();
        store.clear();
        assert!(store.load("fp").is_none());
    }
}
