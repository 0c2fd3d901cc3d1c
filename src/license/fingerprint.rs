// =============================================================================
// Machine Fingerprint — stable host identifier for license binding
// =============================================================================
//
// Field set: hostname, OS, architecture, and the systemd machine-id when
// readable. Joined with `|` and SHA-256 hashed, so the fingerprint is
// identical across restarts on one machine and differs across machines. The
// raw fields never leave the process; only the digest is stored or sent.
// =============================================================================

use sha2::{Digest, Sha256};

/// Compute this host's fingerprint as a lowercase hex digest.
pub fn machine_fingerprint() -> String {
    fingerprint_of(&hostname(), std::env::consts::OS, std::env::consts::ARCH, &machine_id())
}

/// Deterministic digest over the fingerprint field set.
fn fingerprint_of(hostname: &str, os: &str, arch: &str, machine_id: &str) -> String {
    let material = format!("{hostname}|{os}|{arch}|{machine_id}");
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(digest)
}

fn hostname() -> String {
    for path in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
        if let Ok(name) = std::fs::read_to_string(path) {
            let name = name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    String::new()
}
