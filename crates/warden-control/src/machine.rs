//! Deployment-scoped machine fingerprint.

use sha2::{Digest, Sha256};

/// Fallback when the host identifier cannot be derived.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Derives a stable, deployment-scoped device identifier.
///
/// The raw host machine-id never leaves the process: it is hashed together
/// with the deployment ID, so two deployments on the same host report
/// different fingerprints and the identifier cannot be correlated across
/// tenants. Falls back to the literal `unknown` when no machine-id can be
/// read.
#[must_use]
pub fn device_id(deployment_id: &str) -> String {
    match read_machine_id() {
        Some(machine_id) => protected_id(&machine_id, deployment_id),
        None => UNKNOWN_DEVICE_ID.to_string(),
    }
}

/// Reads the host machine-id from the usual locations.
fn read_machine_id() -> Option<String> {
    MACHINE_ID_PATHS
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|raw| raw.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Hashes the machine-id under the deployment scope.
fn protected_id(machine_id: &str, deployment_id: &str) -> String {
    let digest = Sha256::digest(format!("{deployment_id}:{machine_id}").as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_id_is_stable() {
        let a = protected_id("machine-1", "deploy-1");
        let b = protected_id("machine-1", "deploy-1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_protected_id_scoped_by_deployment() {
        let a = protected_id("machine-1", "deploy-1");
        let b = protected_id("machine-1", "deploy-2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_protected_id_does_not_leak_machine_id() {
        let id = protected_id("super-secret-machine", "deploy-1");
        assert!(!id.contains("super-secret-machine"));
        // SHA-256 hex digest.
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_device_id_never_empty() {
        // Whatever the host looks like, we always get an identifier.
        let id = device_id("deploy-1");
        assert!(!id.is_empty());
    }
}
