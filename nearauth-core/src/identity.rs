//! Service identity: commitment bytes and the short fingerprints used in logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque commitment identifying a service. Carried in every offer and used as the pairing key.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServiceCommitment(Vec<u8>);

impl ServiceCommitment {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ServiceCommitment(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short, stable fingerprint: first 8 bytes of SHA-256 over the commitment.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"nearauth-commitment-v1");
        hasher.update(&self.0);
        let digest = hasher.finalize();
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        Fingerprint(out)
    }
}

impl fmt::Debug for ServiceCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceCommitment({})", self.fingerprint())
    }
}

impl fmt::Display for ServiceCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fingerprint(), f)
    }
}

/// Printable short hash of a commitment. Never used for equality decisions.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Fingerprint([u8; 8]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = ServiceCommitment::from_bytes(vec![1, 2, 3]);
        let b = ServiceCommitment::from_bytes(vec![1, 2, 3]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn fingerprint_differs_per_commitment() {
        let a = ServiceCommitment::from_bytes(vec![1, 2, 3]);
        let b = ServiceCommitment::from_bytes(vec![1, 2, 4]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn debug_does_not_dump_raw_bytes() {
        let c = ServiceCommitment::from_bytes(vec![0xAB; 32]);
        let dbg = format!("{:?}", c);
        assert!(dbg.starts_with("ServiceCommitment("));
        assert!(!dbg.contains('['));
    }
}
