//! Pairings file: one `[[pairing]]` table per paired service, with the shared secret used by the handshake.
//!
//! ```toml
//! [[pairing]]
//! name = "Desk"
//! commitment = "a1b2..."   # hex
//! secret = "0011..."       # hex
//! host = "10.0.0.5"        # optional fallback address
//! port = 47001
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use nearauth_core::{Pairing, PairingError, PairingStore, ServiceAddress, ServiceCommitment};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PairingsFile {
    #[serde(default)]
    pairing: Vec<PairingRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PairingRecord {
    name: String,
    commitment: String,
    secret: String,
    host: Option<String>,
    port: Option<u16>,
    action: Option<String>,
}

struct Entry {
    pairing: Pairing,
    secret: Vec<u8>,
}

/// Pairings loaded once at startup.
pub struct FilePairingStore {
    entries: HashMap<ServiceCommitment, Entry>,
}

impl FilePairingStore {
    pub fn load(path: &Path) -> Result<Self, PairingFileError> {
        let s = std::fs::read_to_string(path)?;
        Self::parse(&s)
    }

    /// Like `load`, but a missing file is an empty store.
    pub fn load_or_empty(path: &Path) -> Result<Self, PairingFileError> {
        match Self::load(path) {
            Err(PairingFileError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no pairings file; every offer will be ignored");
                Ok(Self::empty())
            }
            other => other,
        }
    }

    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, PairingFileError> {
        let file: PairingsFile = toml::from_str(s)?;
        let mut entries = HashMap::new();
        for record in file.pairing {
            let commitment = hex::decode(record.commitment.trim()).map_err(|source| {
                PairingFileError::Hex {
                    name: record.name.clone(),
                    source,
                }
            })?;
            if commitment.is_empty() {
                return Err(PairingFileError::EmptyCommitment(record.name));
            }
            let secret = hex::decode(record.secret.trim()).map_err(|source| PairingFileError::Hex {
                name: record.name.clone(),
                source,
            })?;
            let commitment = ServiceCommitment::from_bytes(commitment);
            let mut pairing = Pairing::new(commitment.clone(), record.name.clone());
            if let (Some(host), Some(port)) = (record.host, record.port) {
                pairing = pairing.with_address(ServiceAddress {
                    host,
                    port,
                    action: record.action,
                });
            }
            if entries
                .insert(commitment, Entry { pairing, secret })
                .is_some()
            {
                return Err(PairingFileError::Duplicate(record.name));
            }
        }
        Ok(Self { entries })
    }

    /// The shared secret for a paired service.
    pub fn secret(&self, commitment: &ServiceCommitment) -> Option<&[u8]> {
        self.entries.get(commitment).map(|e| e.secret.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl PairingStore for FilePairingStore {
    async fn lookup(&self, commitment: &ServiceCommitment) -> Result<Option<Pairing>, PairingError> {
        Ok(self.entries.get(commitment).map(|e| e.pairing.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PairingFileError {
    #[error("cannot read pairings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pairings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("pairing {name:?}: bad hex: {source}")]
    Hex {
        name: String,
        source: hex::FromHexError,
    },
    #[error("pairing {0:?}: empty commitment")]
    EmptyCommitment(String),
    #[error("pairing {0:?}: commitment listed twice")]
    Duplicate(String),
}
