//! Offer wire payload: kind tag, service commitment, optional address and pairing metadata.

use serde::{Deserialize, Serialize};

use crate::identity::ServiceCommitment;

/// Current offer payload version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Offer kind tag. Only `Authentication` offers are ever surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferKind {
    Authentication,
    Registration,
    Revocation,
}

/// Where and how to reach the verifier that sent an offer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
    /// Verifier-defined action descriptor (e.g. "unlock", "login").
    pub action: Option<String>,
}

/// All fields a verifier broadcasts in an offer. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPayload {
    pub protocol_version: u8,
    pub kind: OfferKind,
    pub service_commitment: ServiceCommitment,
    pub address: Option<ServiceAddress>,
    pub pairing_name: Option<String>,
}

impl OfferPayload {
    pub fn authentication(service_commitment: ServiceCommitment) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            kind: OfferKind::Authentication,
            service_commitment,
            address: None,
            pairing_name: None,
        }
    }

    pub fn with_address(mut self, address: ServiceAddress) -> Self {
        self.address = Some(address);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
