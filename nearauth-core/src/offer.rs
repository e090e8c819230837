//! Offer decoding: one framed `OfferPayload` per verifier connection, capped in size.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::identity::ServiceCommitment;
use crate::protocol::{OfferKind, OfferPayload, ServiceAddress, PROTOCOL_VERSION};
use crate::wire::{self, FrameDecodeError, LEN_SIZE};

/// Default cap on bytes accepted from a single offer connection.
pub const DEFAULT_MAX_OFFER_BYTES: usize = 4096;

/// A decoded authentication offer. Immutable; consumed by the tracker or by session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    commitment: ServiceCommitment,
    address: Option<ServiceAddress>,
    pairing_name: Option<String>,
    raw: Vec<u8>,
}

impl Offer {
    pub fn commitment(&self) -> &ServiceCommitment {
        &self.commitment
    }

    pub fn address(&self) -> Option<&ServiceAddress> {
        self.address.as_ref()
    }

    /// Name the verifier claims for the pairing. Informational only; the pairing store is authoritative.
    pub fn pairing_name(&self) -> Option<&str> {
        self.pairing_name.as_deref()
    }

    pub fn raw_payload(&self) -> &[u8] {
        &self.raw
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OfferError {
    #[error("offer frame: {0}")]
    Frame(#[from] FrameDecodeError),
    #[error("offer exceeds {0} bytes")]
    TooLarge(usize),
    #[error("trailing bytes after offer frame")]
    Trailing,
    #[error("malformed offer payload: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("unsupported offer version {0}")]
    UnsupportedVersion(u8),
    #[error("offer kind {0:?} is not accepted")]
    DisallowedKind(OfferKind),
    #[error("offer carries an empty service commitment")]
    EmptyCommitment,
}

/// Parses connection bytes into an `Offer`, rejecting malformed or non-authentication payloads.
#[derive(Debug, Clone)]
pub struct OfferDecoder {
    max_bytes: usize,
}

impl OfferDecoder {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(LEN_SIZE + 1),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Decode a complete buffer holding exactly one offer frame.
    pub fn decode(&self, bytes: &[u8]) -> Result<Offer, OfferError> {
        if bytes.len() > self.max_bytes {
            return Err(OfferError::TooLarge(self.max_bytes));
        }
        let (payload, consumed) = wire::decode_frame(bytes, self.max_bytes - LEN_SIZE)?;
        if consumed != bytes.len() {
            return Err(OfferError::Trailing);
        }
        Self::decode_payload(payload)
    }

    /// Read one offer frame from a connection. At most `max_bytes` are ever read from it.
    pub async fn read_offer<R: AsyncRead + Unpin>(&self, reader: R) -> Result<Offer, OfferError> {
        // The length check inside read_frame keeps a frame within the cap; `take` bounds the rest.
        let mut limited = reader.take(self.max_bytes as u64);
        let payload = wire::read_frame(&mut limited, self.max_bytes - LEN_SIZE).await?;
        Self::decode_payload(&payload)
    }

    fn decode_payload(payload: &[u8]) -> Result<Offer, OfferError> {
        let decoded = OfferPayload::from_bytes(payload)?;
        if decoded.protocol_version != PROTOCOL_VERSION {
            return Err(OfferError::UnsupportedVersion(decoded.protocol_version));
        }
        if decoded.kind != OfferKind::Authentication {
            return Err(OfferError::DisallowedKind(decoded.kind));
        }
        if decoded.service_commitment.is_empty() {
            return Err(OfferError::EmptyCommitment);
        }
        Ok(Offer {
            commitment: decoded.service_commitment,
            address: decoded.address,
            pairing_name: decoded.pairing_name,
            raw: payload.to_vec(),
        })
    }
}

impl Default for OfferDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OFFER_BYTES)
    }
}
