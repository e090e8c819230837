//! Pairing lookup: resolve an offer's service commitment against the pairing store.
//! Lookup failures resolve to "unpaired" so nothing is surfaced or authenticated under uncertainty.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::identity::ServiceCommitment;
use crate::offer::Offer;
use crate::protocol::ServiceAddress;

/// Stored relationship between this device and a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub commitment: ServiceCommitment,
    pub name: String,
    pub address: Option<ServiceAddress>,
}

impl Pairing {
    pub fn new(commitment: ServiceCommitment, name: impl Into<String>) -> Self {
        Self {
            commitment,
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: ServiceAddress) -> Self {
        self.address = Some(address);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("pairing store unavailable: {0}")]
    Unavailable(String),
}

/// External pairing storage.
#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn lookup(&self, commitment: &ServiceCommitment) -> Result<Option<Pairing>, PairingError>;
}

/// An offer together with the outcome of its pairing lookup.
#[derive(Debug, Clone)]
pub struct ResolvedOffer {
    pub offer: Offer,
    pub pairing: Option<Pairing>,
}

impl ResolvedOffer {
    pub fn paired(offer: Offer, pairing: Pairing) -> Self {
        Self {
            offer,
            pairing: Some(pairing),
        }
    }

    pub fn unpaired(offer: Offer) -> Self {
        Self {
            offer,
            pairing: None,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.pairing.is_some()
    }
}

pub struct PairingResolver {
    store: std::sync::Arc<dyn PairingStore>,
}

impl PairingResolver {
    pub fn new(store: std::sync::Arc<dyn PairingStore>) -> Self {
        Self { store }
    }

    /// Look up the offer's pairing. The live offer's address, when present, overrides the stored one.
    pub async fn resolve(&self, offer: Offer) -> ResolvedOffer {
        match self.store.lookup(offer.commitment()).await {
            Ok(Some(mut pairing)) => {
                if let Some(address) = offer.address() {
                    pairing.address = Some(address.clone());
                }
                ResolvedOffer::paired(offer, pairing)
            }
            Ok(None) => {
                tracing::trace!(service = %offer.commitment(), "offer from unpaired service");
                ResolvedOffer::unpaired(offer)
            }
            Err(e) => {
                tracing::warn!(service = %offer.commitment(), error = %e, "pairing lookup failed; treating as unpaired");
                ResolvedOffer::unpaired(offer)
            }
        }
    }
}

/// In-memory pairing store.
#[derive(Default)]
pub struct MemoryPairingStore {
    pairings: RwLock<HashMap<ServiceCommitment, Pairing>>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pairing: Pairing) {
        self.pairings.write().insert(pairing.commitment.clone(), pairing);
    }

    pub fn len(&self) -> usize {
        self.pairings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairings.read().is_empty()
    }
}

impl FromIterator<Pairing> for MemoryPairingStore {
    fn from_iter<I: IntoIterator<Item = Pairing>>(iter: I) -> Self {
        let store = Self::new();
        for pairing in iter {
            store.insert(pairing);
        }
        store
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn lookup(&self, commitment: &ServiceCommitment) -> Result<Option<Pairing>, PairingError> {
        Ok(self.pairings.read().get(commitment).cloned())
    }
}
