//! Authenticator: the entry point a host feeds offers and user confirmations into.
//!
//! Offer path: decode, resolve the pairing, ask the mode policy, then either update
//! availability (and maybe alert) or start a session right away.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::availability::{AvailabilityEvent, AvailabilityTracker, LoginSummary};
use crate::channel::ChannelFactory;
use crate::config::Config;
use crate::handshake::Handshake;
use crate::notify::Subscription;
use crate::offer::{Offer, OfferDecoder};
use crate::pairing::{PairingResolver, PairingStore, ResolvedOffer};
use crate::policy::{Decision, Mode, ModePolicy};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionError};

/// Device-level alert raised in notification mode.
pub trait Notifier: Send + Sync {
    fn alert(&self, login: &LoginSummary);
}

/// Alerts by logging; for hosts without a notification surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, login: &LoginSummary) {
        tracing::info!(service = %login.commitment, name = %login.name, "login available; confirm to authenticate");
    }
}

/// What happened to one incoming offer.
#[derive(Debug, Clone)]
pub enum OfferAction {
    /// Undecodable or disallowed payload.
    Dropped,
    /// Well-formed but unpaired.
    Ignored,
    /// Availability updated; waiting for a confirmation.
    Deferred { became_available: bool },
    /// A session was started. It may be in ERROR if the handshake failed.
    Authenticated(Session),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("no login available")]
    NothingAvailable,
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct Authenticator {
    decoder: OfferDecoder,
    resolver: PairingResolver,
    tracker: AvailabilityTracker,
    policy: ModePolicy,
    registry: SessionRegistry,
    factory: Arc<dyn ChannelFactory>,
    notifier: Arc<dyn Notifier>,
}

impl Authenticator {
    /// Must be called within a tokio runtime (the registry starts its scheduler).
    pub fn new(
        config: &Config,
        store: Arc<dyn PairingStore>,
        handshake: Arc<dyn Handshake>,
        factory: Arc<dyn ChannelFactory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = SessionRegistry::new(handshake, config.proxy_timeout());
        let policy = ModePolicy::new(config.mode, Arc::new(registry.clone()));
        Self {
            decoder: OfferDecoder::new(config.max_offer_bytes),
            resolver: PairingResolver::new(store),
            tracker: AvailabilityTracker::new(config.availability_timeout()),
            policy,
            registry,
            factory,
            notifier,
        }
    }

    pub fn mode(&self) -> Mode {
        self.policy.mode()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &AvailabilityTracker {
        &self.tracker
    }

    pub fn subscribe_availability(&self) -> Subscription<AvailabilityEvent> {
        self.tracker.subscribe()
    }

    pub fn subscribe_sessions(&self) -> Subscription<Session> {
        self.registry.subscribe()
    }

    /// Read one offer from a freshly accepted connection and act on it.
    ///
    /// `read_timeout` bounds only the read. Authentication that follows runs under the
    /// proxy timeout, and its outcome is always published.
    pub async fn on_connection<R: AsyncRead + Unpin>(&self, reader: R, read_timeout: Duration) -> OfferAction {
        match tokio::time::timeout(read_timeout, self.decoder.read_offer(reader)).await {
            Ok(Ok(offer)) => self.on_offer(offer).await,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "dropping offer");
                OfferAction::Dropped
            }
            Err(_) => {
                tracing::debug!(?read_timeout, "no offer before timeout");
                OfferAction::Dropped
            }
        }
    }

    /// Act on one complete offer frame.
    pub async fn on_offer_bytes(&self, bytes: &[u8]) -> OfferAction {
        match self.decoder.decode(bytes) {
            Ok(offer) => self.on_offer(offer).await,
            Err(e) => {
                tracing::debug!(error = %e, "dropping offer");
                OfferAction::Dropped
            }
        }
    }

    pub async fn on_offer(&self, offer: Offer) -> OfferAction {
        let resolved = self.resolver.resolve(offer).await;
        match self.policy.decide(&resolved).await {
            Decision::Ignore => OfferAction::Ignored,
            Decision::Defer => self.defer(resolved, false),
            Decision::DeferAndNotify => self.defer(resolved, true),
            Decision::Authenticate => self.authenticate(resolved).await,
        }
    }

    /// Start a session for the current available login (explicit user confirmation).
    pub async fn confirm_available(&self) -> Result<Session, ConfirmError> {
        let login = self.tracker.take().ok_or(ConfirmError::NothingAvailable)?;
        tracing::info!(service = %login.commitment(), name = %login.pairing.name, "login confirmed");
        let session = self
            .registry
            .start_session(login.pairing, self.factory.as_ref())
            .await?;
        Ok(session)
    }

    fn defer(&self, resolved: ResolvedOffer, notify: bool) -> OfferAction {
        let became_available = self.tracker.on_offer_resolved(resolved);
        if notify && became_available {
            if let Some(login) = self.tracker.current() {
                self.notifier.alert(&login.summary());
            }
        }
        OfferAction::Deferred { became_available }
    }

    async fn authenticate(&self, resolved: ResolvedOffer) -> OfferAction {
        let Some(pairing) = resolved.pairing.clone() else {
            return OfferAction::Ignored;
        };
        match self
            .registry
            .start_session(pairing, self.factory.as_ref())
            .await
        {
            Ok(session) => OfferAction::Authenticated(session),
            Err(e) => {
                // Lost a race with another start for this service: fall back to confirmation.
                tracing::debug!(error = %e, "automatic authentication skipped");
                self.defer(resolved, false)
            }
        }
    }
}
