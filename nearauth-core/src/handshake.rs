//! Handshake capability: the cryptographic exchange is external; this crate only drives it.

use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{ChannelError, ProxyChannel};
use crate::pairing::Pairing;
use crate::session::{AuthToken, Session};

/// Successful first authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: Option<AuthToken>,
}

/// Result of one reauthentication round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReauthOutcome {
    /// Still authenticated; the server wants the next round after `next_interval`.
    Continue {
        next_interval: Duration,
        token: Option<AuthToken>,
    },
    /// The server ended the session on purpose.
    Ended,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("rejected by verifier: {0}")]
    Rejected(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[async_trait]
pub trait Handshake: Send + Sync {
    /// Full authentication against a paired service over a fresh channel.
    async fn perform(&self, channel: &ProxyChannel, pairing: &Pairing) -> Result<AuthGrant, HandshakeError>;

    /// One continuous-authentication round for an established session.
    async fn reauthenticate(
        &self,
        channel: &ProxyChannel,
        session: &Session,
    ) -> Result<ReauthOutcome, HandshakeError>;
}
