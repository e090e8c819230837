//! Mode policy: per resolved offer, authenticate now, defer to the user, or ignore.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::ServiceCommitment;
use crate::pairing::ResolvedOffer;

/// Device authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Offers only update availability; the user confirms every login.
    #[default]
    Manual,
    /// Like `Manual`, plus a device-level alert when a login becomes available.
    Notification,
    /// Authenticate as soon as a paired offer arrives, unless a live session already exists for that service.
    Automatic,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Mode::Manual),
            "notification" => Ok(Mode::Notification),
            "automatic" => Ok(Mode::Automatic),
            other => Err(format!("unknown mode {:?}", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("session directory unavailable: {0}")]
pub struct DirectoryError(pub String);

/// The full (possibly remote) set of sessions, as seen by the automatic-mode existence check.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Whether an ACTIVE or PAUSED session exists for exactly this commitment.
    async fn has_live_session(&self, commitment: &ServiceCommitment) -> Result<bool, DirectoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Unpaired offer: no state change at all.
    Ignore,
    /// Update availability and wait for an explicit confirmation.
    Defer,
    /// As `Defer`, and raise a device alert on a new availability edge.
    DeferAndNotify,
    /// Start a session now.
    Authenticate,
}

pub struct ModePolicy {
    mode: Mode,
    directory: Arc<dyn SessionDirectory>,
}

impl ModePolicy {
    pub fn new(mode: Mode, directory: Arc<dyn SessionDirectory>) -> Self {
        Self { mode, directory }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Decide what to do with a resolved offer. Any doubt in automatic mode resolves to `Defer`.
    pub async fn decide(&self, resolved: &ResolvedOffer) -> Decision {
        if !resolved.is_paired() {
            return Decision::Ignore;
        }
        match self.mode {
            Mode::Manual => Decision::Defer,
            Mode::Notification => Decision::DeferAndNotify,
            Mode::Automatic => {
                let commitment = resolved.offer.commitment();
                match self.directory.has_live_session(commitment).await {
                    Ok(false) => Decision::Authenticate,
                    Ok(true) => {
                        tracing::debug!(service = %commitment, "live session exists; deferring offer");
                        Decision::Defer
                    }
                    Err(e) => {
                        tracing::warn!(service = %commitment, error = %e, "session check failed; deferring offer");
                        Decision::Defer
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::tests::paired;
    use crate::offer::tests::offer_frame;
    use crate::offer::OfferDecoder;

    struct FixedDirectory(Result<bool, ()>);

    #[async_trait]
    impl SessionDirectory for FixedDirectory {
        async fn has_live_session(&self, _: &ServiceCommitment) -> Result<bool, DirectoryError> {
            self.0.map_err(|_| DirectoryError("remote unreachable".into()))
        }
    }

    fn policy(mode: Mode, live: Result<bool, ()>) -> ModePolicy {
        ModePolicy::new(mode, Arc::new(FixedDirectory(live)))
    }

    #[tokio::test]
    async fn manual_and_notification_always_defer() {
        assert_eq!(policy(Mode::Manual, Ok(false)).decide(&paired(b"s")).await, Decision::Defer);
        assert_eq!(
            policy(Mode::Notification, Ok(false)).decide(&paired(b"s")).await,
            Decision::DeferAndNotify
        );
    }

    #[tokio::test]
    async fn automatic_authenticates_without_live_session() {
        assert_eq!(
            policy(Mode::Automatic, Ok(false)).decide(&paired(b"s")).await,
            Decision::Authenticate
        );
    }

    #[tokio::test]
    async fn automatic_defers_with_live_session_or_error() {
        assert_eq!(policy(Mode::Automatic, Ok(true)).decide(&paired(b"s")).await, Decision::Defer);
        assert_eq!(policy(Mode::Automatic, Err(())).decide(&paired(b"s")).await, Decision::Defer);
    }

    #[tokio::test]
    async fn unpaired_is_ignored_in_every_mode() {
        let offer = OfferDecoder::default().decode(&offer_frame(b"s")).unwrap();
        let unpaired = ResolvedOffer::unpaired(offer);
        for mode in [Mode::Manual, Mode::Notification, Mode::Automatic] {
            assert_eq!(policy(mode, Ok(false)).decide(&unpaired).await, Decision::Ignore);
        }
    }

    #[test]
    fn mode_parses_and_defaults_to_manual() {
        assert_eq!(Mode::default(), Mode::Manual);
        assert_eq!("Automatic".parse::<Mode>(), Ok(Mode::Automatic));
        assert!("sometimes".parse::<Mode>().is_err());
    }
}
