//! Session model and its state machine.
//!
//! ```text
//! ACTIVE <-> PAUSED
//! ACTIVE  -> ERROR
//! ACTIVE | PAUSED -> CLOSED
//! ```
//! CLOSED and ERROR are terminal. A session is born ACTIVE (handshake succeeded) or ERROR.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::ServiceCommitment;
use crate::pairing::Pairing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Error)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, Paused) | (Paused, Active) | (Active, Error) | (Active, Closed) | (Paused, Closed)
        )
    }
}

/// Opaque token granted by the verifier. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(Vec<u8>);

impl AuthToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        AuthToken(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<{} bytes>)", self.0.len())
    }
}

/// Snapshot of a session as published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub pairing: Pairing,
    pub status: SessionStatus,
    pub last_auth: Option<SystemTime>,
    pub auth_token: Option<AuthToken>,
    /// Why the session entered ERROR; rendered by the presentation layer.
    pub error: Option<String>,
}

impl Session {
    pub(crate) fn active(pairing: Pairing, auth_token: Option<AuthToken>) -> Self {
        Self {
            id: SessionId::new(),
            pairing,
            status: SessionStatus::Active,
            last_auth: Some(SystemTime::now()),
            auth_token,
            error: None,
        }
    }

    pub(crate) fn failed(pairing: Pairing, reason: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            pairing,
            status: SessionStatus::Error,
            last_auth: None,
            auth_token: None,
            error: Some(reason.into()),
        }
    }

    pub fn commitment(&self) -> &ServiceCommitment {
        &self.pairing.commitment
    }

    /// Move to `next`, enforcing the state machine.
    pub(crate) fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {id}: cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("service {0} already has a live or starting session")]
    AlreadyLive(ServiceCommitment),
}
