//! Reauthentication driver: runs one cycle for one session over its channel.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::channel::ProxyChannel;
use crate::handshake::{Handshake, ReauthOutcome};
use crate::scheduler::DriverId;
use crate::session::{AuthToken, Session, SessionId};

/// How a reauthentication cycle ended, as seen by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Renewed {
        next_interval: Duration,
        token: Option<AuthToken>,
    },
    /// Remote explicitly ended the session.
    Ended,
    /// Protocol, handshake or transport failure. Terminal for the session.
    Failed(String),
}

pub struct ReauthDriver {
    id: DriverId,
    session: SessionId,
    channel: ProxyChannel,
    next_deadline: Mutex<Option<Instant>>,
    /// Held for a whole cycle; the channel carries one round trip at a time.
    turn: tokio::sync::Mutex<()>,
}

impl ReauthDriver {
    pub fn new(id: DriverId, session: SessionId, channel: ProxyChannel) -> Self {
        Self {
            id,
            session,
            channel,
            next_deadline: Mutex::new(None),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> DriverId {
        self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        *self.next_deadline.lock()
    }

    pub(crate) fn set_next_deadline(&self, deadline: Option<Instant>) {
        *self.next_deadline.lock() = deadline;
    }

    /// Wait until no other cycle is running on this driver. Hold the guard for the whole cycle.
    pub(crate) async fn exclusive(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    /// One reauthentication round trip. Never panics or propagates: every failure becomes `Failed`.
    pub async fn run_cycle(&self, handshake: &dyn Handshake, snapshot: &Session) -> CycleOutcome {
        tracing::debug!(session = %self.session, driver = %self.id, "reauthentication cycle");
        match handshake.reauthenticate(&self.channel, snapshot).await {
            Ok(ReauthOutcome::Continue {
                next_interval,
                token,
            }) => CycleOutcome::Renewed {
                next_interval,
                token,
            },
            Ok(ReauthOutcome::Ended) => CycleOutcome::Ended,
            Err(e) => CycleOutcome::Failed(e.to_string()),
        }
    }
}

impl std::fmt::Debug for ReauthDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReauthDriver")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}
