//! Availability tracker: the single current "available login" and its expiry.
//!
//! A verifier re-broadcasts its offer on a fixed cadence (~5 s). Each paired offer
//! replaces the current login and restarts the expiry timer, which runs slightly
//! longer than the cadence so a steady stream of offers keeps the login alive
//! without an unavailable/available flicker. Subscribers only see edges.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::identity::ServiceCommitment;
use crate::notify::{Subscribers, Subscription};
use crate::offer::Offer;
use crate::pairing::{Pairing, ResolvedOffer};

/// Default expiry window for an available login.
pub const DEFAULT_AVAILABILITY_TIMEOUT: Duration = Duration::from_millis(6_000);

/// The current login a user (or the automatic policy) can act on.
#[derive(Debug, Clone)]
pub struct AvailableLogin {
    pub offer: Offer,
    pub pairing: Pairing,
    pub received_at: Instant,
}

impl AvailableLogin {
    pub fn commitment(&self) -> &ServiceCommitment {
        self.offer.commitment()
    }

    pub fn summary(&self) -> LoginSummary {
        LoginSummary {
            commitment: self.commitment().clone(),
            name: self.pairing.name.clone(),
            received_at: self.received_at,
        }
    }
}

/// What subscribers are told about an available login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSummary {
    pub commitment: ServiceCommitment,
    pub name: String,
    pub received_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityEvent {
    Available(LoginSummary),
    Unavailable,
}

struct TrackerState {
    current: Option<AvailableLogin>,
    /// Bumped on every replace/clear; an expiry timer only acts on its own generation.
    generation: u64,
    expiry: Option<JoinHandle<()>>,
    subscribers: Subscribers<AvailabilityEvent>,
}

impl TrackerState {
    fn cancel_expiry(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

/// Holds at most one `AvailableLogin`. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AvailabilityTracker {
    state: Arc<Mutex<TrackerState>>,
    timeout: Duration,
}

impl AvailabilityTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                current: None,
                generation: 0,
                expiry: None,
                subscribers: Subscribers::new(),
            })),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply a resolved offer. Unpaired offers are dropped without any state change or event.
    /// Returns true when the login became available for a service other than the previous one;
    /// a refresh for the same service only restarts the expiry timer.
    ///
    /// Must be called from within a tokio runtime (the expiry timer is a spawned task).
    pub fn on_offer_resolved(&self, resolved: ResolvedOffer) -> bool {
        let ResolvedOffer {
            offer,
            pairing: Some(pairing),
        } = resolved
        else {
            return false;
        };

        let mut state = self.state.lock();
        let became_available = state
            .current
            .as_ref()
            .map_or(true, |current| current.commitment() != offer.commitment());

        state.cancel_expiry();
        let generation = state.generation;
        state.expiry = Some(self.spawn_expiry(generation));

        let login = AvailableLogin {
            offer,
            pairing,
            received_at: Instant::now(),
        };
        let summary = login.summary();
        state.current = Some(login);

        if became_available {
            tracing::debug!(service = %summary.commitment, name = %summary.name, "login available");
            state
                .subscribers
                .broadcast(&AvailabilityEvent::Available(summary));
        } else {
            tracing::trace!(service = %summary.commitment, "login refreshed");
        }
        became_available
    }

    /// Snapshot of the current login, if any.
    pub fn current(&self) -> Option<AvailableLogin> {
        self.state.lock().current.clone()
    }

    pub fn is_available(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Consume the current login (explicit user action). Fires "unavailable" when something was taken.
    pub fn take(&self) -> Option<AvailableLogin> {
        let mut state = self.state.lock();
        let taken = state.current.take()?;
        state.cancel_expiry();
        state.subscribers.broadcast(&AvailabilityEvent::Unavailable);
        Some(taken)
    }

    /// Subscribe to availability edges. A currently available login is delivered
    /// immediately as a synthetic `Available` event.
    pub fn subscribe(&self) -> Subscription<AvailabilityEvent> {
        let mut state = self.state.lock();
        let (id, rx) = state.subscribers.add();
        if let Some(current) = &state.current {
            let summary = current.summary();
            state
                .subscribers
                .send_to(id, AvailabilityEvent::Available(summary));
        }
        let weak: Weak<Mutex<TrackerState>> = Arc::downgrade(&self.state);
        Subscription::new(rx, move || {
            if let Some(state) = weak.upgrade() {
                state.lock().subscribers.remove(id);
            }
        })
    }

    fn spawn_expiry(&self, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.state);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(state) = weak.upgrade() {
                expire(&state, generation);
            }
        })
    }
}

/// Clear the login unless a newer offer (or a take) has moved the generation on.
fn expire(state: &Mutex<TrackerState>, generation: u64) {
    let mut state = state.lock();
    if state.generation != generation {
        return;
    }
    state.expiry = None;
    if let Some(expired) = state.current.take() {
        tracing::debug!(service = %expired.commitment(), "login expired");
        state.subscribers.broadcast(&AvailabilityEvent::Unavailable);
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_AVAILABILITY_TIMEOUT)
    }
}

impl Drop for TrackerState {
    fn drop(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}
