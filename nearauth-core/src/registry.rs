//! Session registry: every live session, its reauthentication driver, and the lifecycle operations.
//!
//! The registry owns the `ReauthScheduler`. A fired timer spawns one reauthentication
//! cycle; the cycle's completion re-enters the registry, which only applies the result
//! if the session is still registered and has not been paused or resumed since the
//! cycle started (tracked by a per-session epoch).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::channel::{ChannelFactory, ProxyChannel};
use crate::driver::{CycleOutcome, ReauthDriver};
use crate::handshake::{AuthGrant, Handshake};
use crate::identity::ServiceCommitment;
use crate::notify::{Subscribers, Subscription};
use crate::pairing::Pairing;
use crate::policy::{DirectoryError, SessionDirectory};
use crate::scheduler::ReauthScheduler;
use crate::session::{Session, SessionError, SessionId, SessionStatus};

struct Entry {
    session: Session,
    driver: Arc<ReauthDriver>,
    /// Bumped on pause and resume; cycles started under an older epoch are discarded.
    epoch: u64,
}

struct RegistryState {
    sessions: HashMap<SessionId, Entry>,
    /// Services with a handshake in flight, keyed to the reservation that owns them.
    starting: HashMap<ServiceCommitment, u64>,
    next_reservation: u64,
    subscribers: Subscribers<Session>,
}

impl RegistryState {
    fn has_live(&self, commitment: &ServiceCommitment) -> bool {
        self.starting.contains_key(commitment)
            || self
                .sessions
                .values()
                .any(|e| e.session.status.is_live() && e.session.commitment() == commitment)
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    scheduler: Arc<ReauthScheduler>,
    handshake: Arc<dyn Handshake>,
    proxy_timeout: Duration,
    idle: Notify,
}

/// Cheap to clone; clones share the same sessions and scheduler.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry with its own scheduler. Must be called within a tokio runtime.
    pub fn new(handshake: Arc<dyn Handshake>, proxy_timeout: Duration) -> Self {
        Self::with_scheduler(handshake, proxy_timeout, ReauthScheduler::new())
    }

    pub fn with_scheduler(
        handshake: Arc<dyn Handshake>,
        proxy_timeout: Duration,
        scheduler: Arc<ReauthScheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    sessions: HashMap::new(),
                    starting: HashMap::new(),
                    next_reservation: 0,
                    subscribers: Subscribers::new(),
                }),
                scheduler,
                handshake,
                proxy_timeout,
                idle: Notify::new(),
            }),
        }
    }

    pub fn scheduler(&self) -> &Arc<ReauthScheduler> {
        &self.inner.scheduler
    }

    /// Authenticate against `pairing` and register the resulting session.
    ///
    /// A failed channel open or handshake yields a session in ERROR (published, not registered).
    /// `Err(AlreadyLive)` means the service already has a live session or a start in flight.
    pub async fn start_session(
        &self,
        pairing: Pairing,
        factory: &dyn ChannelFactory,
    ) -> Result<Session, SessionError> {
        let reservation = self.reserve(&pairing.commitment)?;
        tracing::info!(service = %pairing.commitment, name = %pairing.name, channel = factory.kind(), "starting session");

        match self.establish(&pairing, factory).await {
            Ok((channel, grant)) => {
                let session = self.register(pairing, channel, grant, &reservation);
                tracing::info!(session = %session.id, service = %session.commitment(), "session active");
                Ok(session)
            }
            Err(reason) => {
                tracing::warn!(service = %pairing.commitment, %reason, "authentication failed");
                let session = Session::failed(pairing, reason);
                self.inner.state.lock().subscribers.broadcast(&session);
                Ok(session)
            }
        }
    }

    /// Stop reauthenticating `id` but keep its driver for a cheap resume. Valid only from ACTIVE.
    pub fn pause_session(&self, id: SessionId) -> Result<Session, SessionError> {
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        entry.session.transition(SessionStatus::Paused)?;
        entry.epoch += 1;
        self.inner.scheduler.clear_timer(entry.driver.id());
        entry.driver.set_next_deadline(None);
        let snapshot = entry.session.clone();
        state.subscribers.broadcast(&snapshot);
        tracing::info!(session = %id, "session paused");
        Ok(snapshot)
    }

    /// Resume a paused session; a fresh reauthentication cycle runs right away. Valid only from PAUSED.
    pub fn resume_session(&self, id: SessionId) -> Result<Session, SessionError> {
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        entry.session.transition(SessionStatus::Active)?;
        entry.epoch += 1;
        schedule(&self.inner, &entry.driver, entry.epoch, Duration::ZERO);
        let snapshot = entry.session.clone();
        state.subscribers.broadcast(&snapshot);
        tracing::info!(session = %id, "session resumed");
        Ok(snapshot)
    }

    /// Close and remove a session. Valid from ACTIVE or PAUSED; safe while a cycle is in flight.
    pub fn close_session(&self, id: SessionId) -> Result<Session, SessionError> {
        let mut state = self.inner.state.lock();
        let closed = terminate(&self.inner, &mut state, id, SessionStatus::Closed, None)?;
        tracing::info!(session = %id, "session closed");
        Ok(closed)
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner
            .state
            .lock()
            .sessions
            .get(&id)
            .map(|e| e.session.clone())
    }

    /// Snapshot of every registered session, for resynchronising a restarted observer.
    pub fn all_sessions(&self) -> Vec<Session> {
        self.inner
            .state
            .lock()
            .sessions
            .values()
            .map(|e| e.session.clone())
            .collect()
    }

    /// True if an ACTIVE or PAUSED session, or a start in flight, exists for `commitment`.
    pub fn has_live_session(&self, commitment: &ServiceCommitment) -> bool {
        self.inner.state.lock().has_live(commitment)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().sessions.is_empty()
    }

    /// Session-changed events: one snapshot per transition (and per successful renewal).
    pub fn subscribe(&self) -> Subscription<Session> {
        let (id, rx) = self.inner.state.lock().subscribers.add();
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().subscribers.remove(id);
            }
        })
    }

    /// Resolves the next time the last session leaves the registry.
    pub async fn wait_idle(&self) {
        self.inner.idle.notified().await;
    }

    fn reserve(&self, commitment: &ServiceCommitment) -> Result<Reservation, SessionError> {
        let mut state = self.inner.state.lock();
        if state.has_live(commitment) {
            return Err(SessionError::AlreadyLive(commitment.clone()));
        }
        state.next_reservation = state.next_reservation.wrapping_add(1);
        let token = state.next_reservation;
        state.starting.insert(commitment.clone(), token);
        Ok(Reservation {
            inner: self.inner.clone(),
            commitment: commitment.clone(),
            token,
        })
    }

    async fn establish(
        &self,
        pairing: &Pairing,
        factory: &dyn ChannelFactory,
    ) -> Result<(ProxyChannel, AuthGrant), String> {
        let channel = ProxyChannel::open(factory, pairing, self.inner.proxy_timeout)
            .await
            .map_err(|e| e.to_string())?;
        let grant = self
            .inner
            .handshake
            .perform(&channel, pairing)
            .await
            .map_err(|e| e.to_string())?;
        Ok((channel, grant))
    }

    fn register(
        &self,
        pairing: Pairing,
        channel: ProxyChannel,
        grant: AuthGrant,
        reservation: &Reservation,
    ) -> Session {
        let session = Session::active(pairing, grant.token);
        let driver = Arc::new(ReauthDriver::new(
            self.inner.scheduler.register_driver(),
            session.id,
            channel,
        ));
        let mut state = self.inner.state.lock();
        reservation.release(&mut state);
        state.sessions.insert(
            session.id,
            Entry {
                session: session.clone(),
                driver: driver.clone(),
                epoch: 0,
            },
        );
        state.subscribers.broadcast(&session);
        // First cycle right away so the session cannot lapse before its first scheduled tick.
        schedule(&self.inner, &driver, 0, Duration::ZERO);
        session
    }
}

#[async_trait]
impl SessionDirectory for SessionRegistry {
    async fn has_live_session(&self, commitment: &ServiceCommitment) -> Result<bool, DirectoryError> {
        Ok(SessionRegistry::has_live_session(self, commitment))
    }
}

/// Holds a service's "starting" mark for the duration of a handshake.
struct Reservation {
    inner: Arc<RegistryInner>,
    commitment: ServiceCommitment,
    token: u64,
}

impl Reservation {
    fn release(&self, state: &mut RegistryState) {
        if state.starting.get(&self.commitment) == Some(&self.token) {
            state.starting.remove(&self.commitment);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        self.release(&mut state);
    }
}

/// Arm the driver's timer; when it fires, one cycle runs on its own task.
fn schedule(inner: &Arc<RegistryInner>, driver: &ReauthDriver, epoch: u64, delay: Duration) {
    driver.set_next_deadline(Some(Instant::now() + delay));
    let weak = Arc::downgrade(inner);
    let session = driver.session_id();
    inner.scheduler.set_timer(
        driver.id(),
        delay,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(run_cycle(inner, session, epoch));
            }
        }),
    );
}

async fn run_cycle(inner: Arc<RegistryInner>, id: SessionId, epoch: u64) {
    let Some((driver, _)) = cycle_target(&inner, id, epoch) else {
        return;
    };
    // A cycle from before a pause may still be on the wire; wait it out, then look again.
    let _turn = driver.exclusive().await;
    let Some((_, snapshot)) = cycle_target(&inner, id, epoch) else {
        return;
    };
    let outcome = driver.run_cycle(inner.handshake.as_ref(), &snapshot).await;
    complete_cycle(&inner, id, epoch, outcome);
}

/// Driver and snapshot for a cycle, if the session is still active in the same epoch.
fn cycle_target(inner: &RegistryInner, id: SessionId, epoch: u64) -> Option<(Arc<ReauthDriver>, Session)> {
    let state = inner.state.lock();
    state
        .sessions
        .get(&id)
        .filter(|e| e.epoch == epoch && e.session.status == SessionStatus::Active)
        .map(|e| (e.driver.clone(), e.session.clone()))
}

fn complete_cycle(inner: &Arc<RegistryInner>, id: SessionId, epoch: u64, outcome: CycleOutcome) {
    let mut state = inner.state.lock();
    let current = state
        .sessions
        .get(&id)
        .map(|e| (e.epoch, e.session.status));
    match current {
        None => {
            tracing::debug!(session = %id, "discarding reauthentication result for removed session");
            return;
        }
        Some((current_epoch, status)) if current_epoch != epoch || status != SessionStatus::Active => {
            tracing::debug!(session = %id, ?status, "discarding stale reauthentication result");
            return;
        }
        Some(_) => {}
    }

    match outcome {
        CycleOutcome::Renewed {
            next_interval,
            token,
        } => {
            let Some(entry) = state.sessions.get_mut(&id) else {
                return;
            };
            entry.session.last_auth = Some(SystemTime::now());
            if token.is_some() {
                entry.session.auth_token = token;
            }
            schedule(inner, &entry.driver, epoch, next_interval);
            let snapshot = entry.session.clone();
            state.subscribers.broadcast(&snapshot);
            tracing::debug!(session = %id, ?next_interval, "reauthenticated");
        }
        CycleOutcome::Ended => {
            if terminate(inner, &mut state, id, SessionStatus::Closed, None).is_ok() {
                tracing::info!(session = %id, "session ended by service");
            }
        }
        CycleOutcome::Failed(reason) => {
            tracing::warn!(session = %id, %reason, "reauthentication failed");
            let _ = terminate(inner, &mut state, id, SessionStatus::Error, Some(reason));
        }
    }
}

/// Move a session to a terminal status, drop its driver and timer, and publish the final snapshot.
fn terminate(
    inner: &RegistryInner,
    state: &mut RegistryState,
    id: SessionId,
    status: SessionStatus,
    reason: Option<String>,
) -> Result<Session, SessionError> {
    let mut entry = state
        .sessions
        .remove(&id)
        .ok_or(SessionError::UnknownSession(id))?;
    if let Err(e) = entry.session.transition(status) {
        state.sessions.insert(id, entry);
        return Err(e);
    }
    entry.session.error = reason;
    inner.scheduler.clear_timer(entry.driver.id());
    entry.driver.set_next_deadline(None);
    state.subscribers.broadcast(&entry.session);
    if state.sessions.is_empty() {
        inner.idle.notify_waiters();
    }
    Ok(entry.session)
}
