//! Subscriber fan-out shared by the availability tracker and the session registry.
//!
//! Every subscriber owns an unbounded channel, so a broadcast issued while the
//! owner's lock is held reaches each subscriber in issue order and is never dropped.

use std::collections::HashMap;

use tokio::sync::mpsc;

pub(crate) struct Subscribers<E> {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<E>>,
}

impl<E: Clone> Subscribers<E> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            senders: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self) -> (u64, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.senders.insert(id, tx);
        (id, rx)
    }

    pub(crate) fn send_to(&self, id: u64, event: E) {
        if let Some(tx) = self.senders.get(&id) {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.senders.remove(&id);
    }

    /// Send to every live subscriber; receivers that were dropped are pruned.
    pub(crate) fn broadcast(&mut self, event: &E) {
        self.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<E> Subscription<E> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<E>,
        unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Wait for the next event. `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_prunes_dropped_receivers() {
        let mut subs: Subscribers<u32> = Subscribers::new();
        let (_, mut a) = subs.add();
        let (_, b) = subs.add();
        drop(b);
        subs.broadcast(&7);
        assert_eq!(subs.len(), 1);
        assert_eq!(a.try_recv().ok(), Some(7));
    }

    #[test]
    fn dropping_subscription_runs_unsubscribe() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let flag = Arc::new(AtomicBool::new(false));
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let seen = flag.clone();
        let sub = Subscription::new(rx, move || seen.store(true, Ordering::SeqCst));
        drop(sub);
        assert!(flag.load(Ordering::SeqCst));
    }
}
