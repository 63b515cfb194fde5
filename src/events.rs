//! Listener registry
//!
//! Each subscriber owns an unbounded queue, so emitting never blocks the
//! capture or receive loop and every subscriber sees events in emission
//! order. Dropping the [`Subscription`] unsubscribes.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

type SubscriberMap<E> = DashMap<Uuid, mpsc::UnboundedSender<E>>;

/// Fan-out of session events to any number of subscribers
pub struct Listeners<E> {
    subscribers: Arc<SubscriberMap<E>>,
}

impl<E: Clone + Send + 'static> Listeners<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver `event` to every live subscriber
    pub fn emit(&self, event: E) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone + Send + 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one subscriber's event queue
pub struct Subscription<E> {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<E>,
    registry: Weak<SubscriberMap<E>>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. Returns `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Explicitly stop receiving events
    pub fn unsubscribe(self) {}
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let listeners = Listeners::new();
        let mut a = listeners.subscribe();
        let mut b = listeners.subscribe();

        for i in 0..5 {
            listeners.emit(i);
        }

        assert_eq!(a.drain(), vec![0, 1, 2, 3, 4]);
        assert_eq!(b.drain(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_unsubscribe_removes_entry() {
        let listeners = Listeners::<u8>::new();
        let a = listeners.subscribe();
        let _b = listeners.subscribe();
        assert_eq!(listeners.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(listeners.subscriber_count(), 1);
        listeners.emit(1);
    }

    #[tokio::test]
    async fn test_recv_ends_when_registry_dropped() {
        let listeners = Listeners::new();
        let mut sub = listeners.subscribe();
        listeners.emit("hello");
        drop(listeners);

        assert_eq!(sub.recv().await, Some("hello"));
        assert_eq!(sub.recv().await, None);
    }
}
