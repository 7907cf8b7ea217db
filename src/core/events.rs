//! Typed notification channels
//!
//! An [`Emitter`] is the subscription registry behind each notification stream
//! a component exposes. Subscribers receive their own `mpsc` receiver; fired
//! events are cloned to every live subscriber and dead subscribers are pruned.

use std::sync::mpsc::{self, Receiver, Sender};

pub struct Emitter<T> {
    subscribers: Vec<Sender<T>>,
}

impl<T: Clone> Emitter<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver an event to all subscribers
    pub fn fire(&mut self, event: T) {
        // Last subscriber gets the original, the rest get clones
        let mut alive = Vec::with_capacity(self.subscribers.len());
        let count = self.subscribers.len();
        let mut event = Some(event);
        for (i, tx) in self.subscribers.drain(..).enumerate() {
            let payload = if i + 1 == count {
                event.take()
            } else {
                event.clone()
            };
            if let Some(payload) = payload {
                if tx.send(payload).is_ok() {
                    alive.push(tx);
                }
            }
        }
        self.subscribers = alive;
    }

    /// Drop all subscribers; their receivers observe disconnection.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Clone> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_reaches_all_subscribers() {
        let mut emitter = Emitter::new();
        let a = emitter.subscribe();
        let b = emitter.subscribe();
        emitter.fire(3u32);
        assert_eq!(a.try_recv(), Ok(3));
        assert_eq!(b.try_recv(), Ok(3));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut emitter = Emitter::new();
        let a = emitter.subscribe();
        drop(emitter.subscribe());
        emitter.fire("x".to_string());
        assert_eq!(emitter.subscriber_count(), 1);
        assert_eq!(a.try_recv().as_deref(), Ok("x"));
    }

    #[test]
    fn test_clear_disconnects() {
        let mut emitter: Emitter<u8> = Emitter::new();
        let a = emitter.subscribe();
        emitter.clear();
        assert!(matches!(a.try_recv(), Err(mpsc::TryRecvError::Disconnected)));
    }
}
