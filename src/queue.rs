//! Thread-safe FIFO shared by the simulation and publisher threads.
//!
//! Producers are signal hooks running inside [`Machine::step`](crate::machine::Machine::step),
//! so `push` must return immediately. The consumer is the publisher loop, which polls
//! with `pop` and sleeps on [`EventQueue::notified`] when there is nothing to send.

use crate::event::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

const INITIAL_QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    pushed: AtomicU64,
    ready: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            pushed: AtomicU64::new(0),
            ready: Notify::new(),
        }
    }

    // A panic while holding the guard cannot leave a VecDeque half-linked, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event at the tail and wake the consumer.
    pub fn push(&self, event: Event) {
        self.lock().push_back(event);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
    }

    /// Remove the head event, or `None` when nothing is pending. Never waits.
    pub fn pop(&self) -> Option<Event> {
        self.lock().pop_front()
    }

    /// Diagnostic only: a `len` followed by a `pop` is not atomic.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn total_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Take every pending event in FIFO order.
    pub fn drain(&self) -> Vec<Event> {
        self.lock().drain(..).collect()
    }

    /// Resolves once a push has happened since the last wake-up.
    ///
    /// A push that lands before the caller starts waiting leaves a permit behind,
    /// so the wake-up is not lost.
    pub async fn notified(&self) {
        self.ready.notified().await;
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
