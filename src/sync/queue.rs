//! Blocking FIFO with an explicit stop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    running: bool,
}

/// Thread-safe blocking queue.
///
/// Used both for finished packets (capture thread → consumer) and for
/// pending session admissions (session owner → capture thread). After
/// [`Queue::stop`] pushes are refused and blocked poppers return `None`
/// once the remaining items are drained.
#[derive(Debug)]
pub struct Queue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Create a running, empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                running: true,
            }),
            cond: Condvar::new(),
        }
    }

    /// Append an item. Returns the item back if the queue was stopped.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(item);
        }
        state.items.push_back(item);
        self.cond.notify_one();
        Ok(())
    }

    /// Block until an item is available or the queue is stopped and empty
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if !state.running {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`Queue::pop`] but gives up after `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if !state.running || self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Remove and return everything currently queued
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Whether anything is queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue still accepts pushes
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Refuse further pushes and wake every blocked popper
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        self.cond.notify_all();
    }
}
