//! Condvar-backed broadcast signal.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A level-triggered signal that any number of threads can wait on.
///
/// Shutdown and join are used fire-once: once raised they stay raised and
/// every waiter, present or future, observes them. Keyframe requests are
/// used fire-many: the capture thread consumes them with [`Event::take`]
/// and the owner may raise again later.
#[derive(Debug, Default)]
pub struct Event {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create a lowered event
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event that is already raised
    pub fn raised() -> Self {
        let event = Self::new();
        event.raise();
        event
    }

    /// Raise the event and wake every waiter
    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_all();
    }

    /// Check the event without blocking or consuming it
    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Consume a pending raise. Returns whether the event was raised.
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.raised.lock())
    }

    /// Lower the event
    pub fn reset(&self) {
        *self.raised.lock() = false;
    }

    /// Block until the event is raised. Does not consume it.
    pub fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.cond.wait(&mut raised);
        }
    }

    /// Block until the event is raised or `timeout` elapses.
    ///
    /// Returns `true` if the event was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_raise_and_peek() {
        let event = Event::new();
        assert!(!event.is_raised());
        event.raise();
        assert!(event.is_raised());
        assert!(event.is_raised(), "peeking must not consume");
    }

    #[test]
    fn test_take_is_single_shot() {
        let event = Event::raised();
        assert!(event.take());
        assert!(!event.take());
        assert!(!event.is_raised());

        event.raise();
        assert!(event.take());
    }

    #[test]
    fn test_wait_wakes_all_waiters() {
        let event = Arc::new(Event::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.raise();

        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert!(event.is_raised());
    }

    #[test]
    fn test_wait_timeout() {
        let event = Event::new();
        let start = Instant::now();
        assert!(!event.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));

        event.raise();
        assert!(event.wait_timeout(Duration::from_millis(30)));
    }

    #[test]
    fn test_reset() {
        let event = Event::raised();
        event.reset();
        assert!(!event.is_raised());
    }
}
