//! Scheduler facing timer API
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use crate::Ts;

/// Timer trait provides access to simulation time and the host scheduler
/// for a single node.
///
/// There is no cancellation, a node that no longer wants a wake-up ignores
/// it when it fires (see the clock stamp check in the MAC).
pub trait Timer {
    /// Returns the current simulation time in nanoseconds
    fn now(&self) -> Ts;

    /// Request a wake-up of the owning node at absolute time `at`
    fn schedule(&mut self, at: Ts);
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use crate::Ts;

    #[derive(Debug, Default)]
    struct Inner {
        now: Ts,
        scheduled: Vec<Ts>,
    }

    /// Mock timer implementation to assist with testing
    ///
    /// Clones share the same clock and wake-up log.
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Inner>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner::default())))
        }

        pub fn set(&mut self, now: Ts) {
            self.0.lock().unwrap().now = now;
        }

        pub fn inc(&mut self, by: Ts) {
            self.0.lock().unwrap().now += by;
        }

        /// All wake-ups requested so far
        pub fn scheduled(&self) -> Vec<Ts> {
            self.0.lock().unwrap().scheduled.clone()
        }

        /// Most recently requested wake-up
        pub fn last_scheduled(&self) -> Option<Ts> {
            self.0.lock().unwrap().scheduled.last().cloned()
        }

        /// Earliest pending wake-up at or after the current time
        pub fn next(&self) -> Option<Ts> {
            let i = self.0.lock().unwrap();
            i.scheduled.iter().cloned().filter(|t| *t >= i.now).min()
        }

        /// Pop the earliest pending wake-up at or after the current time
        /// and advance the clock to it
        pub fn advance(&mut self) -> Option<Ts> {
            let mut i = self.0.lock().unwrap();
            let now = i.now;
            let next = i.scheduled.iter().cloned().filter(|t| *t >= now).min()?;
            let idx = i.scheduled.iter().position(|t| *t == next)?;
            i.scheduled.remove(idx);
            i.now = next;
            Some(next)
        }
    }

    impl super::Timer for MockTimer {
        fn now(&self) -> Ts {
            self.0.lock().unwrap().now
        }

        fn schedule(&mut self, at: Ts) {
            self.0.lock().unwrap().scheduled.push(at);
        }
    }
}
