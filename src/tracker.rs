//! Successive interference cancellation candidate tracker
//!
//! Keeps every signal currently arriving at a receiver in two orders at
//! once, ascending by expiry time and descending by received power. The
//! orders are doubly linked lists threaded through a fixed size arena, the
//! links are arena indices rather than pointers.
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use log::{trace, debug};

use crate::{Ts, dbm_to_mw, error::CoreError, packet::PacketId};

/// Default number of concurrently tracked signals
pub const DEFAULT_CAPACITY: usize = 16;

/// A physically arrived, not yet cancelled transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SicSignal {
    /// Transmission identifier
    pub id: PacketId,
    /// Received power in dBm
    pub power_dbm: f64,
    /// Absolute time at which the signal stops occupying the medium
    pub expiry: Ts,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    signal: SicSignal,
    power_mw: f64,

    prev_time: Option<usize>,
    next_time: Option<usize>,

    higher_power: Option<usize>,
    lower_power: Option<usize>,
}

/// Signal candidate tracker with room for `N` concurrent signals
#[derive(Debug, Clone)]
pub struct SignalTracker<const N: usize = DEFAULT_CAPACITY> {
    slots: [Option<Slot>; N],
    len: usize,

    time_head: Option<usize>,
    time_tail: Option<usize>,

    power_head: Option<usize>,
    power_tail: Option<usize>,
}

impl <const N: usize> Default for SignalTracker<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl <const N: usize> SignalTracker<N> {
    pub fn new() -> Self {
        Self {
            slots: [None; N],
            len: 0,
            time_head: None,
            time_tail: None,
            power_head: None,
            power_tail: None,
        }
    }

    /// Number of tracked signals
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.find(id).is_some()
    }

    /// Fetch a tracked signal by id
    pub fn get(&self, id: PacketId) -> Option<SicSignal> {
        self.find(id).map(|i| self.slot(i).signal)
    }

    /// Drop every tracked signal
    pub fn clear(&mut self) {
        self.slots = [None; N];
        self.len = 0;
        self.time_head = None;
        self.time_tail = None;
        self.power_head = None;
        self.power_tail = None;
    }

    /// Insert a signal into both orders
    ///
    /// On failure the tracker is left untouched.
    pub fn insert(&mut self, signal: SicSignal) -> Result<(), CoreError> {
        if self.contains(signal.id) {
            return Err(CoreError::DuplicateSignal);
        }

        let idx = match self.slots.iter().position(|s| s.is_none()) {
            Some(i) => i,
            None => {
                debug!("Tracker full, dropping signal {}", signal.id);
                return Err(CoreError::TrackerFull)
            },
        };

        self.slots[idx] = Some(Slot {
            signal,
            power_mw: dbm_to_mw(signal.power_dbm),
            prev_time: None,
            next_time: None,
            higher_power: None,
            lower_power: None,
        });
        self.len += 1;

        self.link_time(idx);
        self.link_power(idx);

        trace!("Tracking signal {} ({} dBm, expires {})", signal.id, signal.power_dbm, signal.expiry);

        Ok(())
    }

    /// Remove every signal that has expired at `now` (expiry <= now)
    ///
    /// Returns the number of signals removed.
    pub fn prune(&mut self, now: Ts) -> usize {
        let mut removed = 0;

        while let Some(head) = self.time_head {
            if self.slot(head).signal.expiry > now {
                break;
            }

            trace!("Pruning signal {} at {}", self.slot(head).signal.id, now);

            self.unlink(head);
            removed += 1;
        }

        removed
    }

    /// Remove a single signal by id
    pub fn remove(&mut self, id: PacketId) -> Result<SicSignal, CoreError> {
        let idx = self.find(id).ok_or(CoreError::NoSuchSignal)?;
        Ok(self.unlink(idx))
    }

    /// Sum of tracked linear power plus `base_noise_mw`
    pub fn aggregate_power_mw(&self, base_noise_mw: f64) -> f64 {
        self.iter_slots_by_power()
            .fold(base_noise_mw, |acc, s| acc + s.power_mw)
    }

    /// Sum of linear power of signals still on air after `now` plus
    /// `base_noise_mw`, without pruning
    pub fn aggregate_power_at_mw(&self, now: Ts, base_noise_mw: f64) -> f64 {
        self.iter_slots_by_power()
            .filter(|s| s.signal.expiry > now )
            .fold(base_noise_mw, |acc, s| acc + s.power_mw)
    }

    /// Successive cancellation decodability test
    ///
    /// Signals are decoded strongest first. Each is compared against the
    /// noise plus everything not yet cancelled, excluding itself. The first
    /// failure halts the scan, so nothing weaker can be decoded.
    pub fn is_decodable(&self, id: PacketId, base_noise_mw: f64, sinr_threshold: f64) -> bool {
        let mut remaining = self.aggregate_power_mw(base_noise_mw);

        for s in self.iter_slots_by_power() {
            remaining -= s.power_mw;

            if s.power_mw < remaining * sinr_threshold {
                trace!("SIC halted at signal {} ({} mW < {} mW)", s.signal.id, s.power_mw, remaining * sinr_threshold);
                return false;
            }

            if s.signal.id == id {
                return true;
            }
        }

        false
    }

    /// Iterate signals in ascending expiry order
    pub fn iter_by_time(&self) -> Iter<'_, N> {
        Iter{ tracker: self, next: self.time_head, order: Order::TimeForward }
    }

    /// Iterate signals in descending expiry order
    pub fn iter_by_time_rev(&self) -> Iter<'_, N> {
        Iter{ tracker: self, next: self.time_tail, order: Order::TimeBackward }
    }

    /// Iterate signals from strongest to weakest
    pub fn iter_by_power(&self) -> Iter<'_, N> {
        Iter{ tracker: self, next: self.power_head, order: Order::PowerForward }
    }

    /// Iterate signals from weakest to strongest
    pub fn iter_by_power_rev(&self) -> Iter<'_, N> {
        Iter{ tracker: self, next: self.power_tail, order: Order::PowerBackward }
    }

    fn iter_slots_by_power(&self) -> impl Iterator<Item=&Slot> + '_ {
        let mut next = self.power_head;
        core::iter::from_fn(move || {
            let s = self.slots[next?].as_ref()?;
            next = s.lower_power;
            Some(s)
        })
    }

    fn find(&self, id: PacketId) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, Some(s) if s.signal.id == id))
    }

    // Only called with indices taken from live links
    fn slot(&self, idx: usize) -> &Slot {
        match &self.slots[idx] {
            Some(s) => s,
            None => unreachable!("dangling tracker link {}", idx),
        }
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        match &mut self.slots[idx] {
            Some(s) => s,
            None => unreachable!("dangling tracker link {}", idx),
        }
    }

    /// Splice `idx` before the first entry expiring later, or at the tail
    fn link_time(&mut self, idx: usize) {
        let expiry = self.slot(idx).signal.expiry;

        let mut cursor = self.time_head;
        while let Some(c) = cursor {
            if self.slot(c).signal.expiry > expiry {
                break;
            }
            cursor = self.slot(c).next_time;
        }

        match cursor {
            Some(next) => {
                let prev = self.slot(next).prev_time;

                self.slot_mut(idx).prev_time = prev;
                self.slot_mut(idx).next_time = Some(next);
                self.slot_mut(next).prev_time = Some(idx);

                match prev {
                    Some(p) => self.slot_mut(p).next_time = Some(idx),
                    None => self.time_head = Some(idx),
                }
            },
            None => {
                let prev = self.time_tail;

                self.slot_mut(idx).prev_time = prev;
                self.slot_mut(idx).next_time = None;

                match prev {
                    Some(p) => self.slot_mut(p).next_time = Some(idx),
                    None => self.time_head = Some(idx),
                }
                self.time_tail = Some(idx);
            },
        }
    }

    /// Splice `idx` before the first entry of lower or equal power, or at the tail
    fn link_power(&mut self, idx: usize) {
        let power = self.slot(idx).power_mw;

        let mut cursor = self.power_head;
        while let Some(c) = cursor {
            if self.slot(c).power_mw <= power {
                break;
            }
            cursor = self.slot(c).lower_power;
        }

        match cursor {
            Some(lower) => {
                let higher = self.slot(lower).higher_power;

                self.slot_mut(idx).higher_power = higher;
                self.slot_mut(idx).lower_power = Some(lower);
                self.slot_mut(lower).higher_power = Some(idx);

                match higher {
                    Some(h) => self.slot_mut(h).lower_power = Some(idx),
                    None => self.power_head = Some(idx),
                }
            },
            None => {
                let higher = self.power_tail;

                self.slot_mut(idx).higher_power = higher;
                self.slot_mut(idx).lower_power = None;

                match higher {
                    Some(h) => self.slot_mut(h).lower_power = Some(idx),
                    None => self.power_head = Some(idx),
                }
                self.power_tail = Some(idx);
            },
        }
    }

    /// Detach `idx` from both orders and free its slot
    fn unlink(&mut self, idx: usize) -> SicSignal {
        let s = *self.slot(idx);

        match s.prev_time {
            Some(p) => self.slot_mut(p).next_time = s.next_time,
            None => self.time_head = s.next_time,
        }
        match s.next_time {
            Some(n) => self.slot_mut(n).prev_time = s.prev_time,
            None => self.time_tail = s.prev_time,
        }

        match s.higher_power {
            Some(h) => self.slot_mut(h).lower_power = s.lower_power,
            None => self.power_head = s.lower_power,
        }
        match s.lower_power {
            Some(l) => self.slot_mut(l).higher_power = s.higher_power,
            None => self.power_tail = s.higher_power,
        }

        self.slots[idx] = None;
        self.len -= 1;

        s.signal
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Order {
    TimeForward,
    TimeBackward,
    PowerForward,
    PowerBackward,
}

/// Iterator over tracked signals in one of the maintained orders
pub struct Iter<'a, const N: usize> {
    tracker: &'a SignalTracker<N>,
    next: Option<usize>,
    order: Order,
}

impl <'a, const N: usize> Iterator for Iter<'a, N> {
    type Item = SicSignal;

    fn next(&mut self) -> Option<Self::Item> {
        let s = self.tracker.slots[self.next?].as_ref()?;

        self.next = match self.order {
            Order::TimeForward => s.next_time,
            Order::TimeBackward => s.prev_time,
            Order::PowerForward => s.lower_power,
            Order::PowerBackward => s.higher_power,
        };

        Some(s.signal)
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use rand_core::{RngCore, SeedableRng};
    use rand_wyrand::WyRand;

    use super::*;

    fn sig(id: PacketId, power_dbm: f64, expiry: Ts) -> SicSignal {
        SicSignal{ id, power_dbm, expiry }
    }

    fn ids<I: Iterator<Item=SicSignal>>(i: I) -> Vec<PacketId> {
        i.map(|s| s.id ).collect()
    }

    /// Check both orders are sorted and walk back to their origin
    fn check_invariants<const N: usize>(t: &SignalTracker<N>) {
        let by_time: Vec<_> = t.iter_by_time().collect();
        let by_power: Vec<_> = t.iter_by_power().collect();

        assert_eq!(by_time.len(), t.len());
        assert_eq!(by_power.len(), t.len());

        for w in by_time.windows(2) {
            assert!(w[0].expiry <= w[1].expiry, "time order broken: {:?}", by_time);
        }
        for w in by_power.windows(2) {
            assert!(w[0].power_dbm >= w[1].power_dbm, "power order broken: {:?}", by_power);
        }

        let mut time_rev: Vec<_> = t.iter_by_time_rev().map(|s| s.id ).collect();
        time_rev.reverse();
        assert_eq!(time_rev, ids(by_time.iter().cloned()));

        let mut power_rev: Vec<_> = t.iter_by_power_rev().map(|s| s.id ).collect();
        power_rev.reverse();
        assert_eq!(power_rev, ids(by_power.iter().cloned()));

        // Same membership in both views
        let mut a = ids(by_time.into_iter());
        let mut b = ids(by_power.into_iter());
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn sole_signal_is_decodable() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -60.0, 100)).unwrap();

        assert!(t.is_decodable(1, 1e-9, 1.0));
    }

    #[test]
    fn prune_removes_expired_prefix() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -50.0, 200)).unwrap();
        t.insert(sig(2, -70.0, 150)).unwrap();

        assert_eq!(t.prune(160), 1);

        assert_eq!(ids(t.iter_by_time()), vec![1]);
        assert_eq!(ids(t.iter_by_power()), vec![1]);

        let noise = 1e-9;
        let expected = dbm_to_mw(-50.0) + noise;
        assert!((t.aggregate_power_mw(noise) - expected).abs() < 1e-15);

        check_invariants(&t);
    }

    #[test]
    fn prune_boundary_is_inclusive() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -50.0, 100)).unwrap();
        t.insert(sig(2, -60.0, 101)).unwrap();

        assert_eq!(t.prune(99), 0);
        assert_eq!(t.prune(100), 1);
        assert_eq!(ids(t.iter_by_time()), vec![2]);
    }

    #[test]
    fn aggregate_at_skips_ended_signals() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -50.0, 200)).unwrap();
        t.insert(sig(2, -70.0, 150)).unwrap();

        let noise = 1e-9;
        let expected = dbm_to_mw(-50.0) + noise;
        assert!((t.aggregate_power_at_mw(150, noise) - expected).abs() < 1e-15);

        // Nothing is removed
        assert_eq!(t.len(), 2);
        assert!((t.aggregate_power_at_mw(149, noise) - t.aggregate_power_mw(noise)).abs() < 1e-15);
    }

    #[test]
    fn empty_tracker() {
        let t = SignalTracker::<4>::new();

        assert_eq!(t.aggregate_power_mw(2.5e-9), 2.5e-9);
        assert!(!t.is_decodable(1, 1e-9, 1.0));
        assert!(t.is_empty());
    }

    #[test]
    fn insert_orders() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -60.0, 300)).unwrap();
        t.insert(sig(2, -40.0, 100)).unwrap();
        t.insert(sig(3, -80.0, 200)).unwrap();
        t.insert(sig(4, -50.0, 400)).unwrap();

        assert_eq!(ids(t.iter_by_time()), vec![2, 3, 1, 4]);
        assert_eq!(ids(t.iter_by_power()), vec![2, 4, 1, 3]);

        check_invariants(&t);
    }

    #[test]
    fn insert_ties() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -60.0, 100)).unwrap();
        t.insert(sig(2, -60.0, 100)).unwrap();

        // Equal expiry goes after, equal power goes before
        assert_eq!(ids(t.iter_by_time()), vec![1, 2]);
        assert_eq!(ids(t.iter_by_power()), vec![2, 1]);

        check_invariants(&t);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -60.0, 100)).unwrap();
        assert_eq!(t.insert(sig(1, -50.0, 200)), Err(CoreError::DuplicateSignal));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(1), Some(sig(1, -60.0, 100)));
    }

    #[test]
    fn full_tracker_keeps_invariants() {
        let mut t = SignalTracker::<3>::new();

        t.insert(sig(1, -60.0, 300)).unwrap();
        t.insert(sig(2, -40.0, 100)).unwrap();
        t.insert(sig(3, -80.0, 200)).unwrap();

        assert_eq!(t.insert(sig(4, -50.0, 150)), Err(CoreError::TrackerFull));

        assert_eq!(t.len(), 3);
        assert!(!t.contains(4));
        assert_eq!(ids(t.iter_by_time()), vec![2, 3, 1]);
        assert_eq!(ids(t.iter_by_power()), vec![2, 1, 3]);
        check_invariants(&t);

        // Space is reusable after a prune
        t.prune(100);
        t.insert(sig(4, -50.0, 150)).unwrap();
        assert_eq!(ids(t.iter_by_time()), vec![4, 3, 1]);
        assert_eq!(ids(t.iter_by_power()), vec![4, 1, 3]);
        check_invariants(&t);
    }

    #[test]
    fn remove_from_middle() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        t.insert(sig(1, -60.0, 300)).unwrap();
        t.insert(sig(2, -40.0, 100)).unwrap();
        t.insert(sig(3, -80.0, 200)).unwrap();

        assert_eq!(t.remove(1).map(|s| s.id ), Ok(1));
        assert_eq!(t.remove(1), Err(CoreError::NoSuchSignal));

        assert_eq!(ids(t.iter_by_time()), vec![2, 3]);
        assert_eq!(ids(t.iter_by_power()), vec![2, 3]);
        check_invariants(&t);

        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.iter_by_time().count(), 0);
        assert_eq!(t.iter_by_power_rev().count(), 0);
    }

    #[test]
    fn random_insert_prune_keeps_invariants() {
        let mut rng = WyRand::seed_from_u64(7);
        let mut t = SignalTracker::<8>::new();
        let mut next_id = 1;
        let mut now = 0;

        for _ in 0..500 {
            if rng.next_u32() % 3 == 0 {
                now += (rng.next_u32() % 50) as Ts;

                let before: Vec<_> = t.iter_by_time().collect();
                t.prune(now);

                // Nothing expired remains, survivors keep their relative order
                assert!(t.iter_by_time().all(|s| s.expiry > now ));
                let survivors: Vec<_> = before.iter().filter(|s| s.expiry > now ).map(|s| s.id ).collect();
                assert_eq!(ids(t.iter_by_time()), survivors);
            } else {
                let s = sig(
                    next_id,
                    -100.0 + (rng.next_u32() % 60) as f64,
                    now + 1 + (rng.next_u32() % 200) as Ts,
                );
                next_id += 1;

                let full = t.len() == t.capacity();
                match t.insert(s) {
                    Ok(()) => assert!(!full),
                    Err(e) => {
                        assert!(full);
                        assert_eq!(e, CoreError::TrackerFull);
                    }
                }
            }

            check_invariants(&t);
        }
    }

    #[test]
    fn successive_cancellation() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        // 10 mW, 1 mW and noise 0.5 mW
        t.insert(sig(1, 10.0, 100)).unwrap();
        t.insert(sig(2, 0.0, 100)).unwrap();

        // Strong: 10 >= (1 + 0.5) * 2, weak after cancellation: 1 >= 0.5 * 2
        assert!(t.is_decodable(1, 0.5, 2.0));
        assert!(t.is_decodable(2, 0.5, 2.0));

        // Weak fails 1 < 0.5 * 3
        assert!(t.is_decodable(1, 0.5, 3.0));
        assert!(!t.is_decodable(2, 0.5, 3.0));

        // Strong fails 10 < 1.5 * 7, halting the scan before the weak signal
        assert!(!t.is_decodable(1, 0.5, 7.0));
        assert!(!t.is_decodable(2, 0.5, 7.0));

        // Unknown ids are never decodable
        assert!(!t.is_decodable(3, 0.5, 1.0));
    }

    #[test]
    fn decodable_boundary_is_inclusive() {
        let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();

        // 0 dBm is exactly 1 mW, remaining interference is exactly 0.5 mW
        t.insert(sig(1, 0.0, 100)).unwrap();

        assert!(t.is_decodable(1, 0.5, 2.0));
        assert!(!t.is_decodable(1, 0.5000001, 2.0));
    }

    #[test]
    fn stronger_signal_never_loses_decodability() {
        let noise = 1e-9;

        // Target alone
        let mut last = false;
        for p in -100..-40 {
            let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();
            t.insert(sig(1, p as f64, 100)).unwrap();

            let d = t.is_decodable(1, noise, 10.0);
            assert!(d || !last, "regressed at {} dBm", p);
            last = d;
        }
        assert!(last);

        // Target as the strongest of several signals
        let mut last = false;
        for p in -59..0 {
            let mut t = SignalTracker::<DEFAULT_CAPACITY>::new();
            t.insert(sig(2, -60.0, 100)).unwrap();
            t.insert(sig(3, -65.0, 120)).unwrap();
            t.insert(sig(1, p as f64, 100)).unwrap();

            let d = t.is_decodable(1, noise, 10.0);
            assert!(d || !last, "regressed at {} dBm", p);
            last = d;
        }
        assert!(last);
    }
}
