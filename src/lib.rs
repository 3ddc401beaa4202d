//! SIC-MAC: a priority-aware CSMA/CA MAC and successive interference
//! cancellation (SIC) radio model for discrete-event wireless simulation.
//!
//! The crate is split the same way as the protocol stack it models:
//!
//! - [`tracker`] keeps the set of concurrently arriving signals at a receiver
//!   and answers SINR decodability queries
//! - [`radio`] wraps the tracker in a half-duplex radio that filters
//!   arriving packets before passing them up
//! - [`mac`] is the RTS/CTS/DATA/ACK state machine with priority-aware
//!   backoff, transmit power boosting and optional sink-mediated contention
//! - [`sim`] is a minimal host substrate (event queue, medium) used to run
//!   nodes end to end
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use rand_core::RngCore;

pub mod timer;

pub mod packet;

pub mod error;

pub mod tracker;

pub mod radio;

pub mod mac;

pub mod sim;

pub mod prelude;

use crate::packet::Packet;

/// Timestamps are 64-bit simulation time in nanoseconds
pub type Ts = u64;

/// Node identifier within a simulation
pub type NodeId = u32;

/// Broadcast destination address
pub const BROADCAST_ADDR: NodeId = NodeId::MAX;

/// Convert a power in dBm to linear milliwatts
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert a linear power in milliwatts to dBm
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Draw a uniform value in `[0, 1)` from the provided RNG
pub(crate) fn random_unit<G: RngCore>(rng: &mut G) -> f64 {
    (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// Radio interface consumed by the MAC
///
/// This is the cross-layer surface of the radio below a MAC instance, the
/// MAC never sees the signal tracker directly.
pub trait Radio {
    type Error: Debug;

    /// Fetch the current transmit power in dBm
    fn power(&self) -> f64;

    /// Set the transmit power in dBm
    fn set_power(&mut self, dbm: f64);

    /// Aggregate carrier sense reading (tracked signals plus noise) in mW
    fn carrier_sense_mw(&mut self, now: Ts) -> f64;

    /// Ambient noise on the current channel in mW
    fn noise_mw(&self) -> f64;

    /// Per-bit transmission time in ns
    fn bit_time(&self) -> Ts;

    /// Hand a frame to the radio for transmission
    fn transmit(&mut self, now: Ts, packet: Packet) -> Result<(), Self::Error>;

    /// Overhead added by the radio layer in bytes
    fn header_size(&self) -> usize {
        0
    }

    /// Put the radio to sleep
    fn sleep(&mut self);

    /// Wake the radio
    fn wake(&mut self);

    /// Check whether the radio is asleep
    fn is_sleeping(&self) -> bool;
}
