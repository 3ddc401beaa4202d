//! Half duplex radio with successive interference cancellation
//!
//! [`SicRadio`] sits between the MAC and the medium. The medium announces
//! every arriving transmission twice, once when it starts (carrier sense)
//! and once when it ends (reception). Carrier sense feeds the signal
//! tracker, reception asks the tracker whether the frame survived the
//! interference it overlapped with.
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use log::{trace, debug, warn};
use rand_core::RngCore;

use crate::{Ts, Radio, dbm_to_mw, random_unit};
use crate::packet::{Packet, PacketId};
use crate::tracker::{SignalTracker, SicSignal, DEFAULT_CAPACITY};

/// Default SINR threshold for successive cancellation (linear)
pub const DEFAULT_SIC_THRESHOLD: f64 = 1.0;

/// Lower layer below the radio, normally the simulated medium
pub trait Link {
    type Error: Debug;

    /// Put a stamped frame on the medium
    fn transmit(&mut self, now: Ts, packet: Packet) -> Result<(), Self::Error>;

    /// Ambient noise on the provided channel in mW
    fn noise_mw(&self, channel: u32) -> f64;
}

/// Radio configuration
#[derive(Clone, PartialEq, Debug)]
pub struct RadioConfig {
    /// Transmit power in dBm
    pub power_dbm: f64,
    /// Minimum received power for carrier sense in dBm
    pub sensitivity_dbm: f64,
    pub channel: u32,
    pub modulation: u32,
    /// Symbol time in ns
    pub symbol_time: Ts,
    pub bits_per_symbol: u32,
    /// Linear SINR required to decode a signal
    pub sinr_threshold: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            power_dbm: 0.0,
            sensitivity_dbm: -92.0,
            channel: 0,
            modulation: 0,
            symbol_time: 91,
            bits_per_symbol: 1,
            sinr_threshold: DEFAULT_SIC_THRESHOLD,
        }
    }
}

impl RadioConfig {
    /// Per-bit time in ns
    pub fn bit_time(&self) -> Ts {
        self.symbol_time / self.bits_per_symbol.max(1) as Ts
    }
}

/// Radio statistics
#[derive(Clone, PartialEq, Debug, Default)]
pub struct RadioStats {
    pub transmitted: u32,
    pub tracked: u32,
    pub decoded: u32,
    pub not_decodable: u32,
    pub per_dropped: u32,
    pub busy_dropped: u32,
    pub tracker_full: u32,
}

/// SIC capable radio over a link `L` with random source `G`, tracking up to
/// `N` concurrent signals
pub struct SicRadio<L, G, const N: usize = DEFAULT_CAPACITY> {
    config: RadioConfig,
    link: L,
    rng: G,

    tracker: SignalTracker<N>,

    /// In-flight transmission, the radio is deaf while this is set
    tx_busy: Option<PacketId>,
    sleeping: bool,

    stats: RadioStats,
}

impl <L, G, const N: usize> SicRadio<L, G, N>
where
    L: Link,
    G: RngCore,
{
    pub fn new(config: RadioConfig, link: L, rng: G) -> Self {
        Self {
            config,
            link,
            rng,
            tracker: SignalTracker::new(),
            tx_busy: None,
            sleeping: false,
            stats: RadioStats::default(),
        }
    }

    /// Start of an arriving transmission
    pub fn carrier_sense(&mut self, now: Ts, packet: &Packet) {
        if self.sleeping || self.tx_busy.is_some() {
            return;
        }

        if packet.rx_dbm < self.config.sensitivity_dbm {
            trace!("Packet {} below sensitivity ({} dBm)", packet.id, packet.rx_dbm);
            return;
        }

        if packet.channel != self.config.channel
                || packet.modulation != self.config.modulation
                || packet.bit_time * self.config.bits_per_symbol as Ts != self.config.symbol_time {
            trace!("Packet {} physical mismatch", packet.id);
            return;
        }

        // Signals ending now stay until their reception is handled
        self.tracker.prune(now.saturating_sub(1));

        // Capture: a signal weaker than what is already arriving is never picked up
        let rx_mw = dbm_to_mw(packet.rx_dbm);
        if rx_mw <= self.tracker.aggregate_power_at_mw(now, 0.0) {
            trace!("Packet {} not captured ({} dBm)", packet.id, packet.rx_dbm);
            return;
        }

        let signal = SicSignal{
            id: packet.id,
            power_dbm: packet.rx_dbm,
            expiry: now + packet.duration,
        };

        match self.tracker.insert(signal) {
            Ok(()) => self.stats.tracked += 1,
            Err(e) => {
                warn!("Unable to track packet {}: {}", packet.id, e);
                self.stats.tracker_full += 1;
            }
        }
    }

    /// End of an arriving transmission, returns the packet if it was decoded
    pub fn receive(&mut self, now: Ts, packet: Packet) -> Option<Packet> {
        if self.sleeping || self.tx_busy.is_some() {
            self.stats.busy_dropped += 1;
            return None;
        }

        // Keep signals ending at this instant, the packet itself among them
        self.tracker.prune(now.saturating_sub(1));

        if !self.tracker.contains(packet.id) {
            return None;
        }

        let noise = self.link.noise_mw(self.config.channel);
        let decodable = self.tracker.is_decodable(packet.id, noise, self.config.sinr_threshold);

        // Signal is consumed either way
        let _ = self.tracker.remove(packet.id);

        if !decodable {
            debug!("Packet {} not decodable at {}", packet.id, now);
            self.stats.not_decodable += 1;
            return None;
        }

        if packet.per > 0.0 && random_unit(&mut self.rng) < packet.per {
            debug!("Packet {} dropped by PER {}", packet.id, packet.per);
            self.stats.per_dropped += 1;
            return None;
        }

        self.stats.decoded += 1;

        Some(packet)
    }

    /// Transmission of the provided packet has completed
    pub fn transmit_end(&mut self, id: PacketId) {
        if self.tx_busy == Some(id) {
            trace!("Transmit {} complete", id);
            self.tx_busy = None;
        }
    }

    pub fn is_transmitting(&self) -> bool {
        self.tx_busy.is_some()
    }

    pub fn channel(&self) -> u32 {
        self.config.channel
    }

    pub fn set_channel(&mut self, channel: u32) {
        self.config.channel = channel;
        self.reset_receptions();
    }

    pub fn modulation(&self) -> u32 {
        self.config.modulation
    }

    pub fn set_modulation(&mut self, modulation: u32) {
        self.config.modulation = modulation;
        self.reset_receptions();
    }

    pub fn symbol_time(&self) -> Ts {
        self.config.symbol_time
    }

    pub fn set_symbol_time(&mut self, symbol_time: Ts) {
        self.config.symbol_time = symbol_time;
        self.reset_receptions();
    }

    pub fn sensitivity(&self) -> f64 {
        self.config.sensitivity_dbm
    }

    pub fn set_sensitivity(&mut self, dbm: f64) {
        self.config.sensitivity_dbm = dbm;
        self.reset_receptions();
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn stats(&self) -> &RadioStats {
        &self.stats
    }

    pub fn tracker(&self) -> &SignalTracker<N> {
        &self.tracker
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn reset_receptions(&mut self) {
        self.tracker.clear();
    }
}

impl <L, G, const N: usize> Radio for SicRadio<L, G, N>
where
    L: Link,
    G: RngCore,
{
    type Error = L::Error;

    fn power(&self) -> f64 {
        self.config.power_dbm
    }

    fn set_power(&mut self, dbm: f64) {
        self.config.power_dbm = dbm;
    }

    fn carrier_sense_mw(&mut self, now: Ts) -> f64 {
        // Read only, a signal ending at `now` may still be awaiting reception
        self.tracker.aggregate_power_at_mw(now, self.link.noise_mw(self.config.channel))
    }

    fn noise_mw(&self) -> f64 {
        self.link.noise_mw(self.config.channel)
    }

    fn bit_time(&self) -> Ts {
        self.config.bit_time()
    }

    fn transmit(&mut self, now: Ts, mut packet: Packet) -> Result<(), Self::Error> {
        if self.sleeping {
            debug!("Radio asleep, dropping packet {}", packet.id);
            return Ok(());
        }

        // Half duplex, anything arriving is lost
        self.reset_receptions();

        let bit_time = self.config.bit_time();

        packet.tx_dbm = self.config.power_dbm;
        packet.channel = self.config.channel;
        packet.modulation = self.config.modulation;
        packet.bit_time = bit_time;
        packet.duration = packet.size() as Ts * 8 * bit_time;

        trace!("Radio transmit {} ({} bytes, {} dBm, {} ns)", packet.id, packet.size(), packet.tx_dbm, packet.duration);

        self.tx_busy = Some(packet.id);
        self.stats.transmitted += 1;

        self.link.transmit(now, packet)
    }

    fn sleep(&mut self) {
        self.sleeping = true;
        self.reset_receptions();
    }

    fn wake(&mut self) {
        self.sleeping = false;
        self.reset_receptions();
    }

    fn is_sleeping(&self) -> bool {
        self.sleeping
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use crate::{Ts, Radio, packet::Packet};

    #[derive(Debug)]
    struct Inner {
        power: f64,
        carrier_sense_mw: f64,
        noise_mw: f64,
        bit_time: Ts,
        sleeping: bool,
        transmitted: Vec<(Ts, Packet, f64)>,
    }

    /// Mock radio with scripted channel readings
    ///
    /// Clones share state, keep one to script readings and inspect the
    /// frames the MAC transmitted (with the power used for each).
    #[derive(Clone, Debug)]
    pub struct MockRadio (Arc<Mutex<Inner>>);

    impl MockRadio {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner{
                power: 0.0,
                carrier_sense_mw: 0.0,
                noise_mw: 0.0,
                bit_time: 100,
                sleeping: false,
                transmitted: Vec::new(),
            })))
        }

        pub fn set_carrier_sense_mw(&mut self, mw: f64) {
            self.0.lock().unwrap().carrier_sense_mw = mw;
        }

        pub fn set_noise_mw(&mut self, mw: f64) {
            self.0.lock().unwrap().noise_mw = mw;
        }

        pub fn set_bit_time(&mut self, bit_time: Ts) {
            self.0.lock().unwrap().bit_time = bit_time;
        }

        /// Frames transmitted so far as (time, packet, power dBm)
        pub fn transmitted(&self) -> Vec<(Ts, Packet, f64)> {
            self.0.lock().unwrap().transmitted.clone()
        }

        pub fn last_transmitted(&self) -> Option<(Ts, Packet, f64)> {
            self.0.lock().unwrap().transmitted.last().cloned()
        }

        pub fn clear(&mut self) {
            self.0.lock().unwrap().transmitted.clear();
        }
    }

    impl Radio for MockRadio {
        type Error = ();

        fn power(&self) -> f64 {
            self.0.lock().unwrap().power
        }

        fn set_power(&mut self, dbm: f64) {
            self.0.lock().unwrap().power = dbm;
        }

        fn carrier_sense_mw(&mut self, _now: Ts) -> f64 {
            self.0.lock().unwrap().carrier_sense_mw
        }

        fn noise_mw(&self) -> f64 {
            self.0.lock().unwrap().noise_mw
        }

        fn bit_time(&self) -> Ts {
            self.0.lock().unwrap().bit_time
        }

        fn transmit(&mut self, now: Ts, packet: Packet) -> Result<(), Self::Error> {
            let mut i = self.0.lock().unwrap();
            let power = i.power;
            i.transmitted.push((now, packet, power));
            Ok(())
        }

        fn sleep(&mut self) {
            self.0.lock().unwrap().sleeping = true;
        }

        fn wake(&mut self) {
            self.0.lock().unwrap().sleeping = false;
        }

        fn is_sleeping(&self) -> bool {
            self.0.lock().unwrap().sleeping
        }
    }
}
