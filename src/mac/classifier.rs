//! Three level channel busy classifier
//!
//! The classifier compares a sensed power against an energy detect
//! threshold and a second, higher threshold calibrated from the first
//! observed link budget. Low priority traffic defers on any occupancy, high
//! priority traffic defers only on heavy occupancy.

use log::debug;

use crate::{Radio, Ts, dbm_to_mw};
use crate::packet::Priority;

use super::config::{MacConfig, SenseFlags};

/// Channel occupancy level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum ChannelState {
    Idle,
    Low,
    High,
}

impl ChannelState {
    /// Check whether this occupancy blocks traffic of the provided class
    pub fn blocks(&self, priority: Priority) -> bool {
        match priority {
            Priority::Low => *self >= ChannelState::Low,
            Priority::High => *self >= ChannelState::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    sense: SenseFlags,
    priority_ratio: f64,

    base_mw: f64,
    high_mw: f64,
    calibrated: bool,
}

impl Classifier {
    pub fn new(config: &MacConfig) -> Self {
        let base_mw = dbm_to_mw(config.ed_threshold_dbm);

        Self {
            sense: config.sense,
            priority_ratio: config.priority_ratio,
            base_mw,
            high_mw: base_mw,
            calibrated: false,
        }
    }

    /// Derive the high threshold from the first received frame
    ///
    /// `rx_dbm` and `tx_dbm` are the received and transmitted power of the
    /// frame, `own_tx_dbm` the local transmit power.
    pub fn calibrate(&mut self, rx_dbm: f64, tx_dbm: f64, own_tx_dbm: f64) {
        if self.calibrated {
            return;
        }

        let high = (1.0 + self.priority_ratio) * dbm_to_mw(rx_dbm) * dbm_to_mw(own_tx_dbm) / dbm_to_mw(tx_dbm);

        debug!("High threshold calibrated to {:e} mW (base {:e} mW)", high, self.base_mw);

        self.high_mw = high;
        self.calibrated = true;
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn base_mw(&self) -> f64 {
        self.base_mw
    }

    pub fn high_mw(&self) -> f64 {
        self.high_mw
    }

    /// Classify a sensed power level in mW
    pub fn level(&self, sensed_mw: f64) -> ChannelState {
        if sensed_mw >= self.high_mw {
            ChannelState::High
        } else if sensed_mw >= self.base_mw {
            ChannelState::Low
        } else {
            ChannelState::Idle
        }
    }

    /// Read the configured sensing source and classify it
    pub fn classify<R: Radio>(&self, radio: &mut R, now: Ts) -> ChannelState {
        let sensed = if self.sense.contains(SenseFlags::CARRIER_SENSE) {
            radio.carrier_sense_mw(now)
        } else if self.sense.contains(SenseFlags::CCA) {
            radio.noise_mw()
        } else {
            return ChannelState::Idle;
        };

        self.level(sensed)
    }
}
