//! MAC configuration

use bitflags::bitflags;

use crate::{Ts, NodeId};

bitflags! {
    /// Channel sensing sources used by the busy classifier
    pub struct SenseFlags: u8 {
        /// Use the radio carrier sense aggregate
        const CARRIER_SENSE = 0b0000_0001;
        /// Fall back to the ambient noise reading
        const CCA           = 0b0000_0010;
    }
}

impl Default for SenseFlags {
    fn default() -> Self {
        SenseFlags::CARRIER_SENSE | SenseFlags::CCA
    }
}

/// Channel access mode selected at node construction
#[derive(Debug, Clone, Copy, PartialEq, strum::Display)]
pub enum SensingMode {
    /// Plain priority-aware CSMA/CA
    CarrierSense,
    /// Sink mediated strict priority arbitration
    ContentionArbitration,
}

impl Default for SensingMode {
    fn default() -> Self {
        SensingMode::CarrierSense
    }
}

/// Configuration for the contention sub-cycle
#[derive(Clone, PartialEq, Debug)]
pub struct ContentionConfig {
    /// Node that polls for contention
    pub sink: NodeId,

    /// Number of response slots for high priority traffic
    pub window_high: u32,

    /// Number of response slots for low priority traffic
    pub window_low: u32,

    /// Length of a response slot in ns
    pub slot: Ts,

    /// Delay between polling rounds that produced no traffic
    pub round_period: Ts,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            sink: 0,
            window_high: 4,
            window_low: 16,
            slot: 20_000,
            round_period: 1_000_000,
        }
    }
}

/// Configuration for the priority CSMA/CA MAC
#[derive(Clone, PartialEq, Debug)]
pub struct MacConfig {
    /// DCF inter-frame space in ns
    pub difs: Ts,
    /// Short inter-frame space in ns
    pub sifs: Ts,
    /// Backoff unit in ns
    pub unit_backoff: Ts,

    /// Minimum backoff exponent
    pub min_be: u32,
    /// Maximum backoff exponent
    pub max_be: u32,
    /// Timeouts allowed before a packet is dropped
    pub max_csma_retries: u32,

    /// Frames of at least this size (bytes) use RTS/CTS
    pub rts_threshold: usize,

    /// Fixed propagation allowance added to reply timeouts, in ns
    pub propagation: Ts,

    /// Energy detect threshold in dBm
    pub ed_threshold_dbm: f64,

    /// Margin between low and high occupancy thresholds
    pub priority_ratio: f64,

    /// Linear transmit power gain applied to boosted high priority frames
    pub high_power_ratio: f64,

    pub sense: SenseFlags,

    pub mode: SensingMode,

    pub contention: ContentionConfig,

    /// Maximum same-instant transitions per event
    pub max_chain: u32,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            difs: 50_000,
            sifs: 10_000,
            unit_backoff: 20_000,
            min_be: 5,
            max_be: 10,
            max_csma_retries: 7,
            rts_threshold: 500,
            propagation: 3_000,
            ed_threshold_dbm: -74.0,
            priority_ratio: 0.2,
            high_power_ratio: 2.0,
            sense: SenseFlags::default(),
            mode: SensingMode::default(),
            contention: ContentionConfig::default(),
            max_chain: 64,
        }
    }
}

impl MacConfig {
    /// Boost gain in dB, one dB per doubling of the linear ratio
    pub fn boost_db(&self) -> f64 {
        self.high_power_ratio.log2()
    }

    /// Contention window in slots for the provided priority class
    pub(crate) fn window(&self, priority: crate::packet::Priority) -> u32 {
        use crate::packet::Priority;

        match priority {
            Priority::High => self.contention.window_high,
            Priority::Low => self.contention.window_low,
        }
    }
}
