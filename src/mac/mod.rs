//! Medium Access Control (MAC) layer module.
//! Contains the MAC trait and the priority CSMA/CA implementation.

use ::core::fmt::Debug;

use crate::{Ts, NodeId, packet::Packet};

pub mod config;
pub use config::{MacConfig, ContentionConfig, SensingMode, SenseFlags};

pub mod frame;

pub mod classifier;
pub use classifier::{Classifier, ChannelState};

pub mod core;
pub use self::core::{Core, MacState, MacStats, Expect};

mod csma;

mod contention;

/// Generic MAC trait, the contract exposed to upper layers
pub trait Mac {
    type Error: Debug;

    /// Queue a packet (with space for its header) for transmission
    fn transmit(&mut self, packet: Packet) -> Result<(), Self::Error>;

    /// Handle a packet passed up by the radio
    fn receive(&mut self, packet: Packet) -> Result<(), Self::Error>;

    /// Write the MAC header for a packet addressed to `dst`
    fn build_header(&self, packet: &mut Packet, dst: NodeId) -> Result<(), Self::Error>;

    /// Header overhead in bytes, including lower layers
    fn header_size(&self) -> usize;

    /// Handle a scheduled wake-up for time `at`
    fn tick(&mut self, at: Ts) -> Result<(), Self::Error>;

    /// Fetch the next packet delivered to this node
    fn take_received(&mut self) -> Option<Packet>;
}
