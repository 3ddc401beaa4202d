//! Simulation events and their ordering
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use std::cmp::Ordering;

use crate::{Ts, NodeId};
use crate::packet::{Packet, PacketId, Priority};

/// Simulation events
#[derive(Debug, Clone)]
pub enum Event {
    /// Self-scheduled MAC wake-up
    Wake { node: NodeId, at: Ts },
    /// A node handed a frame to the medium
    Transmit { from: NodeId, packet: Packet },
    /// Start of a transmission arriving at a node
    CarrierSense { node: NodeId, packet: Packet },
    /// End of a transmission arriving at a node
    Receive { node: NodeId, packet: Packet },
    /// End of a node's own transmission
    TransmitEnd { node: NodeId, id: PacketId },
    /// Application send request
    Send { from: NodeId, to: NodeId, size: usize, priority: Priority },
}

/// An event with its time and insertion sequence
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Ts,
    pub seq: u64,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Ts, seq: u64, event: Event) -> Self {
        Self { time, seq, event }
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed for use in a max-heap, earliest (time, seq) first
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq) )
    }
}
