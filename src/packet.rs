//! Packet substrate shared between layers
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;

use crate::Ts;

/// Unique identifier of an in-flight transmission
pub type PacketId = u64;

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Application assigned priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::FromRepr)]
#[repr(u32)]
pub enum Priority {
    Low = 0,
    High = 1,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

/// Packet object, an opaque frame buffer plus the physical metadata the
/// radio and medium attach to it.
///
/// Cloning keeps the packet id (the same transmission seen by several
/// receivers), use [`Packet::duplicate`] for a new transmission of the
/// same content.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub id: PacketId,

    data: BytesMut,

    /// Time on air in ns
    pub duration: Ts,

    /// Power at the transmitter in dBm
    pub tx_dbm: f64,
    /// Power at the receiver in dBm
    pub rx_dbm: f64,

    pub channel: u32,
    pub modulation: u32,
    /// Per-bit time of the transmitting radio
    pub bit_time: Ts,

    /// Packet error probability applied on reception
    pub per: f64,

    pub priority: Priority,
}

impl Packet {
    /// Create a zeroed packet of `size` bytes with a fresh id
    pub fn new(size: usize) -> Self {
        Self {
            id: Self::next_id(),
            data: BytesMut::zeroed(size),
            duration: 0,
            tx_dbm: 0.0,
            rx_dbm: 0.0,
            channel: 0,
            modulation: 0,
            bit_time: 0,
            per: 0.0,
            priority: Priority::Low,
        }
    }

    /// Create a packet with `overhead` zeroed header bytes followed by `payload`
    pub fn with_payload(overhead: usize, payload: &[u8], priority: Priority) -> Self {
        let mut p = Self::new(overhead + payload.len());
        p.data[overhead..].copy_from_slice(payload);
        p.priority = priority;
        p
    }

    /// Allocate a fresh packet id
    pub fn next_id() -> PacketId {
        NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Copy of this packet with a new id
    pub fn duplicate(&self) -> Self {
        let mut p = self.clone();
        p.id = Self::next_id();
        p
    }

    /// Frame size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes following the first `offset` header bytes
    pub fn payload(&self, offset: usize) -> &[u8] {
        if offset >= self.data.len() {
            return &[];
        }
        &self.data[offset..]
    }
}
