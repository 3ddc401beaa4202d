//! Error and diagnostic types
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use core::fmt;

use crate::packet::Packet;

/// Basic MAC / radio errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Signal tracker arena full, the insertion was aborted
    TrackerFull,

    /// Transmit queue full, returns the rejected packet
    QueueFull(Packet),

    /// Signal not present in the tracker
    NoSuchSignal,

    /// Signal with this id already tracked
    DuplicateSignal,

    /// Decoding error
    Decode(DecodeError),

    /// Radio rejected a transmission
    Radio,
}

impl From<DecodeError> for CoreError {
    fn from(e: DecodeError) -> Self {
        CoreError::Decode(e)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::TrackerFull => write!(f, "signal tracker full"),
            CoreError::QueueFull(p) => write!(f, "transmit queue full (packet {})", p.id),
            CoreError::NoSuchSignal => write!(f, "no such signal"),
            CoreError::DuplicateSignal => write!(f, "signal already tracked"),
            CoreError::Decode(e) => write!(f, "decode error: {}", e),
            CoreError::Radio => write!(f, "radio error"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Wire header decoding errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeError {
    NotEnoughBytes,
    UnknownFrameType(u32),
    InvalidPriority(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotEnoughBytes => write!(f, "not enough bytes"),
            DecodeError::UnknownFrameType(t) => write!(f, "unknown frame type {}", t),
            DecodeError::InvalidPriority(p) => write!(f, "invalid priority {}", p),
        }
    }
}

/// Internal diagnostic codes, recorded on a node but never surfaced
/// as errors to other layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Diagnostic {
    None,
    /// Callback fired for a clock the node no longer holds
    StaleEvent,
    /// Frame arrived in a state that does not expect it
    UnexpectedFrame,
    /// Frame arrived from a peer other than the current exchange peer
    WrongPeer,
    /// Frame addressed to another node
    NotForUs,
    /// Same-instant transition chain exceeded its bound
    ChainLimit,
}

impl Default for Diagnostic {
    fn default() -> Self {
        Diagnostic::None
    }
}
