//! MAC frame headers
//!
//! Every frame starts with a [`CommonHeader`] followed by a type specific
//! header. All fields are little endian, headers are zero padded to their
//! fixed lengths.
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};

use crate::{Ts, NodeId};
use crate::error::DecodeError;
use crate::packet::Priority;

pub const COMMON_HEADER_LEN: usize = 12;
pub const RTS_HEADER_LEN: usize = 24;
pub const CTS_HEADER_LEN: usize = 24;
pub const DATA_HEADER_LEN: usize = 40;
pub const ACK_HEADER_LEN: usize = 14;

/// Size of a complete RTS frame
pub const RTS_FRAME_LEN: usize = COMMON_HEADER_LEN + RTS_HEADER_LEN;
/// Size of a complete CTS (or contention) frame
pub const CTS_FRAME_LEN: usize = COMMON_HEADER_LEN + CTS_HEADER_LEN;
/// Size of a complete ACK frame
pub const ACK_FRAME_LEN: usize = COMMON_HEADER_LEN + ACK_HEADER_LEN;
/// Overhead added to a payload by a DATA frame
pub const DATA_OVERHEAD: usize = COMMON_HEADER_LEN + DATA_HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u32)]
pub enum FrameType {
    Rts = 1,
    Cts = 2,
    Data = 3,
    Ack = 4,
    Broadcast = 5,
    ContentionBegin = 6,
    Contention = 7,
    ContentionEnd = 8,
}

/// Class carried in CTS style frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u32)]
pub enum PriorityType {
    Disabled = 0,
    High = 1,
    Low = 2,
    Data = 3,
}

impl From<Priority> for PriorityType {
    fn from(p: Priority) -> Self {
        match p {
            Priority::High => PriorityType::High,
            Priority::Low => PriorityType::Low,
        }
    }
}

impl PriorityType {
    /// Priority class polled by a contention frame, if any
    pub fn class(&self) -> Option<Priority> {
        match self {
            PriorityType::High => Some(Priority::High),
            PriorityType::Low => Some(Priority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommonHeader {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: FrameType,
}

impl CommonHeader {
    pub fn encode(&self, buff: &mut [u8]) -> usize {
        LittleEndian::write_u32(&mut buff[0..], self.src);
        LittleEndian::write_u32(&mut buff[4..], self.dst);
        LittleEndian::write_u32(&mut buff[8..], self.kind as u32);

        COMMON_HEADER_LEN
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < COMMON_HEADER_LEN {
            return Err(DecodeError::NotEnoughBytes);
        }

        let src = LittleEndian::read_u32(&buff[0..]);
        let dst = LittleEndian::read_u32(&buff[4..]);
        let t = LittleEndian::read_u32(&buff[8..]);

        let kind = FrameType::from_repr(t)
            .ok_or(DecodeError::UnknownFrameType(t))?;

        Ok((Self{ src, dst, kind }, COMMON_HEADER_LEN))
    }
}

/// Request to send
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtsHeader {
    pub nav: Ts,
    /// Size of the DATA frame to follow
    pub size: u32,
    pub priority: Priority,
}

impl RtsHeader {
    pub fn encode(&self, buff: &mut [u8]) -> usize {
        buff[..RTS_HEADER_LEN].fill(0);

        LittleEndian::write_u64(&mut buff[0..], self.nav);
        LittleEndian::write_u32(&mut buff[8..], self.size);
        LittleEndian::write_u32(&mut buff[12..], self.priority as u32);

        RTS_HEADER_LEN
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < RTS_HEADER_LEN {
            return Err(DecodeError::NotEnoughBytes);
        }

        let nav = LittleEndian::read_u64(&buff[0..]);
        let size = LittleEndian::read_u32(&buff[8..]);
        let p = LittleEndian::read_u32(&buff[12..]);
        let priority = Priority::from_repr(p)
            .ok_or(DecodeError::InvalidPriority(p))?;

        Ok((Self{ nav, size, priority }, RTS_HEADER_LEN))
    }
}

/// Clear to send, also used by the contention frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CtsHeader {
    pub nav: Ts,
    pub priority_type: PriorityType,
    pub node_allowed: NodeId,
}

impl CtsHeader {
    pub fn encode(&self, buff: &mut [u8]) -> usize {
        buff[..CTS_HEADER_LEN].fill(0);

        LittleEndian::write_u64(&mut buff[0..], self.nav);
        LittleEndian::write_u32(&mut buff[8..], self.priority_type as u32);
        LittleEndian::write_u32(&mut buff[12..], self.node_allowed);

        CTS_HEADER_LEN
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < CTS_HEADER_LEN {
            return Err(DecodeError::NotEnoughBytes);
        }

        let nav = LittleEndian::read_u64(&buff[0..]);
        let p = LittleEndian::read_u32(&buff[8..]);
        let priority_type = PriorityType::from_repr(p)
            .ok_or(DecodeError::InvalidPriority(p))?;
        let node_allowed = LittleEndian::read_u32(&buff[12..]);

        Ok((Self{ nav, priority_type, node_allowed }, CTS_HEADER_LEN))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataHeader {
    pub nav: Ts,
    /// Payload size in bytes
    pub size: u32,
}

impl DataHeader {
    pub fn encode(&self, buff: &mut [u8]) -> usize {
        buff[..DATA_HEADER_LEN].fill(0);

        LittleEndian::write_u64(&mut buff[0..], self.nav);
        LittleEndian::write_u32(&mut buff[8..], self.size);

        DATA_HEADER_LEN
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < DATA_HEADER_LEN {
            return Err(DecodeError::NotEnoughBytes);
        }

        let nav = LittleEndian::read_u64(&buff[0..]);
        let size = LittleEndian::read_u32(&buff[8..]);

        Ok((Self{ nav, size }, DATA_HEADER_LEN))
    }

    /// Update the NAV of an encoded DATA frame in place
    pub fn set_nav(buff: &mut [u8], nav: Ts) -> Result<(), DecodeError> {
        if buff.len() < DATA_OVERHEAD {
            return Err(DecodeError::NotEnoughBytes);
        }
        LittleEndian::write_u64(&mut buff[COMMON_HEADER_LEN..], nav);
        Ok(())
    }
}

/// Decoded MAC frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Rts(CommonHeader, RtsHeader),
    Cts(CommonHeader, CtsHeader),
    Data(CommonHeader, DataHeader),
    Ack(CommonHeader),
    Broadcast(CommonHeader, DataHeader),
    ContentionBegin(CommonHeader, CtsHeader),
    Contention(CommonHeader, CtsHeader),
    ContentionEnd(CommonHeader, CtsHeader),
}

impl Frame {
    pub fn decode(buff: &[u8]) -> Result<Self, DecodeError> {
        let (common, n) = CommonHeader::decode(buff)?;
        let body = &buff[n..];

        let f = match common.kind {
            FrameType::Rts => Frame::Rts(common, RtsHeader::decode(body)?.0),
            FrameType::Cts => Frame::Cts(common, CtsHeader::decode(body)?.0),
            FrameType::Data => Frame::Data(common, DataHeader::decode(body)?.0),
            FrameType::Broadcast => Frame::Broadcast(common, DataHeader::decode(body)?.0),
            FrameType::Ack => {
                if body.len() < ACK_HEADER_LEN {
                    return Err(DecodeError::NotEnoughBytes);
                }
                Frame::Ack(common)
            },
            FrameType::ContentionBegin => Frame::ContentionBegin(common, CtsHeader::decode(body)?.0),
            FrameType::Contention => Frame::Contention(common, CtsHeader::decode(body)?.0),
            FrameType::ContentionEnd => Frame::ContentionEnd(common, CtsHeader::decode(body)?.0),
        };

        Ok(f)
    }

    pub fn common(&self) -> &CommonHeader {
        match self {
            Frame::Rts(c, _) => c,
            Frame::Cts(c, _) => c,
            Frame::Data(c, _) => c,
            Frame::Ack(c) => c,
            Frame::Broadcast(c, _) => c,
            Frame::ContentionBegin(c, _) => c,
            Frame::Contention(c, _) => c,
            Frame::ContentionEnd(c, _) => c,
        }
    }

    /// Medium reservation announced by this frame
    pub fn nav(&self) -> Option<Ts> {
        match self {
            Frame::Rts(_, h) => Some(h.nav),
            Frame::Cts(_, h) | Frame::ContentionBegin(_, h)
                | Frame::Contention(_, h) | Frame::ContentionEnd(_, h) => Some(h.nav),
            Frame::Data(_, h) | Frame::Broadcast(_, h) => Some(h.nav),
            Frame::Ack(_) => None,
        }
    }
}
