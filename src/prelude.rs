//! SIC MAC crate prelude
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

pub use crate::{Ts, NodeId, BROADCAST_ADDR, Radio};

pub use crate::packet::{Packet, PacketId, Priority};

pub use crate::error::{CoreError, Diagnostic};
pub use crate::timer::{Timer as MacTimer};

pub use crate::tracker::{SignalTracker, SicSignal};
pub use crate::radio::{SicRadio, RadioConfig, RadioStats, Link};

pub use crate::mac::{Mac, Core as SicMac, MacConfig, ContentionConfig, SensingMode, SenseFlags, MacState, MacStats};
pub use crate::mac::{Classifier, ChannelState};
