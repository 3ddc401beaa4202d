//! Core MAC state, queues and receive handling
//!
//! A [`Core`] is one node's protocol instance. It is advanced only by
//! [`Mac::tick`] (self-scheduled wake-ups), [`Mac::receive`] (frames from
//! the radio) and [`Mac::transmit`] (packets from above). Transition logic
//! lives in `csma.rs` and `contention.rs`.
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use log::{trace, debug, warn, error};

use heapless::spsc::Queue;
use rand_core::RngCore;

use crate::{Ts, NodeId, Radio, BROADCAST_ADDR};
use crate::error::{CoreError, Diagnostic};
use crate::packet::{Packet, Priority};
use crate::timer::Timer;

use super::Mac;
use super::classifier::Classifier;
use super::config::{MacConfig, SensingMode};
use super::frame::*;

/// Transmit queue length
pub const TX_QUEUE_LEN: usize = 32;

/// Receive queue length
pub const RX_QUEUE_LEN: usize = 32;

/// MAC states
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MacState {
    Idle,
    Backoff,
    Rts,
    Timeout,
    Cts,
    CtsTimeout,
    Data,
    Broadcast,
    Ack,
    Done,
    BroadDone,
    ContentionBegin,
    ContentionWaitingData,
    Contention,
}

impl MacState {
    /// States an incoming request may interrupt, to be resumed after
    pub fn is_resumable(&self) -> bool {
        matches!(self, MacState::Idle | MacState::Backoff | MacState::ContentionWaitingData)
    }
}

/// Reply awaited while in [`MacState::Timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Expect {
    None,
    Cts,
    Ack,
    Grant,
}

/// Per-node MAC statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MacStats {
    pub queued: u32,
    pub queued_high: u32,
    pub queued_low: u32,
    pub queue_full: u32,

    pub rts_sent: u32,
    pub data_sent: u32,
    pub broadcasts: u32,
    pub boosted: u32,
    pub acknowledged: u32,
    pub dropped: u32,
    /// Packets discarded at teardown
    pub flushed: u32,

    pub received: u32,
    pub received_broadcast: u32,

    pub stale_events: u32,
    pub mismatches: u32,
    pub chain_limits: u32,

    pub contention_rounds: u32,
    pub grants: u32,
}

/// Result of a single state transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Next {
    /// Run the next state at the same instant
    Continue,
    /// Wait for a timer or an incoming frame
    Suspend,
}

/// Priority CSMA/CA MAC
/// Generic over a Radio (R), Timer (T) and random source (G)
pub struct Core<R, T, G> {
    pub(crate) id: NodeId,
    pub(crate) config: MacConfig,
    pub(crate) classifier: Classifier,

    pub(crate) state: MacState,
    pub(crate) state_pending: MacState,
    pub(crate) expect: Expect,
    /// Wake-up time this node is waiting on, if any
    pub(crate) clock: Option<Ts>,

    /// Current exchange peer
    pub(crate) dst: NodeId,
    pub(crate) backoff: Ts,
    pub(crate) backoff_suspended: bool,
    pub(crate) nb: u32,
    pub(crate) be: u32,
    /// Medium reserved until
    pub(crate) nav: Ts,

    /// Size of the DATA frame announced by the last accepted RTS
    pub(crate) rx_size: u32,

    /// Class polled by the sink
    pub(crate) polled: Priority,
    /// Reservation requested by the contention winner
    pub(crate) pending_nav: Ts,

    pub(crate) tx_queue: Queue<Packet, TX_QUEUE_LEN>,
    pub(crate) tx_buffer: Option<Packet>,
    pub(crate) rx_queue: Queue<Packet, RX_QUEUE_LEN>,

    pub(crate) radio: R,
    pub(crate) timer: T,
    pub(crate) rng: G,

    pub(crate) stats: MacStats,
    pub(crate) last_diagnostic: Diagnostic,
}

impl <R, T, G> Core<R, T, G>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Create a new MAC using the provided radio
    pub fn new(id: NodeId, config: MacConfig, radio: R, timer: T, rng: G) -> Self {
        let classifier = Classifier::new(&config);

        Self {
            id,
            classifier,

            state: MacState::Idle,
            state_pending: MacState::Idle,
            expect: Expect::None,
            clock: None,

            dst: BROADCAST_ADDR,
            backoff: 0,
            backoff_suspended: false,
            nb: 0,
            be: config.min_be,
            nav: 0,

            rx_size: 0,

            polled: Priority::High,
            pending_nav: 0,

            tx_queue: Queue::new(),
            tx_buffer: None,
            rx_queue: Queue::new(),

            radio,
            timer,
            rng,

            stats: MacStats::default(),
            last_diagnostic: Diagnostic::None,

            config,
        }
    }

    /// Bootstrap the node, running the state machine from Idle
    pub fn start(&mut self) -> Result<(), CoreError> {
        let now = self.timer.now();
        debug!("Node {} start at {}", self.id, now);
        self.run(now)
    }

    /// Drain queued and in-flight packets, returning the final statistics
    pub fn teardown(&mut self) -> MacStats {
        while let Some(_p) = self.tx_queue.dequeue() {
            self.stats.flushed += 1;
        }
        if self.tx_buffer.take().is_some() {
            self.stats.flushed += 1;
        }
        while let Some(_p) = self.rx_queue.dequeue() {}

        self.state = MacState::Idle;
        self.state_pending = MacState::Idle;
        self.clock = None;

        self.stats.clone()
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn nav(&self) -> Ts {
        self.nav
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn last_diagnostic(&self) -> Diagnostic {
        self.last_diagnostic
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Number of packets waiting (queued plus in-flight)
    pub fn pending(&self) -> usize {
        self.tx_queue.len() + self.tx_buffer.is_some() as usize
    }

    /// Run same-instant transitions until the node suspends
    pub(crate) fn run(&mut self, now: Ts) -> Result<(), CoreError> {
        for _ in 0..self.config.max_chain {
            let prev = self.state;

            let next = self.step(now)?;

            if prev != self.state {
                trace!("Node {} {} -> {} at {}", self.id, prev, self.state, now);
            }

            if next == Next::Suspend {
                return Ok(());
            }
        }

        error!("Node {} exceeded {} transitions at {} (state {})", self.id, self.config.max_chain, now, self.state);
        self.diagnostic(Diagnostic::ChainLimit);

        Ok(())
    }

    /// Request a wake-up at `at` and mark it as the live timer
    pub(crate) fn suspend_until(&mut self, at: Ts) -> Next {
        self.clock = Some(at);
        self.timer.schedule(at);
        Next::Suspend
    }

    /// Wait for a frame with no timer running
    pub(crate) fn suspend(&mut self) -> Next {
        self.clock = None;
        Next::Suspend
    }

    pub(crate) fn diagnostic(&mut self, d: Diagnostic) {
        self.last_diagnostic = d;

        match d {
            Diagnostic::None => (),
            Diagnostic::StaleEvent => self.stats.stale_events += 1,
            Diagnostic::ChainLimit => self.stats.chain_limits += 1,
            _ => self.stats.mismatches += 1,
        }
    }

    /// Air time for `bytes` at the radio bit rate
    pub(crate) fn airtime(&self, bytes: usize) -> Ts {
        bytes as Ts * 8 * self.radio.bit_time()
    }

    pub(crate) fn is_sink(&self) -> bool {
        self.config.mode == SensingMode::ContentionArbitration && self.id == self.config.contention.sink
    }

    pub(crate) fn is_contention_peer(&self) -> bool {
        self.config.mode == SensingMode::ContentionArbitration && self.id != self.config.contention.sink
    }

    /// Common header of the in-flight packet
    pub(crate) fn tx_header(&self) -> Option<CommonHeader> {
        let tx = self.tx_buffer.as_ref()?;
        CommonHeader::decode(tx.data()).ok().map(|(h, _)| h )
    }

    /// Extend the NAV with a reservation heard at `now`
    pub(crate) fn update_nav(&mut self, now: Ts, nav: Ts) {
        let until = now.saturating_add(nav);
        if until > self.nav {
            trace!("Node {} NAV until {}", self.id, until);
            self.nav = until;
        }
    }

    /// Build and transmit a CTS layout control frame
    pub(crate) fn send_control(&mut self, now: Ts, dst: NodeId, kind: FrameType, h: CtsHeader) -> Result<(), CoreError> {
        let mut p = Packet::new(CTS_FRAME_LEN);

        let n = CommonHeader{ src: self.id, dst, kind }.encode(p.data_mut());
        h.encode(&mut p.data_mut()[n..]);

        debug!("Node {} send {} to {} at {}", self.id, kind, dst, now);

        self.radio_transmit(now, p)
    }

    pub(crate) fn radio_transmit(&mut self, now: Ts, p: Packet) -> Result<(), CoreError> {
        self.radio.transmit(now, p).map_err(|e| {
            error!("Node {} radio transmit failed: {:?}", self.id, e);
            CoreError::Radio
        })
    }

    /// Hand a delivered frame to the upper layer
    fn deliver(&mut self, packet: Packet) {
        if let Err(p) = self.rx_queue.enqueue(packet) {
            warn!("Node {} RX queue full, dropping packet {}", self.id, p.id);
        }
    }

    fn handle_frame(&mut self, now: Ts, frame: Frame, packet: Packet) -> Result<(), CoreError> {
        match frame {
            Frame::Rts(c, h) => {
                if c.dst != self.id {
                    self.update_nav(now, h.nav);
                    self.diagnostic(Diagnostic::NotForUs);
                    return Ok(());
                }

                if !self.state.is_resumable() {
                    debug!("Node {} RTS from {} in state {}", self.id, c.src, self.state);
                    self.diagnostic(Diagnostic::UnexpectedFrame);
                    return Ok(());
                }

                self.state_pending = self.state;
                self.dst = c.src;
                self.rx_size = h.size;
                self.state = MacState::Cts;
                self.suspend_until(now + self.config.sifs);
            },
            Frame::Cts(c, h) => {
                if c.dst != self.id {
                    self.update_nav(now, h.nav);
                    self.diagnostic(Diagnostic::NotForUs);
                    return Ok(());
                }

                if self.state != MacState::Timeout || self.expect != Expect::Cts {
                    self.diagnostic(Diagnostic::UnexpectedFrame);
                    return Ok(());
                }

                if c.src != self.dst {
                    self.diagnostic(Diagnostic::WrongPeer);
                    return Ok(());
                }

                self.expect = Expect::None;
                self.state = MacState::Data;
                self.suspend_until(now + self.config.sifs);
            },
            Frame::Data(c, h) => {
                if c.dst != self.id {
                    self.update_nav(now, h.nav);
                    self.diagnostic(Diagnostic::NotForUs);
                    return Ok(());
                }

                match self.state {
                    s if s.is_resumable() => {
                        self.state_pending = s;
                        self.dst = c.src;
                    },
                    MacState::CtsTimeout if c.src == self.dst => (),
                    MacState::CtsTimeout => {
                        self.diagnostic(Diagnostic::WrongPeer);
                        return Ok(());
                    },
                    _ => {
                        debug!("Node {} DATA from {} in state {}", self.id, c.src, self.state);
                        self.diagnostic(Diagnostic::UnexpectedFrame);
                        return Ok(());
                    }
                }

                debug!("Node {} received DATA {} from {} ({} bytes)", self.id, packet.id, c.src, h.size);

                self.stats.received += 1;
                self.deliver(packet);

                self.state = MacState::Ack;
                self.suspend_until(now + self.config.sifs);
            },
            Frame::Broadcast(c, _h) => {
                if c.dst != BROADCAST_ADDR {
                    self.diagnostic(Diagnostic::NotForUs);
                    return Ok(());
                }

                debug!("Node {} received broadcast {} from {}", self.id, packet.id, c.src);

                self.stats.received_broadcast += 1;
                self.deliver(packet);
            },
            Frame::Ack(c) => {
                if c.dst != self.id {
                    self.diagnostic(Diagnostic::NotForUs);
                    return Ok(());
                }

                if self.state != MacState::Timeout || self.expect != Expect::Ack {
                    self.diagnostic(Diagnostic::UnexpectedFrame);
                    return Ok(());
                }

                if c.src != self.dst {
                    self.diagnostic(Diagnostic::WrongPeer);
                    return Ok(());
                }

                debug!("Node {} ACK from {} at {}", self.id, c.src, now);

                self.stats.acknowledged += 1;
                self.tx_buffer = None;
                self.expect = Expect::None;
                self.state = MacState::Idle;

                return self.run(now);
            },
            Frame::ContentionBegin(c, h) => self.handle_contention_begin(now, c, h),
            Frame::Contention(c, h) => self.handle_contention(now, c, h),
            Frame::ContentionEnd(c, h) => return self.handle_contention_end(now, c, h),
        }

        Ok(())
    }
}

impl <R, T, G> Mac for Core<R, T, G>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    type Error = CoreError;

    fn transmit(&mut self, packet: Packet) -> Result<(), Self::Error> {
        let priority = packet.priority;

        if let Err(p) = self.tx_queue.enqueue(packet) {
            warn!("Node {} TX queue full", self.id);
            self.stats.queue_full += 1;
            return Err(CoreError::QueueFull(p));
        }

        self.stats.queued += 1;
        match priority {
            Priority::High => self.stats.queued_high += 1,
            Priority::Low => self.stats.queued_low += 1,
        }

        if self.state == MacState::Idle {
            let now = self.timer.now();
            return self.run(now);
        }

        Ok(())
    }

    fn receive(&mut self, packet: Packet) -> Result<(), Self::Error> {
        let now = self.timer.now();

        let frame = match Frame::decode(packet.data()) {
            Ok(f) => f,
            Err(e) => {
                debug!("Node {} failed to decode packet {}: {}", self.id, packet.id, e);
                return Err(e.into());
            }
        };

        if !self.classifier.is_calibrated() {
            let own = self.radio.power();
            self.classifier.calibrate(packet.rx_dbm, packet.tx_dbm, own);
        }

        trace!("Node {} rx {} from {} in state {}", self.id, frame.common().kind, frame.common().src, self.state);

        self.handle_frame(now, frame, packet)
    }

    fn build_header(&self, packet: &mut Packet, dst: NodeId) -> Result<(), Self::Error> {
        if packet.size() < DATA_OVERHEAD {
            return Err(CoreError::Decode(crate::error::DecodeError::NotEnoughBytes));
        }

        let kind = match dst {
            BROADCAST_ADDR => FrameType::Broadcast,
            _ => FrameType::Data,
        };
        let size = (packet.size() - DATA_OVERHEAD) as u32;

        let buff = packet.data_mut();
        let n = CommonHeader{ src: self.id, dst, kind }.encode(buff);
        DataHeader{ nav: 0, size }.encode(&mut buff[n..]);

        Ok(())
    }

    fn header_size(&self) -> usize {
        DATA_OVERHEAD + self.radio.header_size()
    }

    fn tick(&mut self, at: Ts) -> Result<(), Self::Error> {
        if self.clock != Some(at) {
            trace!("Node {} stale tick {} (clock {:?})", self.id, at, self.clock);
            self.diagnostic(Diagnostic::StaleEvent);
            return Ok(());
        }

        self.clock = None;
        self.run(at)
    }

    fn take_received(&mut self) -> Option<Packet> {
        self.rx_queue.dequeue()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::vec::Vec;

    use rand_core::SeedableRng;
    use rand_wyrand::WyRand;

    use crate::timer::mock::MockTimer;
    use crate::radio::mock::MockRadio;
    use crate::dbm_to_mw;

    use super::*;

    pub(crate) type TestMac = Core<MockRadio, MockTimer, WyRand>;

    pub(crate) fn setup(id: NodeId, config: MacConfig) -> (TestMac, MockRadio, MockTimer) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let radio = MockRadio::new();
        let timer = MockTimer::new();
        let mac = Core::new(id, config, radio.clone(), timer.clone(), WyRand::seed_from_u64(id as u64));

        (mac, radio, timer)
    }

    /// Fire scheduled wake-ups in order until `until`
    pub(crate) fn drive(mac: &mut TestMac, timer: &mut MockTimer, until: Ts) {
        while let Some(t) = timer.next() {
            if t > until {
                break;
            }
            timer.advance();
            mac.tick(t).unwrap();
        }
    }

    /// Fire scheduled wake-ups until the MAC transmits another frame
    pub(crate) fn drive_until_tx(mac: &mut TestMac, radio: &MockRadio, timer: &mut MockTimer) {
        let n = radio.transmitted().len();
        while radio.transmitted().len() == n {
            let t = timer.advance().expect("no wake-up pending");
            mac.tick(t).unwrap();
        }
    }

    /// Data packet from `mac` to `dst` with a payload of `len` bytes
    pub(crate) fn data(mac: &TestMac, dst: NodeId, len: usize, priority: Priority) -> Packet {
        let payload: Vec<u8> = (0..len).map(|i| i as u8 ).collect();
        let mut p = Packet::with_payload(mac.header_size(), &payload, priority);
        mac.build_header(&mut p, dst).unwrap();
        p
    }

    /// Incoming control frame
    pub(crate) fn control(src: NodeId, dst: NodeId, kind: FrameType, h: CtsHeader) -> Packet {
        let mut p = Packet::new(CTS_FRAME_LEN);
        let n = CommonHeader{ src, dst, kind }.encode(p.data_mut());
        h.encode(&mut p.data_mut()[n..]);
        p
    }

    pub(crate) fn cts(src: NodeId, dst: NodeId, nav: Ts) -> Packet {
        control(src, dst, FrameType::Cts, CtsHeader{ nav, priority_type: PriorityType::Disabled, node_allowed: dst })
    }

    pub(crate) fn rts(src: NodeId, dst: NodeId, nav: Ts, size: u32) -> Packet {
        let mut p = Packet::new(RTS_FRAME_LEN);
        let n = CommonHeader{ src, dst, kind: FrameType::Rts }.encode(p.data_mut());
        RtsHeader{ nav, size, priority: Priority::Low }.encode(&mut p.data_mut()[n..]);
        p
    }

    pub(crate) fn ack(src: NodeId, dst: NodeId) -> Packet {
        let mut p = Packet::new(ACK_FRAME_LEN);
        CommonHeader{ src, dst, kind: FrameType::Ack }.encode(p.data_mut());
        p
    }

    fn kinds(radio: &MockRadio) -> Vec<FrameType> {
        radio.transmitted().iter()
            .map(|(_, p, _)| CommonHeader::decode(p.data()).unwrap().0.kind )
            .collect()
    }

    #[test]
    fn build_header() {
        let (mac, _radio, _timer) = setup(3, MacConfig::default());

        let p = data(&mac, 7, 4, Priority::Low);
        assert_eq!(p.size(), DATA_OVERHEAD + 4);
        assert_eq!(p.payload(mac.header_size()), &[0, 1, 2, 3]);

        match Frame::decode(p.data()).unwrap() {
            Frame::Data(c, h) => {
                assert_eq!(c, CommonHeader{ src: 3, dst: 7, kind: FrameType::Data });
                assert_eq!(h.size, 4);
            },
            f => panic!("unexpected frame {:?}", f),
        }

        let p = data(&mac, BROADCAST_ADDR, 4, Priority::Low);
        assert_eq!(Frame::decode(p.data()).unwrap().common().kind, FrameType::Broadcast);

        let mut short = Packet::new(4);
        assert!(mac.build_header(&mut short, 7).is_err());
    }

    #[test]
    fn small_packet_uses_data() {
        let (mut mac, radio, mut timer) = setup(1, MacConfig::default());

        let p = data(&mac, 2, 10, Priority::Low);
        mac.transmit(p).unwrap();
        assert_eq!(mac.state(), MacState::Backoff);

        drive_until_tx(&mut mac, &radio, &mut timer);

        assert_eq!(kinds(&radio), vec![FrameType::Data]);
        assert_eq!(mac.state(), MacState::Timeout);
        assert_eq!(mac.expect, Expect::Ack);

        // DIFS of backoff elapsed before transmission
        let (at, _, _) = radio.transmitted()[0];
        assert!(at >= mac.config.difs - mac.config.unit_backoff);

        mac.receive(ack(2, 1)).unwrap();
        assert_eq!(mac.state(), MacState::Idle);
        assert_eq!(mac.stats().acknowledged, 1);
        assert_eq!(mac.pending(), 0);
    }

    #[test]
    fn rts_retries_exhausted() {
        let (mut mac, radio, mut timer) = setup(1, MacConfig::default());

        let p = data(&mac, 2, 1000, Priority::Low);
        mac.transmit(p).unwrap();

        drive(&mut mac, &mut timer, 10_000_000_000);

        // No CTS ever arrives, the packet is dropped on the 7th timeout
        assert_eq!(kinds(&radio), vec![FrameType::Rts; 7]);
        assert_eq!(mac.stats().dropped, 1);
        assert_eq!(mac.stats().rts_sent, 7);
        assert_eq!(mac.state(), MacState::Idle);
        assert!(mac.tx_buffer.is_none());
    }

    #[test]
    fn rts_cts_data_ack() {
        let (mut mac, radio, mut timer) = setup(1, MacConfig::default());

        let p = data(&mac, 2, 1000, Priority::Low);
        mac.transmit(p).unwrap();

        drive_until_tx(&mut mac, &radio, &mut timer);
        assert_eq!(mac.expect, Expect::Cts);

        // CTS from the wrong peer is ignored
        mac.receive(cts(3, 1, 0)).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::WrongPeer);
        assert_eq!(mac.state(), MacState::Timeout);

        mac.receive(cts(2, 1, 0)).unwrap();
        assert_eq!(mac.state(), MacState::Data);

        let t = timer.advance().unwrap();
        mac.tick(t).unwrap();
        assert_eq!(kinds(&radio), vec![FrameType::Rts, FrameType::Data]);

        // DATA carries a NAV covering the ACK
        let (_, p, _) = radio.last_transmitted().unwrap();
        match Frame::decode(p.data()).unwrap() {
            Frame::Data(_, h) => assert_eq!(h.nav, mac.config.sifs + mac.airtime(ACK_FRAME_LEN)),
            f => panic!("unexpected frame {:?}", f),
        }

        mac.receive(ack(2, 1)).unwrap();
        assert_eq!(mac.state(), MacState::Idle);
        assert_eq!(mac.stats().acknowledged, 1);
    }

    #[test]
    fn high_priority_boost() {
        let (mut mac, mut radio, mut timer) = setup(1, MacConfig::default());
        radio.set_power(0.0);

        // High threshold at 1.2e-6 mW, low occupancy between it and the ED threshold
        mac.classifier.calibrate(-60.0, 0.0, 0.0);
        radio.set_carrier_sense_mw(1e-7);

        let p = data(&mac, 2, 10, Priority::High);
        mac.transmit(p).unwrap();
        drive_until_tx(&mut mac, &radio, &mut timer);

        let (_, sent, power) = radio.last_transmitted().unwrap();
        assert_eq!(sent.priority, Priority::High);
        assert!((power - mac.config.boost_db()).abs() < 1e-9);
        assert_eq!(radio.power(), 0.0);
        assert_eq!(mac.stats().boosted, 1);

        mac.receive(ack(2, 1)).unwrap();
        radio.clear();

        // Large packet, RTS goes out on a lightly used channel
        let p = data(&mac, 2, 1000, Priority::High);
        mac.transmit(p).unwrap();
        drive_until_tx(&mut mac, &radio, &mut timer);
        assert_eq!(kinds(&radio), vec![FrameType::Rts]);

        // Occupancy rises to heavy before the CTS, DATA goes at base power
        radio.set_carrier_sense_mw(1e-5);
        mac.receive(cts(2, 1, 0)).unwrap();
        drive_until_tx(&mut mac, &radio, &mut timer);

        let (_, sent, power) = radio.last_transmitted().unwrap();
        assert_eq!(Frame::decode(sent.data()).unwrap().common().kind, FrameType::Data);
        assert_eq!(power, 0.0);
        assert_eq!(mac.stats().boosted, 1);

        // Heavy occupancy holds a new high packet in backoff
        mac.receive(ack(2, 1)).unwrap();
        radio.clear();

        let p = data(&mac, 2, 10, Priority::High);
        mac.transmit(p).unwrap();
        let until = timer.now() + 1_000_000;
        drive(&mut mac, &mut timer, until);
        assert!(radio.transmitted().is_empty());
        assert!(mac.backoff_suspended);
    }

    #[test]
    fn high_priority_broadcast_boost() {
        let (mut mac, mut radio, mut timer) = setup(1, MacConfig::default());

        mac.classifier.calibrate(-60.0, 0.0, 0.0);
        radio.set_carrier_sense_mw(1e-7);

        let p = data(&mac, BROADCAST_ADDR, 10, Priority::High);
        mac.transmit(p).unwrap();
        drive_until_tx(&mut mac, &radio, &mut timer);

        let (_, sent, power) = radio.last_transmitted().unwrap();
        assert_eq!(Frame::decode(sent.data()).unwrap().common().kind, FrameType::Broadcast);
        assert!((power - mac.config.boost_db()).abs() < 1e-9);
        assert_eq!(radio.power(), 0.0);
        assert_eq!(mac.stats().boosted, 1);
        assert_eq!(mac.state(), MacState::BroadDone);
    }

    #[test]
    fn low_priority_defers_on_low_occupancy() {
        let (mut mac, mut radio, mut timer) = setup(1, MacConfig::default());

        mac.classifier.calibrate(-60.0, 0.0, 0.0);
        radio.set_carrier_sense_mw(1e-7);

        let p = data(&mac, 2, 10, Priority::Low);
        mac.transmit(p).unwrap();
        drive(&mut mac, &mut timer, 1_000_000);

        assert!(radio.transmitted().is_empty());
        assert!(mac.backoff_suspended);

        radio.set_carrier_sense_mw(dbm_to_mw(-100.0));
        drive_until_tx(&mut mac, &radio, &mut timer);
        assert_eq!(kinds(&radio), vec![FrameType::Data]);
    }

    #[test]
    fn nav_defers_backoff() {
        let (mut mac, radio, mut timer) = setup(1, MacConfig::default());

        // Overheard RTS between other nodes reserves the medium for 1 ms
        mac.receive(rts(4, 5, 1_000_000, 1000)).unwrap();
        assert_eq!(mac.nav(), 1_000_000);
        assert_eq!(mac.last_diagnostic(), Diagnostic::NotForUs);

        let p = data(&mac, 2, 10, Priority::Low);
        mac.transmit(p).unwrap();

        drive_until_tx(&mut mac, &radio, &mut timer);

        let (at, _, _) = radio.transmitted()[0];
        assert!(at > 1_000_000);
    }

    #[test]
    fn overheard_data_updates_nav() {
        let (mut mac, _radio, mut timer) = setup(1, MacConfig::default());
        timer.inc(1_000);

        let mut p = {
            let sender = setup(4, MacConfig::default()).0;
            data(&sender, 5, 20, Priority::Low)
        };
        DataHeader::set_nav(p.data_mut(), 500_000).unwrap();

        mac.receive(p).unwrap();
        assert_eq!(mac.nav(), 501_000);
        assert_eq!(mac.last_diagnostic(), Diagnostic::NotForUs);
        assert!(mac.take_received().is_none());
        assert_eq!(mac.state(), MacState::Idle);
    }

    #[test]
    fn oversized_nav_saturates() {
        let (mut mac, _radio, mut timer) = setup(1, MacConfig::default());
        timer.inc(5);

        mac.receive(rts(4, 5, Ts::MAX, 100)).unwrap();
        assert_eq!(mac.nav(), Ts::MAX);
        assert_eq!(mac.last_diagnostic(), Diagnostic::NotForUs);
    }

    #[test]
    fn broadcast_type_to_unicast_dropped() {
        let (mut mac, _radio, _timer) = setup(1, MacConfig::default());

        let mut p = Packet::new(DATA_OVERHEAD + 4);
        let n = CommonHeader{ src: 4, dst: 5, kind: FrameType::Broadcast }.encode(p.data_mut());
        DataHeader{ nav: 0, size: 4 }.encode(&mut p.data_mut()[n..]);

        mac.receive(p).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::NotForUs);
        assert!(mac.take_received().is_none());
        assert_eq!(mac.stats().received_broadcast, 0);
    }

    #[test]
    fn ack_from_wrong_peer_ignored() {
        let (mut mac, radio, mut timer) = setup(1, MacConfig::default());

        let p = data(&mac, 2, 10, Priority::Low);
        mac.transmit(p).unwrap();
        drive_until_tx(&mut mac, &radio, &mut timer);
        assert_eq!(mac.expect, Expect::Ack);

        mac.receive(ack(3, 1)).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::WrongPeer);
        assert_eq!(mac.state(), MacState::Timeout);
        assert_eq!(mac.stats().acknowledged, 0);

        mac.receive(ack(2, 1)).unwrap();
        assert_eq!(mac.state(), MacState::Idle);
        assert_eq!(mac.stats().acknowledged, 1);
    }

    #[test]
    fn data_from_wrong_peer_after_cts() {
        let (mut mac, _radio, mut timer) = setup(2, MacConfig::default());

        mac.receive(rts(1, 2, 0, 100)).unwrap();
        let t = timer.advance().unwrap();
        mac.tick(t).unwrap();
        assert_eq!(mac.state(), MacState::CtsTimeout);

        let d = {
            let sender = setup(3, MacConfig::default()).0;
            data(&sender, 2, 36, Priority::Low)
        };
        mac.receive(d).unwrap();

        assert_eq!(mac.last_diagnostic(), Diagnostic::WrongPeer);
        assert_eq!(mac.state(), MacState::CtsTimeout);
        assert!(mac.take_received().is_none());
        assert_eq!(mac.stats().received, 0);
    }

    #[test]
    fn airtime_follows_radio_bit_time() {
        let (mac, mut radio, _timer) = setup(1, MacConfig::default());

        assert_eq!(mac.airtime(10), 10 * 8 * 100);

        radio.set_bit_time(250);
        assert_eq!(mac.airtime(10), 10 * 8 * 250);
    }

    #[test]
    fn stale_tick_ignored() {
        let (mut mac, _radio, mut timer) = setup(1, MacConfig::default());

        let p = data(&mac, 2, 10, Priority::Low);
        mac.transmit(p).unwrap();

        let live = timer.last_scheduled().unwrap();
        let backoff = mac.backoff;

        mac.tick(live + 1).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::StaleEvent);
        assert_eq!(mac.stats().stale_events, 1);
        assert_eq!(mac.backoff, backoff);

        timer.set(live);
        mac.tick(live).unwrap();
        assert!(mac.backoff < backoff);
    }

    #[test]
    fn transition_chain_bounded() {
        let config = MacConfig{ max_chain: 1, ..Default::default() };
        let (mut mac, _radio, _timer) = setup(1, config);

        let p = data(&mac, 2, 10, Priority::Low);
        mac.transmit(p).unwrap();

        assert_eq!(mac.last_diagnostic(), Diagnostic::ChainLimit);
        assert_eq!(mac.stats().chain_limits, 1);
    }

    #[test]
    fn unexpected_frames() {
        let (mut mac, radio, _timer) = setup(1, MacConfig::default());

        // CTS and ACK with nothing outstanding
        mac.receive(cts(2, 1, 0)).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::UnexpectedFrame);

        mac.receive(ack(2, 1)).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::UnexpectedFrame);

        mac.receive(ack(2, 9)).unwrap();
        assert_eq!(mac.last_diagnostic(), Diagnostic::NotForUs);

        assert_eq!(mac.stats().mismatches, 3);
        assert_eq!(mac.state(), MacState::Idle);
        assert!(radio.transmitted().is_empty());

        // Garbage is a decode error
        assert!(mac.receive(Packet::new(3)).is_err());
    }

    #[test]
    fn rts_served_from_idle() {
        let (mut mac, radio, mut timer) = setup(2, MacConfig::default());

        mac.receive(rts(1, 2, 0, 100)).unwrap();
        assert_eq!(mac.state(), MacState::Cts);

        let t = timer.advance().unwrap();
        mac.tick(t).unwrap();
        assert_eq!(mac.state(), MacState::CtsTimeout);
        assert_eq!(kinds(&radio), vec![FrameType::Cts]);

        // CTS reserves SIFS + DATA + SIFS + ACK
        let (_, p, _) = radio.last_transmitted().unwrap();
        let expected = mac.config.sifs + mac.airtime(100) + mac.config.sifs + mac.airtime(ACK_FRAME_LEN);
        assert_eq!(Frame::decode(p.data()).unwrap().nav(), Some(expected));

        // DATA from the peer is delivered and acknowledged
        let d = {
            let sender = setup(1, MacConfig::default()).0;
            data(&sender, 2, 36, Priority::Low)
        };
        mac.receive(d.clone()).unwrap();
        assert_eq!(mac.state(), MacState::Ack);
        assert_eq!(mac.take_received().map(|p| p.id ), Some(d.id));

        let t = timer.advance().unwrap();
        mac.tick(t).unwrap();
        assert_eq!(kinds(&radio), vec![FrameType::Cts, FrameType::Ack]);
        assert_eq!(mac.state(), MacState::Done);

        let t = timer.advance().unwrap();
        mac.tick(t).unwrap();
        assert_eq!(mac.state(), MacState::Idle);
    }

    #[test]
    fn rts_during_backoff_resumes() {
        let (mut mac, _radio, mut timer) = setup(2, MacConfig::default());

        let p = data(&mac, 3, 10, Priority::Low);
        mac.transmit(p).unwrap();
        assert_eq!(mac.state(), MacState::Backoff);

        mac.receive(rts(1, 2, 0, 100)).unwrap();
        assert_eq!(mac.state_pending, MacState::Backoff);
        assert_eq!(mac.dst, 1);

        // CTS goes out, nothing follows, CtsTimeout returns to Backoff
        let t = timer.advance().unwrap();
        mac.tick(t).unwrap();
        assert_eq!(mac.state(), MacState::CtsTimeout);

        while mac.state() == MacState::CtsTimeout {
            let t = timer.advance().unwrap();
            mac.tick(t).unwrap();
        }
        assert_eq!(mac.state(), MacState::Backoff);
        assert_eq!(mac.dst, 3);
    }

    #[test]
    fn queue_full_returns_packet() {
        let (mut mac, _radio, _timer) = setup(1, MacConfig::default());

        // One packet is in flight, the rest fill the queue
        for _ in 0..TX_QUEUE_LEN {
            let p = data(&mac, 2, 4, Priority::Low);
            mac.transmit(p).unwrap();
        }

        let p = data(&mac, 2, 4, Priority::Low);
        let id = p.id;
        match mac.transmit(p) {
            Err(CoreError::QueueFull(p)) => assert_eq!(p.id, id),
            r => panic!("unexpected result {:?}", r),
        }

        let stats = mac.teardown();
        assert_eq!(stats.queue_full, 1);
        assert_eq!(stats.flushed, TX_QUEUE_LEN as u32);
        assert_eq!(mac.pending(), 0);
    }
}
