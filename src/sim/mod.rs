//! Minimal discrete event host for running nodes end to end
//!
//! Nodes share a single event queue. Each node is a [`SicRadio`] below a
//! MAC [`Core`], bound to the queue through [`SimLink`] (frames out) and
//! [`SimTimer`] (wake-ups). The [`Medium`] turns each transmission into
//! carrier sense and reception events at every node that can hear it.
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::convert::Infallible;
use std::rc::Rc;

use log::{trace, debug, warn};
use rand_core::SeedableRng;
use rand_wyrand::WyRand;

use crate::{Ts, NodeId, Radio, dbm_to_mw};
use crate::error::CoreError;
use crate::mac::{Mac, MacConfig, MacStats, Core};
use crate::mac::frame::{CommonHeader, FrameType};
use crate::packet::{Packet, Priority};
use crate::radio::{Link, SicRadio, RadioConfig, RadioStats};
use crate::timer::Timer;

pub mod event;
pub use event::{Event, ScheduledEvent};

pub mod medium;
pub use medium::Medium;

/// Radio used by simulated nodes
pub type SimRadio = SicRadio<SimLink, WyRand>;

/// MAC used by simulated nodes
pub type SimMac = Core<SimRadio, SimTimer, WyRand>;

/// State shared between the simulation and node handles
#[derive(Debug)]
struct Shared {
    queue: BinaryHeap<ScheduledEvent>,
    seq: u64,
    now: Ts,
    noise_mw: f64,
}

impl Shared {
    fn push(&mut self, time: Ts, event: Event) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(ScheduledEvent::new(time, seq, event));
    }
}

/// Link from a node's radio onto the shared medium
pub struct SimLink {
    node: NodeId,
    shared: Rc<RefCell<Shared>>,
}

impl Link for SimLink {
    type Error = Infallible;

    fn transmit(&mut self, now: Ts, packet: Packet) -> Result<(), Self::Error> {
        self.shared.borrow_mut().push(now, Event::Transmit{ from: self.node, packet });
        Ok(())
    }

    fn noise_mw(&self, _channel: u32) -> f64 {
        self.shared.borrow().noise_mw
    }
}

/// Timer handle scheduling wake-ups for one node
pub struct SimTimer {
    node: NodeId,
    shared: Rc<RefCell<Shared>>,
}

impl Timer for SimTimer {
    fn now(&self) -> Ts {
        self.shared.borrow().now
    }

    fn schedule(&mut self, at: Ts) {
        self.shared.borrow_mut().push(at, Event::Wake{ node: self.node, at });
    }
}

/// Frame delivered to a node's upper layer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub time: Ts,
    pub node: NodeId,
    pub src: NodeId,
    pub kind: FrameType,
    pub priority: Priority,
    /// Payload size in bytes
    pub size: usize,
}

/// Simulation of a set of nodes over a static medium
pub struct Simulation {
    shared: Rc<RefCell<Shared>>,
    nodes: Vec<SimMac>,
    medium: Medium,
    deliveries: Vec<Delivery>,
    seed: u64,
}

impl Simulation {
    pub fn new(medium: Medium, seed: u64) -> Self {
        let shared = Shared {
            queue: BinaryHeap::new(),
            seq: 0,
            now: 0,
            noise_mw: dbm_to_mw(medium.noise_dbm()),
        };

        Self {
            shared: Rc::new(RefCell::new(shared)),
            nodes: Vec::new(),
            medium,
            deliveries: Vec::new(),
            seed,
        }
    }

    /// Add and start a node, returning its id
    pub fn add_node(&mut self, mac_config: MacConfig, radio_config: RadioConfig) -> Result<NodeId, CoreError> {
        let id = self.nodes.len() as NodeId;

        let link = SimLink{ node: id, shared: self.shared.clone() };
        let timer = SimTimer{ node: id, shared: self.shared.clone() };

        let seed = self.seed.wrapping_add((id as u64 + 1) * 0x9e37_79b9);
        let radio = SicRadio::new(radio_config, link, WyRand::seed_from_u64(seed));
        let mut mac = Core::new(id, mac_config, radio, timer, WyRand::seed_from_u64(seed ^ 0xa5a5));

        mac.start()?;

        debug!("Added node {}", id);
        self.nodes.push(mac);

        Ok(id)
    }

    /// Connect two nodes with the provided path loss in dB
    pub fn set_link(&mut self, a: NodeId, b: NodeId, loss_db: f64) {
        self.medium.set_link(a, b, loss_db);
    }

    pub fn set_noise_dbm(&mut self, dbm: f64) {
        self.medium.set_noise_dbm(dbm);
        self.shared.borrow_mut().noise_mw = dbm_to_mw(dbm);
    }

    /// Schedule an application send of `size` payload bytes
    pub fn send(&mut self, at: Ts, from: NodeId, to: NodeId, size: usize, priority: Priority) {
        self.shared.borrow_mut().push(at, Event::Send{ from, to, size, priority });
    }

    pub fn now(&self) -> Ts {
        self.shared.borrow().now
    }

    pub fn node(&self, id: NodeId) -> Option<&SimMac> {
        self.nodes.get(id as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimMac> {
        self.nodes.get_mut(id as usize)
    }

    pub fn nodes(&self) -> &[SimMac] {
        &self.nodes
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Frames delivered so far, in delivery order
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Per node MAC and radio statistics
    pub fn stats(&self) -> Vec<(MacStats, RadioStats)> {
        self.nodes.iter()
            .map(|n| (n.stats().clone(), n.radio().stats().clone()) )
            .collect()
    }

    /// Tear down every node, returning final MAC statistics
    pub fn teardown(&mut self) -> Vec<MacStats> {
        self.nodes.iter_mut().map(|n| n.teardown() ).collect()
    }

    /// Process the next event, returning its time
    pub fn step(&mut self) -> Result<Option<Ts>, CoreError> {
        let e = {
            let mut s = self.shared.borrow_mut();
            match s.queue.pop() {
                Some(e) => {
                    if e.time > s.now {
                        s.now = e.time;
                    }
                    e
                },
                None => return Ok(None),
            }
        };

        self.dispatch(e.time, e.event)?;

        Ok(Some(e.time))
    }

    /// Process events up to and including `end`
    pub fn run_until(&mut self, end: Ts) -> Result<(), CoreError> {
        loop {
            let next = self.shared.borrow().queue.peek().map(|e| e.time );
            match next {
                Some(t) if t <= end => { self.step()?; },
                _ => break,
            }
        }

        let mut s = self.shared.borrow_mut();
        if end > s.now {
            s.now = end;
        }

        Ok(())
    }

    fn dispatch(&mut self, now: Ts, event: Event) -> Result<(), CoreError> {
        match event {
            Event::Wake{ node, at } => {
                if let Some(n) = self.nodes.get_mut(node as usize) {
                    n.tick(at)?;
                }
            },
            Event::Transmit{ from, packet } => self.propagate(now, from, packet),
            Event::CarrierSense{ node, packet } => {
                if let Some(n) = self.nodes.get_mut(node as usize) {
                    n.radio_mut().carrier_sense(now, &packet);
                }
            },
            Event::Receive{ node, packet } => {
                let n = match self.nodes.get_mut(node as usize) {
                    Some(n) => n,
                    None => return Ok(()),
                };

                if let Some(p) = n.radio_mut().receive(now, packet) {
                    n.receive(p)?;
                }

                self.collect(now, node);
            },
            Event::TransmitEnd{ node, id } => {
                if let Some(n) = self.nodes.get_mut(node as usize) {
                    n.radio_mut().transmit_end(id);
                }
            },
            Event::Send{ from, to, size, priority } => {
                let n = match self.nodes.get_mut(from as usize) {
                    Some(n) => n,
                    None => return Ok(()),
                };

                let payload: Vec<u8> = (0..size).map(|i| i as u8 ).collect();
                let mut p = Packet::with_payload(n.header_size(), &payload, priority);
                n.build_header(&mut p, to)?;

                trace!("Node {} send {} bytes to {} ({})", from, size, to, priority);

                match n.transmit(p) {
                    Ok(()) => (),
                    Err(CoreError::QueueFull(p)) => warn!("Node {} queue full, dropping packet {}", from, p.id),
                    Err(e) => return Err(e),
                }
            },
        }

        Ok(())
    }

    /// Fan a transmission out to every node that can hear it
    fn propagate(&mut self, now: Ts, from: NodeId, packet: Packet) {
        let end = now + packet.duration;
        let mut s = self.shared.borrow_mut();

        for id in 0..self.nodes.len() as NodeId {
            let loss = match self.medium.loss(from, id) {
                Some(l) => l,
                None => continue,
            };

            let mut p = packet.clone();
            p.rx_dbm = packet.tx_dbm - loss;

            s.push(now, Event::CarrierSense{ node: id, packet: p.clone() });
            s.push(end, Event::Receive{ node: id, packet: p });
        }

        s.push(end, Event::TransmitEnd{ node: from, id: packet.id });
    }

    /// Move frames delivered to a node into the delivery log
    fn collect(&mut self, now: Ts, node: NodeId) {
        let n = match self.nodes.get_mut(node as usize) {
            Some(n) => n,
            None => return,
        };
        let overhead = n.header_size();

        while let Some(p) = n.take_received() {
            let (h, _) = match CommonHeader::decode(p.data()) {
                Ok(h) => h,
                Err(_) => continue,
            };

            self.deliveries.push(Delivery{
                time: now,
                node,
                src: h.src,
                kind: h.kind,
                priority: p.priority,
                size: p.payload(overhead).len(),
            });
        }
    }
}
