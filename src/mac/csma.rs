//! Priority CSMA/CA transitions
//!
//! Each `step_*` function handles one state at a single instant and returns
//! whether the machine continues immediately or waits.

use log::{trace, debug, warn};

use rand_core::RngCore;

use crate::{Ts, Radio, BROADCAST_ADDR};
use crate::error::CoreError;
use crate::packet::{Packet, Priority};
use crate::timer::Timer;

use super::classifier::ChannelState;
use super::core::{Core, MacState, Expect, Next};
use super::frame::*;

impl <R, T, G> Core<R, T, G>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Run the current state once
    pub(crate) fn step(&mut self, now: Ts) -> Result<Next, CoreError> {
        match self.state {
            MacState::Idle => Ok(self.step_idle(now)),
            MacState::Backoff => Ok(self.step_backoff(now)),
            MacState::Rts => self.step_rts(now),
            MacState::Timeout => Ok(self.step_timeout(now)),
            MacState::Cts => self.step_cts(now),
            MacState::CtsTimeout | MacState::Done => Ok(self.step_resume()),
            MacState::Data => self.step_data(now, false),
            MacState::Broadcast => self.step_data(now, true),
            MacState::Ack => self.step_ack(now),
            MacState::BroadDone => {
                self.tx_buffer = None;
                self.state = MacState::Idle;
                Ok(Next::Continue)
            },
            MacState::ContentionBegin => self.step_contention_begin(now),
            MacState::ContentionWaitingData => Ok(self.step_contention_wait(now)),
            MacState::Contention => self.step_contention(now),
        }
    }

    fn step_idle(&mut self, _now: Ts) -> Next {
        let packet = match self.tx_queue.dequeue() {
            Some(p) => p,
            None if self.is_sink() => {
                self.polled = Priority::High;
                self.state = MacState::ContentionBegin;
                return Next::Continue;
            },
            None => return self.suspend(),
        };

        trace!("Node {} starting packet {} ({} bytes, {})", self.id, packet.id, packet.size(), packet.priority);

        self.tx_buffer = Some(packet);
        self.nb = 0;
        self.be = self.config.min_be.saturating_sub(1);
        self.expect = Expect::None;

        if self.is_contention_peer() {
            self.state = MacState::ContentionWaitingData;
            return self.suspend();
        }

        self.backoff = self.config.difs;
        self.backoff_suspended = false;
        self.state = MacState::Backoff;
        self.state_pending = MacState::Backoff;

        Next::Continue
    }

    fn step_backoff(&mut self, now: Ts) -> Next {
        let unit = self.config.unit_backoff;

        let (priority, header) = match (&self.tx_buffer, self.tx_header()) {
            (Some(p), Some(h)) => (p.priority, h),
            _ => {
                warn!("Node {} in backoff with no valid packet", self.id);
                self.tx_buffer = None;
                self.state = MacState::Idle;
                return Next::Continue;
            }
        };

        if self.backoff > 0 && self.backoff < unit {
            self.backoff = 0;
        }

        if self.backoff == 0 {
            let size = self.tx_buffer.as_ref().map(|p| p.size() ).unwrap_or(0);

            self.state = if header.dst == BROADCAST_ADDR {
                MacState::Broadcast
            } else if size < self.config.rts_threshold {
                MacState::Data
            } else {
                MacState::Rts
            };
            self.state_pending = MacState::Idle;
            self.dst = header.dst;

            return Next::Continue;
        }

        let blocked = now < self.nav || self.classifier.classify(&mut self.radio, now).blocks(priority);

        if blocked {
            // Freeze and pad once per busy period
            if !self.backoff_suspended {
                trace!("Node {} backoff suspended at {}", self.id, now);
                self.backoff_suspended = true;
                self.backoff += self.config.difs;
            }
        } else {
            self.backoff_suspended = false;
            self.backoff -= unit;
        }

        self.suspend_until(now + unit)
    }

    fn step_rts(&mut self, now: Ts) -> Result<Next, CoreError> {
        let (size, priority) = match &self.tx_buffer {
            Some(p) => (p.size(), p.priority),
            None => {
                self.state = MacState::Idle;
                return Ok(Next::Continue);
            }
        };

        let sifs = self.config.sifs;
        let nav = sifs + self.airtime(CTS_FRAME_LEN)
            + sifs + self.airtime(size)
            + sifs + self.airtime(ACK_FRAME_LEN);

        let mut p = Packet::new(RTS_FRAME_LEN);
        p.priority = priority;
        let n = CommonHeader{ src: self.id, dst: self.dst, kind: FrameType::Rts }.encode(p.data_mut());
        RtsHeader{ nav, size: size as u32, priority }.encode(&mut p.data_mut()[n..]);

        debug!("Node {} send RTS to {} at {} (nav {})", self.id, self.dst, now, nav);

        self.radio_transmit(now, p)?;
        self.stats.rts_sent += 1;

        let timeout = self.airtime(RTS_FRAME_LEN) + sifs + self.airtime(CTS_FRAME_LEN) + self.config.propagation;

        self.expect = Expect::Cts;
        self.state = MacState::Timeout;

        Ok(self.suspend_until(now + timeout))
    }

    pub(crate) fn step_timeout(&mut self, now: Ts) -> Next {
        self.nb += 1;
        self.expect = Expect::None;

        if self.nb >= self.config.max_csma_retries {
            if let Some(p) = self.tx_buffer.take() {
                warn!("Node {} dropping packet {} after {} attempts", self.id, p.id, self.nb);
            }
            self.stats.dropped += 1;
            self.state = MacState::Idle;
            return Next::Continue;
        }

        if self.is_contention_peer() {
            trace!("Node {} no grant, waiting for the next round", self.id);
            self.state = MacState::ContentionWaitingData;
            return self.suspend();
        }

        self.be = (self.be + 1).min(self.config.max_be);

        let window = 1u32 << self.be;
        let slots = self.rng.next_u32() % window;
        self.backoff = slots as Ts * self.config.unit_backoff + self.config.difs;
        self.backoff_suspended = false;

        debug!("Node {} timeout at {}, retry {} backoff {} ns", self.id, now, self.nb, self.backoff);

        self.state = MacState::Backoff;
        self.state_pending = MacState::Backoff;

        Next::Continue
    }

    fn step_cts(&mut self, now: Ts) -> Result<Next, CoreError> {
        let sifs = self.config.sifs;
        let size = self.rx_size as usize;

        let h = CtsHeader{
            nav: sifs + self.airtime(size) + sifs + self.airtime(ACK_FRAME_LEN),
            priority_type: PriorityType::Disabled,
            node_allowed: self.dst,
        };
        self.send_control(now, self.dst, FrameType::Cts, h)?;

        let timeout = self.airtime(CTS_FRAME_LEN) + sifs + self.airtime(size) + self.config.propagation;

        self.state = MacState::CtsTimeout;

        Ok(self.suspend_until(now + timeout))
    }

    /// End of a receiver side exchange, return to the interrupted state
    fn step_resume(&mut self) -> Next {
        self.state = self.state_pending;

        if self.state != MacState::Idle {
            if let Some(h) = self.tx_header() {
                self.dst = h.dst;
            }
        }

        Next::Continue
    }

    fn step_data(&mut self, now: Ts, broadcast: bool) -> Result<Next, CoreError> {
        let mut p = match &self.tx_buffer {
            Some(p) => p.duplicate(),
            None => {
                self.state = MacState::Idle;
                return Ok(Next::Continue);
            }
        };

        let sifs = self.config.sifs;
        let nav = match broadcast {
            true => 0,
            false => sifs + self.airtime(ACK_FRAME_LEN),
        };
        DataHeader::set_nav(p.data_mut(), nav)?;

        let size = p.size();

        // Boost only while the channel is not already heavily contended
        let boost = p.priority == Priority::High
            && self.classifier.classify(&mut self.radio, now) == ChannelState::Low;

        let base = self.radio.power();
        if boost {
            debug!("Node {} boosting packet {} by {:.2} dB", self.id, p.id, self.config.boost_db());
            self.radio.set_power(base + self.config.boost_db());
            self.stats.boosted += 1;
        }

        debug!("Node {} send {} to {} at {} ({} bytes)", self.id, if broadcast { "broadcast" } else { "DATA" }, self.dst, now, size);

        let r = self.radio_transmit(now, p);
        if boost {
            self.radio.set_power(base);
        }
        r?;

        if broadcast {
            self.stats.broadcasts += 1;
            self.state = MacState::BroadDone;
            return Ok(self.suspend_until(now + self.airtime(size) + sifs));
        }

        self.stats.data_sent += 1;

        let timeout = self.airtime(size) + sifs + self.airtime(ACK_FRAME_LEN) + self.config.propagation;

        self.expect = Expect::Ack;
        self.state = MacState::Timeout;

        Ok(self.suspend_until(now + timeout))
    }

    fn step_ack(&mut self, now: Ts) -> Result<Next, CoreError> {
        let mut p = Packet::new(ACK_FRAME_LEN);
        CommonHeader{ src: self.id, dst: self.dst, kind: FrameType::Ack }.encode(p.data_mut());

        debug!("Node {} send ACK to {} at {}", self.id, self.dst, now);

        self.radio_transmit(now, p)?;

        self.state = MacState::Done;

        Ok(self.suspend_until(now + self.airtime(ACK_FRAME_LEN) + self.config.sifs))
    }
}
