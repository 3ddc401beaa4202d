//! Sink mediated contention sub-cycle
//!
//! The sink polls one priority class at a time with a contention-begin
//! broadcast. Peers holding a packet of the polled class answer after a
//! random number of slots drawn from the class window, the high window is
//! shorter so high priority answers win. The sink grants the first answer
//! with a contention-end naming the winner, which then sends its DATA.

use log::{trace, debug};

use rand_core::RngCore;

use crate::{Ts, Radio, BROADCAST_ADDR};
use crate::error::{CoreError, Diagnostic};
use crate::packet::Priority;
use crate::timer::Timer;

use super::core::{Core, MacState, Expect, Next};
use super::frame::*;

impl <R, T, G> Core<R, T, G>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Time the sink waits for answers to a poll of `class`
    fn poll_window(&self, class: Priority) -> Ts {
        let control = self.airtime(CTS_FRAME_LEN);
        let slots = self.config.window(class) as Ts * self.config.contention.slot;

        control + self.config.sifs + slots + control + self.config.propagation
    }

    /// Sink: open a polling round for the current class
    pub(crate) fn step_contention_begin(&mut self, now: Ts) -> Result<Next, CoreError> {
        // Own traffic goes through plain CSMA
        if !self.tx_queue.is_empty() {
            self.state = MacState::Idle;
            return Ok(Next::Continue);
        }

        let window = self.poll_window(self.polled);

        let h = CtsHeader{
            nav: window,
            priority_type: self.polled.into(),
            node_allowed: BROADCAST_ADDR,
        };
        self.send_control(now, BROADCAST_ADDR, FrameType::ContentionBegin, h)?;

        self.stats.contention_rounds += 1;
        self.state = MacState::ContentionWaitingData;

        Ok(self.suspend_until(now + window))
    }

    /// Sink: poll window expired. Peers: waiting for a poll.
    pub(crate) fn step_contention_wait(&mut self, now: Ts) -> Next {
        if !self.is_sink() {
            return self.suspend();
        }

        match self.polled {
            Priority::High => {
                trace!("Node {} no high priority answers, polling low", self.id);
                self.polled = Priority::Low;
                self.state = MacState::ContentionBegin;
                Next::Continue
            },
            Priority::Low => {
                trace!("Node {} polling round empty", self.id);
                self.polled = Priority::High;
                self.state = MacState::Idle;
                self.suspend_until(now + self.config.contention.round_period)
            },
        }
    }

    /// Sink: grant the winner. Peers: answer the poll.
    pub(crate) fn step_contention(&mut self, now: Ts) -> Result<Next, CoreError> {
        let sifs = self.config.sifs;
        let control = self.airtime(CTS_FRAME_LEN);

        if self.is_sink() {
            let nav = self.pending_nav.saturating_sub(sifs + control);

            let h = CtsHeader{
                nav,
                priority_type: PriorityType::Data,
                node_allowed: self.dst,
            };
            self.send_control(now, BROADCAST_ADDR, FrameType::ContentionEnd, h)?;

            self.stats.grants += 1;
            self.polled = Priority::High;
            self.state = MacState::CtsTimeout;
            self.state_pending = MacState::ContentionBegin;

            return Ok(self.suspend_until(now + control + nav + self.config.propagation));
        }

        let (size, priority) = match &self.tx_buffer {
            Some(p) => (p.size(), p.priority),
            None => {
                self.state = MacState::Idle;
                return Ok(Next::Continue);
            }
        };

        let h = CtsHeader{
            nav: sifs + control + sifs + self.airtime(size) + sifs + self.airtime(ACK_FRAME_LEN),
            priority_type: priority.into(),
            node_allowed: self.id,
        };
        let sink = self.config.contention.sink;
        self.send_control(now, sink, FrameType::Contention, h)?;

        self.dst = sink;
        self.expect = Expect::Grant;
        self.state = MacState::Timeout;

        Ok(self.suspend_until(now + control + sifs + control + self.config.propagation))
    }

    pub(crate) fn handle_contention_begin(&mut self, now: Ts, c: CommonHeader, h: CtsHeader) {
        if self.state != MacState::ContentionWaitingData || !self.is_contention_peer() {
            return;
        }

        let class = match (h.priority_type.class(), &self.tx_buffer) {
            (Some(class), Some(p)) if class == p.priority => class,
            _ => {
                trace!("Node {} ignoring poll for {}", self.id, h.priority_type);
                return;
            }
        };

        let window = self.config.window(class).max(1);
        let delay = (self.rng.next_u32() % window) as Ts * self.config.contention.slot;

        debug!("Node {} answering {} poll from {} in {} ns", self.id, class, c.src, delay);

        self.state = MacState::Contention;
        self.suspend_until(now + self.config.sifs + delay);
    }

    pub(crate) fn handle_contention(&mut self, now: Ts, c: CommonHeader, h: CtsHeader) {
        if self.is_sink() {
            if c.dst != self.id || self.state != MacState::ContentionWaitingData {
                self.diagnostic(Diagnostic::UnexpectedFrame);
                return;
            }

            if h.priority_type.class() != Some(self.polled) {
                self.diagnostic(Diagnostic::UnexpectedFrame);
                return;
            }

            debug!("Node {} contention won by {}", self.id, c.src);

            self.dst = c.src;
            self.pending_nav = h.nav;
            self.state = MacState::Contention;
            self.suspend_until(now + self.config.sifs);

            return;
        }

        // A rival answered first
        self.update_nav(now, h.nav);

        if self.state == MacState::Contention {
            trace!("Node {} overheard rival {}, backing off", self.id, c.src);
            self.state = MacState::ContentionWaitingData;
            self.suspend();
        }
    }

    pub(crate) fn handle_contention_end(&mut self, now: Ts, c: CommonHeader, h: CtsHeader) -> Result<(), CoreError> {
        if !self.is_contention_peer() {
            return Ok(());
        }

        let waiting = matches!(self.state, MacState::Contention | MacState::ContentionWaitingData)
            || (self.state == MacState::Timeout && self.expect == Expect::Grant);

        if h.node_allowed != self.id {
            self.update_nav(now, h.nav);

            if waiting && self.state != MacState::ContentionWaitingData {
                trace!("Node {} lost contention to {}", self.id, h.node_allowed);
                self.expect = Expect::None;
                self.state = MacState::ContentionWaitingData;
                self.suspend();
            }

            return Ok(());
        }

        if self.state != MacState::Timeout || self.expect != Expect::Grant {
            self.diagnostic(Diagnostic::UnexpectedFrame);
            return Ok(());
        }

        let header = match self.tx_header() {
            Some(h) => h,
            None => {
                self.state = MacState::Idle;
                return self.run(now);
            }
        };

        debug!("Node {} granted by {} at {}", self.id, c.src, now);

        self.expect = Expect::None;
        self.dst = header.dst;
        self.state_pending = MacState::Idle;
        self.state = match header.dst {
            BROADCAST_ADDR => MacState::Broadcast,
            _ => MacState::Data,
        };
        self.suspend_until(now + self.config.sifs);

        Ok(())
    }
}
