//! CIA interval timer.
//!
//! Each CIA has two 16-bit timers (A and B).  Timer A always counts
//! PHI2 pulses.  Timer B can count PHI2 pulses or Timer-A underflows.
//!
//! The control-register state machine follows the VICE `ciatimer.c`
//! implementation.  While the counter runs undisturbed the per-cycle event
//! is replaced by a single wake-up shortly before the underflow; every CPU
//! access first catches the skipped cycles up (`sync_with_cpu`).

use crate::event::{EventClock, Phase};

use super::{CiaEvent, CiaScheduler};

/// Control-register / state bits.
pub const CIAT_CR_START: u32 = 0x01;
pub const CIAT_STEP: u32 = 0x04;
pub const CIAT_CR_ONESHOT: u32 = 0x08;
pub const CIAT_CR_FLOAD: u32 = 0x10;
pub const CIAT_PHI2IN: u32 = 0x20;
pub const CIAT_CR_MASK: u32 = CIAT_CR_START | CIAT_CR_ONESHOT | CIAT_CR_FLOAD | CIAT_PHI2IN;

pub const CIAT_COUNT2: u32 = 0x100;
pub const CIAT_COUNT3: u32 = 0x200;
pub const CIAT_ONESHOT0: u32 = 0x08 << 8;
pub const CIAT_ONESHOT: u32 = 0x08 << 16;
pub const CIAT_LOAD1: u32 = 0x10 << 8;
pub const CIAT_LOAD: u32 = 0x10 << 16;
pub const CIAT_OUT: u32 = 0x8000_0000;

/// Which of the two timers an instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    A,
    B,
}

/// Receives timer underflows.
pub trait UnderflowSink {
    /// Called exactly once per zero crossing, after the PB6/PB7 flip-flop
    /// has been updated and before the counter reloads.
    fn underflow(&mut self, scheduler: &mut CiaScheduler, timer: TimerId);
}

pub struct Timer {
    id: TimerId,
    /// Current counter value.
    timer: u16,
    /// Start value (latch).
    latch: u16,
    /// CRA/CRB control bits plus the pipeline stages.
    state: u32,
    /// PB6/PB7 flip-flop signalling underflows.
    pb_toggle: bool,
    /// Copy of regs[CRA/CRB].
    last_control_value: u8,
    /// -1 when stopped, 0 while ticking every cycle, otherwise the first
    /// PHI1 cycle that was skipped.
    pause_time: EventClock,
}

impl Timer {
    pub fn new(id: TimerId) -> Self {
        Self {
            id,
            timer: 0xFFFF,
            latch: 0xFFFF,
            state: 0,
            pb_toggle: false,
            last_control_value: 0,
            pause_time: 0,
        }
    }

    fn tick_event(&self) -> CiaEvent {
        CiaEvent::Timer(self.id)
    }

    fn skip_event(&self) -> CiaEvent {
        CiaEvent::TimerSkip(self.id)
    }

    pub fn reset(&mut self, scheduler: &mut CiaScheduler) {
        scheduler.cancel(self.tick_event());
        scheduler.cancel(self.skip_event());
        self.timer = 0xFFFF;
        self.latch = 0xFFFF;
        self.pb_toggle = false;
        self.state = 0;
        self.last_control_value = 0;
        self.pause_time = 0;
        scheduler.schedule(self.tick_event(), 1, Phase::Phi1);
    }

    // ── Register access ───────────────────────────────────────

    pub fn set_control_register(&mut self, cr: u8) {
        self.state &= !CIAT_CR_MASK;
        self.state |= (u32::from(cr) & CIAT_CR_MASK) ^ CIAT_PHI2IN;
        self.last_control_value = cr;
    }

    pub fn latch_lo(&mut self, data: u8) {
        self.latch = (self.latch & 0xFF00) | u16::from(data);
        if self.state & CIAT_LOAD != 0 {
            self.timer = self.latch;
        }
    }

    pub fn latch_hi(&mut self, data: u8) {
        self.latch = (self.latch & 0x00FF) | (u16::from(data) << 8);
        if self.state & CIAT_LOAD != 0 {
            self.timer = self.latch;
        } else if self.state & CIAT_CR_START == 0 {
            // A stopped timer reloads on the next clock.
            self.state |= CIAT_LOAD1;
        }
    }

    pub fn set_pb_toggle(&mut self, state: bool) {
        self.pb_toggle = state;
    }

    pub fn get_state(&self) -> u32 {
        self.state
    }

    pub fn get_timer(&self) -> u16 {
        self.timer
    }

    /// Counter value a register read would return now, without syncing.
    pub fn peek_timer(&self, scheduler: &CiaScheduler) -> u16 {
        if self.pause_time > 0 {
            let elapsed = scheduler.get_time(Phase::Phi2) - self.pause_time;
            if elapsed >= 0 {
                return self.timer.wrapping_sub(elapsed as u16).wrapping_sub(1);
            }
        }
        self.timer
    }

    pub fn latch(&self) -> u16 {
        self.latch
    }

    /// PB6/PB7 output: toggle flip-flop or one-cycle pulse, per CR bit 2.
    pub fn get_pb(&self, reg: u8) -> bool {
        if reg & 0x04 != 0 {
            self.pb_toggle
        } else {
            self.state & CIAT_OUT != 0
        }
    }

    pub fn started(&self) -> bool {
        self.state & CIAT_CR_START != 0
    }

    // ── CPU synchronisation ───────────────────────────────────

    /// Bring the counter up to date and stop the event ticking, so a
    /// register access sees (and changes) the state of this very cycle.
    pub fn sync_with_cpu<S: UnderflowSink + ?Sized>(
        &mut self,
        scheduler: &mut CiaScheduler,
        sink: &mut S,
    ) {
        if self.pause_time > 0 {
            scheduler.cancel(self.skip_event());
            let elapsed = scheduler.get_time(Phase::Phi2) - self.pause_time;

            // The timer may have planned to sleep from the next cycle on;
            // nothing was skipped yet in that case.
            if elapsed >= 0 {
                self.timer = self.timer.wrapping_sub(elapsed as u16);
                self.clock(scheduler, sink);
            }
        }

        if self.pause_time == 0 {
            scheduler.cancel(self.tick_event());
        }

        self.pause_time = -1;
    }

    /// Counterpart of `sync_with_cpu`: restart ticking on the next PHI1.
    /// Must not clock the timer itself.
    pub fn wake_up_after_sync_with_cpu(&mut self, scheduler: &mut CiaScheduler) {
        self.pause_time = 0;
        scheduler.schedule(self.tick_event(), 0, Phase::Phi1);
    }

    /// Count one timer-A underflow (timer B in cascade mode).
    ///
    /// Modelled as if the CPU wrote the control register, so it takes the
    /// same synchronisation path as a real write.
    pub fn cascade<S: UnderflowSink + ?Sized>(&mut self, scheduler: &mut CiaScheduler, sink: &mut S) {
        self.sync_with_cpu(scheduler, sink);
        self.state |= CIAT_STEP;
        self.wake_up_after_sync_with_cpu(scheduler);
    }

    // ── Events ────────────────────────────────────────────────

    /// Per-cycle tick.
    pub fn event<S: UnderflowSink + ?Sized>(&mut self, scheduler: &mut CiaScheduler, sink: &mut S) {
        self.clock(scheduler, sink);
        self.reschedule(scheduler);
    }

    /// Wake-up after a run of skipped cycles.
    pub fn cycle_skipping_event<S: UnderflowSink + ?Sized>(
        &mut self,
        scheduler: &mut CiaScheduler,
        sink: &mut S,
    ) {
        let elapsed = scheduler.get_time(Phase::Phi1) - self.pause_time;
        debug_assert!(elapsed >= 0 && elapsed < 0x10000);
        self.pause_time = 0;
        self.timer = self.timer.wrapping_sub(elapsed as u16);
        self.event(scheduler, sink);
    }

    /// One state transition of the timer.
    fn clock<S: UnderflowSink + ?Sized>(&mut self, scheduler: &mut CiaScheduler, sink: &mut S) {
        if self.state & CIAT_COUNT3 != 0 {
            debug_assert!(self.timer != 0, "counter decremented past zero");
            self.timer = self.timer.wrapping_sub(1);
        }

        let mut adj = self.state & (CIAT_CR_START | CIAT_CR_ONESHOT | CIAT_PHI2IN);

        if self.state & (CIAT_CR_START | CIAT_PHI2IN) == (CIAT_CR_START | CIAT_PHI2IN) {
            adj |= CIAT_COUNT2;
        }
        if self.state & CIAT_COUNT2 != 0
            || self.state & (CIAT_STEP | CIAT_CR_START) == (CIAT_STEP | CIAT_CR_START)
        {
            adj |= CIAT_COUNT3;
        }

        // CR_FLOAD → LOAD1, CR_ONESHOT → ONESHOT0, LOAD1 → LOAD, ONESHOT0 → ONESHOT
        adj |= (self.state & (CIAT_CR_FLOAD | CIAT_CR_ONESHOT | CIAT_LOAD1 | CIAT_ONESHOT0)) << 8;
        self.state = adj;

        if self.timer == 0 && self.state & CIAT_COUNT3 != 0 {
            self.state |= CIAT_LOAD | CIAT_OUT;

            if self.state & (CIAT_ONESHOT | CIAT_ONESHOT0) != 0 {
                self.state &= !(CIAT_CR_START | CIAT_COUNT2);
            }

            // CR bits 1+2 set: PB6/PB7 toggles on every underflow.
            let toggle = self.last_control_value & 0x06 == 0x06;
            self.pb_toggle = toggle && !self.pb_toggle;

            sink.underflow(scheduler, self.id);
        }

        if self.state & CIAT_LOAD != 0 {
            self.timer = self.latch;
            self.state &= !CIAT_COUNT3;
        }
    }

    /// Pick the next wake-up: every cycle while flags are in flight, one
    /// skip event for steady counting, nothing when stopped.
    fn reschedule(&mut self, scheduler: &mut CiaScheduler) {
        let unwanted = CIAT_OUT | CIAT_CR_FLOAD | CIAT_LOAD1 | CIAT_LOAD;
        if self.state & unwanted != 0 {
            scheduler.schedule_cycles(self.tick_event(), 1);
            return;
        }

        if self.state & CIAT_COUNT3 != 0 {
            let wanted = CIAT_CR_START | CIAT_PHI2IN | CIAT_COUNT2 | CIAT_COUNT3;
            if self.timer > 2 && self.state & wanted == wanted {
                // This cycle already ran, so skipping starts with the next one.
                self.pause_time = scheduler.get_time(Phase::Phi1) + 1;
                scheduler.schedule_cycles(self.skip_event(), u32::from(self.timer) - 1);
                return;
            }

            scheduler.schedule_cycles(self.tick_event(), 1);
        } else {
            let running = CIAT_CR_START | CIAT_PHI2IN;
            let stepping = CIAT_CR_START | CIAT_STEP;

            if self.state & running == running || self.state & stepping == stepping {
                scheduler.schedule_cycles(self.tick_event(), 1);
                return;
            }

            self.pause_time = -1;
        }
    }
}
