//! CIA serial port (SDR).
//!
//! Only the output timing is modelled: a byte written to SDR is shifted out
//! on CNT, which toggles on each timer A underflow.  After eight bits the
//! SP interrupt fires.  The shifted data itself is not emulated.

use crate::event::{EventClock, Phase};

use super::{CiaEvent, CiaScheduler};

/// CNT toggles per byte (two per bit).
const EDGES_PER_BYTE: u8 = 16;

/// Receives the "byte sent" interrupt.
pub trait SerialSink {
    fn serial_interrupt(&mut self, scheduler: &mut CiaScheduler);
}

pub struct SerialPort {
    /// Remaining CNT edges of the byte in flight.
    count: u8,
    /// CNT output level.
    cnt: u8,
    /// One bit of CNT per elapsed cycle, newest in bit 0.
    cnt_history: u8,
    /// A byte is waiting in SDR.
    loaded: bool,
    /// Another byte was written while one was being sent.
    pending: bool,
    /// Switching back to output must still finish the aborted byte.
    force_finish: bool,
    /// MOS6526 variant with the 4485 serial port quirk.
    model4485: bool,
    /// PHI1 time of the last history update.
    last_sync: EventClock,
}

impl SerialPort {
    pub fn new() -> Self {
        Self {
            count: 0,
            cnt: 1,
            cnt_history: 0,
            loaded: false,
            pending: false,
            force_finish: false,
            model4485: false,
            last_sync: 0,
        }
    }

    pub fn reset(&mut self, scheduler: &mut CiaScheduler) {
        self.count = 0;
        self.cnt = 1;
        self.cnt_history = 0;
        self.loaded = false;
        self.pending = false;
        self.force_finish = false;
        self.last_sync = scheduler.get_time(Phase::Phi1);

        for event in [
            CiaEvent::StartSdr,
            CiaEvent::FlipCnt,
            CiaEvent::FlipFake,
            CiaEvent::SerialInterrupt,
        ] {
            scheduler.cancel(event);
        }
    }

    pub fn set_model4485(&mut self, is_4485: bool) {
        self.model4485 = is_4485;
    }

    /// Current CNT level.
    pub fn cnt(&self) -> bool {
        self.cnt != 0
    }

    /// A byte is shifting out.
    pub fn busy(&self) -> bool {
        self.count != 0
    }

    fn sync_cnt_history(&mut self, scheduler: &CiaScheduler) {
        let time = scheduler.get_time(Phase::Phi1);
        let clocks = (time - self.last_sync).clamp(0, 8);
        self.last_sync = time;

        for _ in 0..clocks {
            self.cnt_history = (self.cnt_history << 1) | self.cnt;
        }
    }

    /// SDR write.  The byte reaches the shift register one cycle later.
    pub fn start_sdr(&mut self, scheduler: &mut CiaScheduler) {
        scheduler.schedule_cycles(CiaEvent::StartSdr, 1);
    }

    /// "Start SDR" event.
    pub fn start_sdr_event(&mut self) {
        if self.loaded {
            self.pending = true;
        } else {
            self.loaded = true;
        }
    }

    /// CRA bit 6 changed.  `input` is the new direction.
    pub fn switch_serial_direction(&mut self, scheduler: &mut CiaScheduler, input: bool) {
        self.sync_cnt_history(scheduler);

        if input {
            // CNT must have been high long enough for the last edge to count.
            let cnt_val = if self.model4485 { 0x7 } else { 0x6 };
            self.force_finish = (self.cnt_history & cnt_val) != cnt_val;

            if !self.force_finish
                && self.count != 2
                && scheduler.remaining(CiaEvent::FlipCnt) == Some(1)
            {
                self.force_finish = true;
            }

            self.cnt = 1;
            self.cnt_history |= 1;
            scheduler.cancel(CiaEvent::FlipCnt);
            scheduler.cancel(CiaEvent::FlipFake);
            self.count = 0;
            self.loaded = false;
            self.pending = false;
        } else if self.force_finish {
            scheduler.schedule_cycles(CiaEvent::SerialInterrupt, 2);
            self.force_finish = false;
        }
    }

    /// Timer A underflow while in output mode.
    pub fn handle(&mut self, scheduler: &mut CiaScheduler) {
        if self.loaded && self.count == 0 {
            self.count = EDGES_PER_BYTE;
        }

        if self.count == 0 {
            return;
        }

        if scheduler.is_pending(CiaEvent::FlipFake) || scheduler.is_pending(CiaEvent::FlipCnt) {
            scheduler.schedule_cycles(CiaEvent::FlipFake, 2);
        } else {
            scheduler.schedule_cycles(CiaEvent::FlipCnt, 2);
        }
    }

    /// "Flip CNT" event: one edge of the byte in flight.
    pub fn flip_cnt(&mut self, scheduler: &mut CiaScheduler) {
        if self.count == 0 {
            return;
        }

        self.sync_cnt_history(scheduler);
        self.cnt ^= 1;

        self.count -= 1;
        if self.count == 1 {
            scheduler.schedule_cycles(CiaEvent::SerialInterrupt, 2);
            self.loaded = self.pending;
            self.pending = false;
        }
    }

    /// "Flip fake" event: CNT toggles without shifting.
    pub fn flip_fake(&mut self, scheduler: &CiaScheduler) {
        self.sync_cnt_history(scheduler);
        self.cnt ^= 1;
    }

    /// "Serial interrupt" event.
    pub fn interrupt_event<S: SerialSink + ?Sized>(&mut self, scheduler: &mut CiaScheduler, sink: &mut S) {
        sink.serial_interrupt(scheduler);
    }
}

impl Default for SerialPort {
    fn default() -> Self {
        Self::new()
    }
}
