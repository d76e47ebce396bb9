//! CIA Time-of-Day (TOD) clock.
//!
//! BCD counter: tenths / seconds / minutes / hours (with AM/PM).
//! Driven by the 50 Hz or 60 Hz power-line signal, which is derived from
//! the system clock by a self-rescheduling event with a 25.7 fixed-point
//! period.

use crate::event::{EventClock, Phase};

use super::{CiaEvent, CiaScheduler};

const TENTHS: usize = 0;
const SECONDS: usize = 1;
const MINUTES: usize = 2;
const HOURS: usize = 3;

/// Default divider: PAL CPU cycles per 50 Hz tick.
const DEFAULT_RATE: u32 = 19_704;

/// Receives the alarm match.
pub trait AlarmSink {
    fn tod_alarm(&mut self, scheduler: &mut CiaScheduler);
}

pub struct Tod {
    clock: [u8; 4],
    latch: [u8; 4],
    alarm: [u8; 4],

    is_latched: bool,
    is_stopped: bool,

    /// Fractional cycle accumulator (fixed-point 25.7).
    cycles: EventClock,
    /// CPU cycles per power-line tick, ×128.
    period: EventClock,

    /// Power-line ticks since the last tenth.
    tick_counter: u8,
}

impl Tod {
    pub fn new() -> Self {
        Self {
            clock: [0, 0, 0, 1], // hours = 1
            latch: [0, 0, 0, 1],
            alarm: [0; 4],
            is_latched: false,
            is_stopped: true,
            cycles: 0,
            period: EventClock::from(DEFAULT_RATE) << 7,
            tick_counter: 0,
        }
    }

    /// Power-on state.  The clock stays stopped until tenths is written.
    /// The divider period survives.
    pub fn reset(&mut self, scheduler: &mut CiaScheduler) {
        self.cycles = 0;
        self.tick_counter = 0;
        self.clock = [0, 0, 0, 1];
        self.latch = self.clock;
        self.alarm = [0; 4];
        self.is_latched = false;
        self.is_stopped = true;

        scheduler.schedule(CiaEvent::Tod, 0, Phase::Phi1);
    }

    /// `clock` is CPU cycles per power-line tick (fractional rates are
    /// approximated by the caller).
    pub fn set_period(&mut self, clock: u32) {
        self.period = EventClock::from(clock) << 7;
    }

    pub fn is_stopped(&self) -> bool {
        self.is_stopped
    }

    /// Clock bytes without touching the latch.
    pub fn peek(&self, reg: u8) -> u8 {
        let r = usize::from(reg & 3);
        if self.is_latched {
            self.latch[r]
        } else {
            self.clock[r]
        }
    }

    /// Read a TOD register (0 = tenths … 3 = hours).
    ///
    /// Reading hours freezes the visible value until tenths is read, so a
    /// multi-byte read is consistent.
    pub fn read(&mut self, reg: u8) -> u8 {
        let r = usize::from(reg & 3);
        if !self.is_latched {
            self.latch = self.clock;
        }
        if r == TENTHS {
            self.is_latched = false;
        } else if r == HOURS {
            self.is_latched = true;
        }
        self.latch[r]
    }

    /// Write a TOD register.  CRB bit 7 selects alarm vs clock write.
    pub fn write<S: AlarmSink + ?Sized>(
        &mut self,
        scheduler: &mut CiaScheduler,
        sink: &mut S,
        reg: u8,
        mut data: u8,
        crb: u8,
    ) {
        let r = usize::from(reg & 3);
        match r {
            TENTHS => data &= 0x0F,
            SECONDS | MINUTES => data &= 0x7F,
            _ => {
                data &= 0x9F;
                // Flip AM/PM at hour 12 when writing time
                if (data & 0x1F) == 0x12 && crb & 0x80 == 0 {
                    data ^= 0x80;
                }
            }
        }

        let target = if crb & 0x80 != 0 {
            &mut self.alarm
        } else {
            if r == TENTHS {
                if self.is_stopped {
                    self.tick_counter = 0;
                    self.is_stopped = false;
                }
            } else if r == HOURS {
                self.is_stopped = true;
            }
            &mut self.clock
        };

        if target[r] != data {
            target[r] = data;
            self.check_alarm(scheduler, sink);
        }
    }

    /// Divider event.  `cra` bit 7 selects 50 Hz (5 ticks per tenth)
    /// instead of 60 Hz (6 ticks).
    pub fn event<S: AlarmSink + ?Sized>(&mut self, scheduler: &mut CiaScheduler, sink: &mut S, cra: u8) {
        self.cycles += self.period;
        let delay = u32::try_from(self.cycles >> 7).unwrap_or(u32::MAX);
        scheduler.schedule_cycles(CiaEvent::Tod, delay.max(1));
        self.cycles &= 0x7F;

        if self.is_stopped {
            return;
        }

        self.tick_counter = (self.tick_counter + 1) & 7;
        let ticks_per_tenth = if cra & 0x80 != 0 { 5 } else { 6 };
        if self.tick_counter == ticks_per_tenth {
            self.tick_counter = 0;
            self.update_counters(scheduler, sink);
        }
    }

    fn update_counters<S: AlarmSink + ?Sized>(&mut self, scheduler: &mut CiaScheduler, sink: &mut S) {
        let was_valid = is_valid_time(&self.clock);

        let mut ts = self.clock[TENTHS] & 0x0F;
        let mut sl = self.clock[SECONDS] & 0x0F;
        let mut sh = (self.clock[SECONDS] >> 4) & 0x0F;
        let mut ml = self.clock[MINUTES] & 0x0F;
        let mut mh = (self.clock[MINUTES] >> 4) & 0x0F;
        let mut hl = self.clock[HOURS] & 0x0F;
        let mut hh = (self.clock[HOURS] >> 4) & 0x01;
        let mut pm = self.clock[HOURS] & 0x80;

        ts = (ts + 1) & 0x0F;
        if ts == 10 {
            ts = 0;
            sl = (sl + 1) & 0x0F;
            if sl == 10 {
                sl = 0;
                sh = (sh + 1) & 0x07;
                if sh == 6 {
                    sh = 0;
                    ml = (ml + 1) & 0x0F;
                    if ml == 10 {
                        ml = 0;
                        mh = (mh + 1) & 0x07;
                        if mh == 6 {
                            mh = 0;
                            hl = (hl + 1) & 0x0F;
                            if hh != 0 {
                                // 11 → 12 flips AM/PM, 12 → 1 keeps it
                                if hl == 2 {
                                    pm ^= 0x80;
                                }
                                if hl == 3 {
                                    hl = 1;
                                    hh = 0;
                                }
                            } else if hl == 10 {
                                hl = 0;
                                hh = 1;
                            }
                        }
                    }
                }
            }
        }

        self.clock[TENTHS] = ts;
        self.clock[SECONDS] = sl | ((sh & 0x07) << 4);
        self.clock[MINUTES] = ml | ((mh & 0x07) << 4);
        self.clock[HOURS] = hl | (hh << 4) | pm;

        // Garbage written by the CPU counts on as garbage; a real time stays real.
        debug_assert!(
            !was_valid || is_valid_time(&self.clock),
            "TOD left BCD range: {:02X?}",
            self.clock
        );

        self.check_alarm(scheduler, sink);
    }

    fn check_alarm<S: AlarmSink + ?Sized>(&self, scheduler: &mut CiaScheduler, sink: &mut S) {
        if self.alarm == self.clock {
            sink.tod_alarm(scheduler);
        }
    }
}

/// BCD digits in range and hours within 1..=12.
fn is_valid_time(clock: &[u8; 4]) -> bool {
    let bcd = |v: u8, max_high: u8| (v & 0x0F) <= 9 && (v >> 4) <= max_high;
    let hours = clock[HOURS] & 0x1F;
    clock[TENTHS] <= 9
        && bcd(clock[SECONDS], 5)
        && bcd(clock[MINUTES], 5)
        && bcd(hours, 1)
        && (0x01..=0x12).contains(&hours)
}

impl Default for Tod {
    fn default() -> Self {
        Self::new()
    }
}
