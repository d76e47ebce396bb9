//! MOS 6526 / 8521 CIA emulation.
//!
//! The CIA contains:
//! - Two 16-bit interval timers (A & B), B optionally counting A underflows
//! - Time-of-Day clock (BCD, 1/10 s resolution) with alarm
//! - 8-bit serial shift register (output timing only)
//! - Interrupt control logic (old 6526: one cycle later than the 8521)
//! - Two 8-bit I/O ports (registers only, nothing is wired to them)
//!
//! The chip owns its event scheduler.  The host drives time with
//! [`Mos652x::run_until`] and accesses registers in between; an access is
//! taken to happen at the current half-cycle, normally PHI2.

pub mod interrupt;
pub mod serial;
pub mod timer;
pub mod tod;

use crate::config::CiaConfig;
use crate::event::{EventClock, EventScheduler, Phase};

use interrupt::{
    new_interrupt_source, CiaModel, InterruptSource, IrqSink, INTERRUPT_ALARM, INTERRUPT_SP,
    INTERRUPT_UNDERFLOW_A, INTERRUPT_UNDERFLOW_B,
};
use serial::{SerialPort, SerialSink};
use timer::{Timer, TimerId, UnderflowSink};
use tod::{AlarmSink, Tod};

// ── Register offsets (low 4 bits of address) ──────────────────

pub const PRA: u8 = 0;
pub const PRB: u8 = 1;
pub const DDRA: u8 = 2;
pub const DDRB: u8 = 3;
pub const TAL: u8 = 4;
pub const TAH: u8 = 5;
pub const TBL: u8 = 6;
pub const TBH: u8 = 7;
pub const TOD_TEN: u8 = 8;
pub const TOD_SEC: u8 = 9;
pub const TOD_MIN: u8 = 10;
pub const TOD_HR: u8 = 11;
pub const SDR: u8 = 12;
pub const ICR: u8 = 13;
pub const IDR: u8 = ICR;
pub const CRA: u8 = 14;
pub const CRB: u8 = 15;

// ── Events ────────────────────────────────────────────────────

/// Every kind of event the chip schedules.  One instance per kind can be
/// pending at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CiaEvent {
    /// Per-cycle timer tick.
    Timer(TimerId),
    /// Timer wake-up after skipped cycles.
    TimerSkip(TimerId),
    /// Timer B counts a timer A underflow (PHI2).
    CascadeB,
    /// Delayed interrupt of the old CIA.
    Interrupt,
    /// IDR acknowledge settles.
    UpdateIdr,
    SetIrq,
    ClearIrq,
    /// Power-line tick of the TOD divider.
    Tod,
    StartSdr,
    FlipCnt,
    FlipFake,
    SerialInterrupt,
}

impl CiaEvent {
    pub fn name(self) -> &'static str {
        match self {
            CiaEvent::Timer(TimerId::A) => "CIA Timer A",
            CiaEvent::Timer(TimerId::B) => "CIA Timer B",
            CiaEvent::TimerSkip(TimerId::A) => "Skip CIA clock decrement cycles A",
            CiaEvent::TimerSkip(TimerId::B) => "Skip CIA clock decrement cycles B",
            CiaEvent::CascadeB => "CIA B counts A",
            CiaEvent::Interrupt => "CIA Interrupt",
            CiaEvent::UpdateIdr => "CIA update idr",
            CiaEvent::SetIrq => "CIA set irq",
            CiaEvent::ClearIrq => "CIA clear irq",
            CiaEvent::Tod => "CIA Time of Day",
            CiaEvent::StartSdr => "CIA start SDR",
            CiaEvent::FlipCnt => "CIA flip CNT",
            CiaEvent::FlipFake => "CIA flip fake",
            CiaEvent::SerialInterrupt => "CIA serial port",
        }
    }
}

pub type CiaScheduler = EventScheduler<CiaEvent>;

// ── Sinks ─────────────────────────────────────────────────────

/// `IrqSink` that just records edges.
#[derive(Debug, Default, Clone)]
pub struct IrqLog {
    edges: Vec<bool>,
    level: bool,
}

impl IrqLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(&self) -> &[bool] {
        &self.edges
    }

    /// Current line level (low if nothing happened yet).
    pub fn level(&self) -> bool {
        self.level
    }

    /// Hand over the edges recorded so far.  The level is kept.
    pub fn take_edges(&mut self) -> Vec<bool> {
        std::mem::take(&mut self.edges)
    }
}

impl IrqSink for IrqLog {
    fn interrupt(&mut self, state: bool) {
        self.edges.push(state);
        self.level = state;
    }
}

impl AlarmSink for dyn InterruptSource {
    fn tod_alarm(&mut self, scheduler: &mut CiaScheduler) {
        self.trigger(scheduler, INTERRUPT_ALARM);
    }
}

impl SerialSink for dyn InterruptSource {
    fn serial_interrupt(&mut self, scheduler: &mut CiaScheduler) {
        self.trigger(scheduler, INTERRUPT_SP);
    }
}

/// Where timer underflows go: the interrupt logic, the serial port and
/// timer B's cascade input.
struct TimerLink<'a> {
    regs: &'a [u8; 0x10],
    interrupt: &'a mut dyn InterruptSource,
    serial_port: &'a mut SerialPort,
    timer_b_started: bool,
}

impl UnderflowSink for TimerLink<'_> {
    fn underflow(&mut self, scheduler: &mut CiaScheduler, timer: TimerId) {
        match timer {
            TimerId::A => {
                if self.regs[CRA as usize] & 0x40 != 0 {
                    self.serial_port.handle(scheduler);
                }

                self.interrupt.trigger(scheduler, INTERRUPT_UNDERFLOW_A);

                // Counted on PHI2 so timer B's own PHI1 tick of this cycle
                // has already run.
                if self.regs[CRB as usize] & 0x41 == 0x41 && self.timer_b_started {
                    scheduler.schedule(CiaEvent::CascadeB, 0, Phase::Phi2);
                }
            }
            TimerId::B => self.interrupt.trigger(scheduler, INTERRUPT_UNDERFLOW_B),
        }
    }
}

#[derive(Clone, Copy)]
enum TimerStep {
    Sync,
    Tick,
    Skip,
    Cascade,
}

// ── MOS652X ───────────────────────────────────────────────────

/// Complete CIA chip, signalling its IRQ output to `I`.
pub struct Mos652x<I: IrqSink> {
    regs: [u8; 0x10],
    scheduler: CiaScheduler,

    timer_a: Timer,
    timer_b: Timer,
    interrupt: Box<dyn InterruptSource>,
    tod: Tod,
    serial_port: SerialPort,

    irq: I,
    model: CiaModel,
}

impl<I: IrqSink> Mos652x<I> {
    /// A MOS6526 in power-on state at cycle 0.
    pub fn new(irq: I) -> Self {
        let mut cia = Self {
            regs: [0; 0x10],
            scheduler: CiaScheduler::new(),
            timer_a: Timer::new(TimerId::A),
            timer_b: Timer::new(TimerId::B),
            interrupt: new_interrupt_source(CiaModel::default()),
            tod: Tod::new(),
            serial_port: SerialPort::new(),
            irq,
            model: CiaModel::default(),
        };
        cia.reset();
        cia
    }

    pub fn with_config(irq: I, config: &CiaConfig) -> Self {
        let mut cia = Self::new(irq);
        cia.configure(config);
        cia
    }

    pub fn configure(&mut self, config: &CiaConfig) {
        self.set_model(config.model);
        self.set_day_of_time_rate(config.tod_rate);
    }

    /// Select chip model.  Interrupt state starts over; anything the old
    /// logic had in flight is dropped.
    pub fn set_model(&mut self, model: CiaModel) {
        for event in [
            CiaEvent::Interrupt,
            CiaEvent::UpdateIdr,
            CiaEvent::SetIrq,
            CiaEvent::ClearIrq,
        ] {
            self.scheduler.cancel(event);
        }

        self.interrupt = new_interrupt_source(model);
        self.serial_port.set_model4485(model == CiaModel::Mos6526W4485);
        self.model = model;
        log::debug!("CIA model set to {} ({:?})", self.interrupt.model_name(), model);
    }

    pub fn model(&self) -> CiaModel {
        self.model
    }

    /// CPU cycles per power-line tick.
    pub fn set_day_of_time_rate(&mut self, clock: u32) {
        self.tod.set_period(clock);
        log::debug!("CIA TOD rate: {clock} cycles per tick");
    }

    /// Reset to power-on state.  The clock keeps running; the IRQ line is
    /// released without notifying the host.
    pub fn reset(&mut self) {
        self.regs.fill(0);

        self.serial_port.reset(&mut self.scheduler);
        self.timer_a.reset(&mut self.scheduler);
        self.timer_b.reset(&mut self.scheduler);
        self.interrupt.reset(&mut self.scheduler);
        self.tod.reset(&mut self.scheduler);

        self.scheduler.cancel(CiaEvent::CascadeB);
        log::debug!("CIA reset at cycle {}", self.scheduler.cycle());
    }

    // ── Time ──────────────────────────────────────────────────

    /// Cycle count seen from `phase`.
    pub fn time(&self, phase: Phase) -> EventClock {
        self.scheduler.get_time(phase)
    }

    pub fn scheduler(&self) -> &CiaScheduler {
        &self.scheduler
    }

    /// Advance one half-cycle.
    pub fn clock(&mut self) {
        let until = self.scheduler.now() + 1;
        self.run_to(until);
    }

    /// Run every event up to and including `phase` of `cycle`.  Register
    /// accesses made afterwards happen in that half-cycle.
    pub fn run_until(&mut self, cycle: EventClock, phase: Phase) {
        let until = 2 * cycle + phase as EventClock;
        debug_assert!(until >= self.scheduler.now(), "cannot run backwards");
        if until >= self.scheduler.now() {
            self.run_to(until);
        }
    }

    /// Run `cycles` whole cycles.
    pub fn run_cycles(&mut self, cycles: u32) {
        let until = self.scheduler.now() + 2 * EventClock::from(cycles);
        self.run_to(until);
    }

    fn run_to(&mut self, until: EventClock) {
        while let Some(event) = self.scheduler.pop_due(until) {
            log::trace!(
                "cycle {} {:?}: {}",
                self.scheduler.cycle(),
                self.scheduler.phase(),
                event.name()
            );
            self.dispatch(event);
        }
        self.scheduler.advance_to(until);
    }

    fn dispatch(&mut self, event: CiaEvent) {
        match event {
            CiaEvent::Timer(id) => self.timer_step(id, TimerStep::Tick),
            CiaEvent::TimerSkip(id) => self.timer_step(id, TimerStep::Skip),
            CiaEvent::CascadeB => self.timer_step(TimerId::B, TimerStep::Cascade),
            CiaEvent::Interrupt => self.interrupt.interrupt_event(&mut self.scheduler),
            CiaEvent::UpdateIdr => self.interrupt.update_idr(),
            CiaEvent::SetIrq => self.interrupt.set_irq(&mut self.scheduler, &mut self.irq),
            CiaEvent::ClearIrq => self.interrupt.clear_irq(&self.scheduler, &mut self.irq),
            CiaEvent::Tod => {
                let cra = self.regs[CRA as usize];
                self.tod.event(&mut self.scheduler, &mut *self.interrupt, cra);
            }
            CiaEvent::StartSdr => self.serial_port.start_sdr_event(),
            CiaEvent::FlipCnt => self.serial_port.flip_cnt(&mut self.scheduler),
            CiaEvent::FlipFake => self.serial_port.flip_fake(&self.scheduler),
            CiaEvent::SerialInterrupt => self
                .serial_port
                .interrupt_event(&mut self.scheduler, &mut *self.interrupt),
        }
    }

    /// Run a timer operation that may underflow.
    fn timer_step(&mut self, id: TimerId, step: TimerStep) {
        let mut link = TimerLink {
            regs: &self.regs,
            interrupt: &mut *self.interrupt,
            serial_port: &mut self.serial_port,
            timer_b_started: self.timer_b.started(),
        };
        let timer = match id {
            TimerId::A => &mut self.timer_a,
            TimerId::B => &mut self.timer_b,
        };

        match step {
            TimerStep::Sync => timer.sync_with_cpu(&mut self.scheduler, &mut link),
            TimerStep::Tick => timer.event(&mut self.scheduler, &mut link),
            TimerStep::Skip => timer.cycle_skipping_event(&mut self.scheduler, &mut link),
            TimerStep::Cascade => timer.cascade(&mut self.scheduler, &mut link),
        }
    }

    // ── Register access ───────────────────────────────────────

    /// Read a CIA register.
    pub fn read(&mut self, addr: u8) -> u8 {
        let addr = addr & 0x0F;

        self.timer_step(TimerId::A, TimerStep::Sync);
        self.timer_a.wake_up_after_sync_with_cpu(&mut self.scheduler);
        self.timer_step(TimerId::B, TimerStep::Sync);
        self.timer_b.wake_up_after_sync_with_cpu(&mut self.scheduler);

        match addr {
            PRA => self.regs[PRA as usize] | !self.regs[DDRA as usize],
            PRB => self.adjust_data_port(self.regs[PRB as usize] | !self.regs[DDRB as usize]),
            TAL => self.timer_a.get_timer().to_le_bytes()[0],
            TAH => self.timer_a.get_timer().to_le_bytes()[1],
            TBL => self.timer_b.get_timer().to_le_bytes()[0],
            TBH => self.timer_b.get_timer().to_le_bytes()[1],
            TOD_TEN..=TOD_HR => self.tod.read(addr - TOD_TEN),
            IDR => self.interrupt.clear(&mut self.scheduler),
            CRA => (self.regs[CRA as usize] & 0xEE) | (self.timer_a.get_state() & 1) as u8,
            CRB => (self.regs[CRB as usize] & 0xEE) | (self.timer_b.get_state() & 1) as u8,
            _ => self.regs[addr as usize],
        }
    }

    /// What `read` would return, without acknowledging interrupts, moving
    /// the TOD latch or syncing the timers.
    pub fn peek(&self, addr: u8) -> u8 {
        let addr = addr & 0x0F;
        match addr {
            PRA => self.regs[PRA as usize] | !self.regs[DDRA as usize],
            PRB => self.adjust_data_port(self.regs[PRB as usize] | !self.regs[DDRB as usize]),
            TAL => self.timer_a.peek_timer(&self.scheduler).to_le_bytes()[0],
            TAH => self.timer_a.peek_timer(&self.scheduler).to_le_bytes()[1],
            TBL => self.timer_b.peek_timer(&self.scheduler).to_le_bytes()[0],
            TBH => self.timer_b.peek_timer(&self.scheduler).to_le_bytes()[1],
            TOD_TEN..=TOD_HR => self.tod.peek(addr - TOD_TEN),
            IDR => self.interrupt.state().idr(),
            CRA => (self.regs[CRA as usize] & 0xEE) | (self.timer_a.get_state() & 1) as u8,
            CRB => (self.regs[CRB as usize] & 0xEE) | (self.timer_b.get_state() & 1) as u8,
            _ => self.regs[addr as usize],
        }
    }

    /// Write a CIA register.
    pub fn write(&mut self, addr: u8, data: u8) {
        let addr = addr & 0x0F;

        self.timer_step(TimerId::A, TimerStep::Sync);
        self.timer_step(TimerId::B, TimerStep::Sync);

        let old = self.regs[addr as usize];
        self.regs[addr as usize] = data;

        match addr {
            TAL => self.timer_a.latch_lo(data),
            TAH => self.timer_a.latch_hi(data),
            TBL => self.timer_b.latch_lo(data),
            TBH => self.timer_b.latch_hi(data),
            TOD_TEN..=TOD_HR => {
                let crb = self.regs[CRB as usize];
                self.tod
                    .write(&mut self.scheduler, &mut *self.interrupt, addr - TOD_TEN, data, crb);
            }
            SDR => self.serial_port.start_sdr(&mut self.scheduler),
            ICR => self.interrupt.set(&mut self.scheduler, data),
            CRA => {
                if (data ^ old) & 0x40 != 0 {
                    self.serial_port
                        .switch_serial_direction(&mut self.scheduler, data & 0x40 == 0);
                }
                if data & 1 != 0 && old & 1 == 0 {
                    // Reset the underflow flip-flop for the data port
                    self.timer_a.set_pb_toggle(true);
                }
                self.timer_a.set_control_register(data);
            }
            CRB => {
                if data & 1 != 0 && old & 1 == 0 {
                    self.timer_b.set_pb_toggle(true);
                }
                // Counting timer A underflows also takes B off PHI2.
                self.timer_b.set_control_register(data | ((data & 0x40) >> 1));
            }
            _ => {}
        }

        self.timer_a.wake_up_after_sync_with_cpu(&mut self.scheduler);
        self.timer_b.wake_up_after_sync_with_cpu(&mut self.scheduler);
    }

    /// PB6/PB7 show the timer outputs when CRA/CRB bit 1 is set.
    fn adjust_data_port(&self, mut data: u8) -> u8 {
        if self.regs[CRA as usize] & 0x02 != 0 {
            data &= 0xBF;
            if self.timer_a.get_pb(self.regs[CRA as usize]) {
                data |= 0x40;
            }
        }
        if self.regs[CRB as usize] & 0x02 != 0 {
            data &= 0x7F;
            if self.timer_b.get_pb(self.regs[CRB as usize]) {
                data |= 0x80;
            }
        }
        data
    }

    // ── IRQ line ──────────────────────────────────────────────

    pub fn irq(&self) -> &I {
        &self.irq
    }

    pub fn irq_mut(&mut self) -> &mut I {
        &mut self.irq
    }

    /// Level the chip drives on its IRQ output.
    pub fn irq_asserted(&self) -> bool {
        self.interrupt.state().asserted()
    }
}
