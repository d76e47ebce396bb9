//! CIA interrupt control logic.
//!
//! Old CIA (MOS 6526): the IRQ line rises two cycles after the source.
//! New CIA (MOS 8521): one cycle after the source.
//!
//! Reading the IDR acknowledges everything pending, but the register only
//! settles one cycle later.  The cycle right after a read ("Ack0") and the
//! cycle right after an ICR write ("Write0") are race windows with their
//! own rules.

use serde::{Deserialize, Serialize};

use crate::event::{EventClock, Phase};

use super::{CiaEvent, CiaScheduler};

// ── Interrupt flag bits ───────────────────────────────────────

pub const INTERRUPT_NONE: u8 = 0;
pub const INTERRUPT_UNDERFLOW_A: u8 = 1 << 0;
pub const INTERRUPT_UNDERFLOW_B: u8 = 1 << 1;
pub const INTERRUPT_ALARM: u8 = 1 << 2;
pub const INTERRUPT_SP: u8 = 1 << 3;
pub const INTERRUPT_FLAG: u8 = 1 << 4;
pub const INTERRUPT_REQUEST: u8 = 1 << 7;

/// Events owned by the interrupt source.
const OWNED_EVENTS: [CiaEvent; 4] = [
    CiaEvent::Interrupt,
    CiaEvent::UpdateIdr,
    CiaEvent::SetIrq,
    CiaEvent::ClearIrq,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CiaModel {
    /// Old CIA, interrupts are delayed by one cycle.
    #[default]
    Mos6526,
    /// New CIA.
    Mos8521,
    /// Batch of old CIAs with a different serial port behaviour.
    Mos6526W4485,
}

/// The host's IRQ (or NMI) input.
///
/// Called once per edge; the line is level-sensitive and stays in the last
/// reported state.
pub trait IrqSink {
    fn interrupt(&mut self, state: bool);
}

// ── Shared state ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InterruptState {
    /// Interrupt Control Register (mask).
    icr: u8,
    /// Interrupt Data Register (pending flags).
    idr: u8,
    /// What `idr` becomes once a pending acknowledge settles.
    idr_temp: u8,
    /// PHI2 cycle of the last IDR read.
    last_clear: Option<EventClock>,
    /// PHI2 cycle of the last ICR write.
    last_set: Option<EventClock>,
    /// Is the IRQ pin currently asserted?
    asserted: bool,
}

impl InterruptState {
    pub fn icr(&self) -> u8 {
        self.icr
    }

    pub fn idr(&self) -> u8 {
        self.idr
    }

    pub fn asserted(&self) -> bool {
        self.asserted
    }

    /// `mask` (or, for `INTERRUPT_NONE`, everything pending) is enabled.
    fn interrupt_masked(&self, mask: u8) -> bool {
        let pending = if mask != INTERRUPT_NONE { mask } else { self.idr };
        pending & self.icr != 0
    }

    /// Current cycle directly follows an IDR read.
    pub fn ack0(&self, scheduler: &CiaScheduler) -> bool {
        let now = scheduler.get_time(Phase::Phi2);
        self.last_clear.is_some_and(|t| now == t + 1)
    }

    /// Current cycle directly follows an ICR write.
    pub fn write0(&self, scheduler: &CiaScheduler) -> bool {
        let now = scheduler.get_time(Phase::Phi2);
        self.last_set.is_some_and(|t| now == t + 1)
    }

    fn trigger_interrupt(&mut self) {
        self.idr |= INTERRUPT_REQUEST;
        self.idr_temp |= INTERRUPT_REQUEST;
    }

    /// Latch `mask` into the status and report whether it is enabled.
    ///
    /// A re-evaluation in the cycle after an ICR write drops an interrupt
    /// that was scheduled but has not fired yet.
    fn is_triggered(&mut self, scheduler: &mut CiaScheduler, mask: u8) -> bool {
        self.idr |= mask;
        self.idr_temp |= mask;

        if self.interrupt_masked(mask) {
            return true;
        }

        if mask == INTERRUPT_NONE && self.write0(scheduler) {
            scheduler.cancel(CiaEvent::Interrupt);
        }

        false
    }

    /// Queue the delayed "CIA Interrupt" event unless it already is.
    fn schedule(&self, scheduler: &mut CiaScheduler, delay: u32) {
        if !scheduler.is_pending(CiaEvent::Interrupt) {
            scheduler.schedule(CiaEvent::Interrupt, delay, Phase::Phi1);
        }
    }

    fn schedule_irq(&self, scheduler: &mut CiaScheduler) {
        scheduler.schedule(CiaEvent::SetIrq, 1, Phase::Phi1);
    }
}

// ── InterruptSource ───────────────────────────────────────────

/// Chip-variant interrupt logic.
///
/// Variants only decide how a new condition reaches the IRQ line
/// (`trigger`); register semantics and the IRQ edge handling are shared.
pub trait InterruptSource {
    fn state(&self) -> &InterruptState;

    fn state_mut(&mut self) -> &mut InterruptState;

    /// Raise `mask` in the IDR and, if enabled, start the IRQ sequence.
    fn trigger(&mut self, scheduler: &mut CiaScheduler, mask: u8);

    fn model_name(&self) -> &'static str;

    /// ICR write.  Bit 7 selects set (1) or clear (0) of the other bits.
    fn set(&mut self, scheduler: &mut CiaScheduler, mask: u8) {
        let state = self.state_mut();
        if mask & INTERRUPT_REQUEST != 0 {
            state.icr |= mask & !INTERRUPT_REQUEST;
        } else {
            state.icr &= !mask;
        }
        debug_assert!(state.icr & INTERRUPT_REQUEST == 0);

        if !self.state().ack0(scheduler) {
            self.trigger(scheduler, INTERRUPT_NONE);
        }

        self.state_mut().last_set = Some(scheduler.get_time(Phase::Phi2));
    }

    /// IDR read.  Returns the status as it is now; the acknowledge takes
    /// effect on the next PHI1.
    fn clear(&mut self, scheduler: &mut CiaScheduler) -> u8 {
        let state = self.state_mut();
        state.last_clear = Some(scheduler.get_time(Phase::Phi2));

        scheduler.schedule(CiaEvent::ClearIrq, 0, Phase::Phi1);

        if !scheduler.is_pending(CiaEvent::UpdateIdr) {
            state.idr_temp = 0;
            scheduler.schedule(CiaEvent::UpdateIdr, 0, Phase::Phi1);
        }

        state.idr
    }

    /// "CIA Interrupt" event: the delayed part of a trigger.
    fn interrupt_event(&mut self, scheduler: &mut CiaScheduler) {
        let state = self.state_mut();
        state.trigger_interrupt();
        state.schedule_irq(scheduler);
    }

    /// "Update idr" event: the acknowledge settles.
    fn update_idr(&mut self) {
        let state = self.state_mut();
        state.idr = state.idr_temp;
    }

    /// "Set irq" event.  An acknowledge in the previous cycle wins.
    fn set_irq(&mut self, scheduler: &mut CiaScheduler, irq: &mut dyn IrqSink) {
        if self.state().ack0(scheduler) {
            return;
        }

        let state = self.state_mut();
        state.trigger_interrupt();
        if !state.asserted {
            state.asserted = true;
            log::trace!("IRQ asserted at cycle {}", scheduler.cycle());
            irq.interrupt(true);
        }
    }

    /// "Clear irq" event.
    fn clear_irq(&mut self, scheduler: &CiaScheduler, irq: &mut dyn IrqSink) {
        let state = self.state_mut();
        if state.asserted {
            state.asserted = false;
            log::trace!("IRQ released at cycle {}", scheduler.cycle());
            irq.interrupt(false);
        }
    }

    /// Zero everything and forget pending events.  The host is not told
    /// about the line going low; resets are synchronous across chips.
    fn reset(&mut self, scheduler: &mut CiaScheduler) {
        *self.state_mut() = InterruptState::default();
        for event in OWNED_EVENTS {
            scheduler.cancel(event);
        }
    }
}

// ── Variants ──────────────────────────────────────────────────

/// MOS 6526: the request goes out one cycle late.
#[derive(Debug, Default)]
pub struct InterruptSource6526 {
    state: InterruptState,
}

impl InterruptSource6526 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterruptSource for InterruptSource6526 {
    fn state(&self) -> &InterruptState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterruptState {
        &mut self.state
    }

    fn trigger(&mut self, scheduler: &mut CiaScheduler, mask: u8) {
        if self.state.is_triggered(scheduler, mask) {
            self.state.schedule(scheduler, 1);
        }

        // Timer B underflowing during the acknowledge cycle still raises
        // the interrupt, but its IDR bit is lost.
        if mask == INTERRUPT_UNDERFLOW_B && self.state.ack0(scheduler) {
            self.state.idr &= !INTERRUPT_UNDERFLOW_B;
            self.state.idr_temp &= !INTERRUPT_UNDERFLOW_B;
        }
    }

    fn model_name(&self) -> &'static str {
        "MOS6526"
    }
}

/// MOS 8521.
#[derive(Debug, Default)]
pub struct InterruptSource8521 {
    state: InterruptState,
}

impl InterruptSource8521 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterruptSource for InterruptSource8521 {
    fn state(&self) -> &InterruptState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterruptState {
        &mut self.state
    }

    fn trigger(&mut self, scheduler: &mut CiaScheduler, mask: u8) {
        if self.state.is_triggered(scheduler, mask) {
            // The acknowledge in flight must not swallow the request bit.
            if self.state.ack0(scheduler) {
                self.state.trigger_interrupt();
            }
            self.state.schedule_irq(scheduler);
        }
    }

    fn model_name(&self) -> &'static str {
        "MOS8521"
    }
}

/// Fresh strategy object for `model`.
pub fn new_interrupt_source(model: CiaModel) -> Box<dyn InterruptSource> {
    match model {
        CiaModel::Mos6526 | CiaModel::Mos6526W4485 => Box::new(InterruptSource6526::new()),
        CiaModel::Mos8521 => Box::new(InterruptSource8521::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Line {
        edges: Vec<(EventClock, bool)>,
        now: EventClock,
    }

    impl IrqSink for Line {
        fn interrupt(&mut self, state: bool) {
            self.edges.push((self.now, state));
        }
    }

    /// Run the interrupt events up to PHI2 of `cycle`.
    fn run(src: &mut dyn InterruptSource, s: &mut CiaScheduler, line: &mut Line, cycle: EventClock) {
        let until = 2 * cycle + 1;
        while let Some(ev) = s.pop_due(until) {
            line.now = s.cycle();
            match ev {
                CiaEvent::Interrupt => src.interrupt_event(s),
                CiaEvent::UpdateIdr => src.update_idr(),
                CiaEvent::SetIrq => src.set_irq(s, line),
                CiaEvent::ClearIrq => src.clear_irq(s, line),
                other => panic!("unexpected event {other:?}"),
            }
        }
        s.advance_to(until);
    }

    /// Trigger from a PHI1 event of `cycle`, the way a timer underflow does.
    fn trigger_at(src: &mut dyn InterruptSource, s: &mut CiaScheduler, line: &mut Line, cycle: EventClock, mask: u8) {
        run(src, s, line, cycle - 1);
        s.advance_to(2 * cycle);
        src.trigger(s, mask);
    }

    #[test]
    fn icr_mask_algebra() {
        let mut s = CiaScheduler::new();
        let mut src = InterruptSource8521::new();
        src.set(&mut s, 0x81);
        src.set(&mut s, 0x01);
        assert_eq!(src.state().icr(), 0x00);

        let mut src = InterruptSource6526::new();
        src.set(&mut s, 0x81);
        src.set(&mut s, 0x82);
        assert_eq!(src.state().icr(), 0x03);

        src.set(&mut s, 0xFF);
        assert_eq!(src.state().icr(), 0x7F);
    }

    #[test]
    fn masked_out_trigger_only_sets_status() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource8521::new();
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        run(&mut src, &mut s, &mut line, 20);
        assert!(line.edges.is_empty());
        assert_eq!(src.clear(&mut s), INTERRUPT_UNDERFLOW_A);
    }

    #[test]
    fn mos8521_asserts_one_cycle_after_trigger() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource8521::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x81);
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        run(&mut src, &mut s, &mut line, 20);
        assert_eq!(line.edges, vec![(11, true)]);
    }

    #[test]
    fn mos6526_asserts_two_cycles_after_trigger() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource6526::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x81);
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        run(&mut src, &mut s, &mut line, 11);
        assert!(line.edges.is_empty());
        // The request bit is visible one cycle before the line moves.
        assert_eq!(src.state().idr(), INTERRUPT_UNDERFLOW_A | INTERRUPT_REQUEST);
        run(&mut src, &mut s, &mut line, 20);
        assert_eq!(line.edges, vec![(12, true)]);
    }

    #[test]
    fn idr_read_then_decay() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource8521::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x81);
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        run(&mut src, &mut s, &mut line, 12);

        assert_eq!(src.clear(&mut s), 0x81);
        run(&mut src, &mut s, &mut line, 13);
        assert_eq!(src.clear(&mut s), 0x00);
        assert_eq!(line.edges, vec![(11, true), (13, false)]);
    }

    #[test]
    fn enabling_mask_fires_pending_condition() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource8521::new();
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_ALARM);
        run(&mut src, &mut s, &mut line, 15);
        assert!(line.edges.is_empty());

        src.set(&mut s, 0x84);
        run(&mut src, &mut s, &mut line, 20);
        assert_eq!(line.edges, vec![(17, true)]);
        assert_eq!(src.state().idr(), INTERRUPT_ALARM | INTERRUPT_REQUEST);
    }

    #[test]
    fn acknowledge_in_trigger_cycle_swallows_irq() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource8521::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x81);
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        run(&mut src, &mut s, &mut line, 10);

        // The CPU reads the IDR in the PHI2 half of the underflow cycle.
        assert_eq!(src.clear(&mut s), INTERRUPT_UNDERFLOW_A);
        run(&mut src, &mut s, &mut line, 20);
        assert!(line.edges.is_empty());
        assert_eq!(src.state().idr(), 0);
    }

    #[test]
    fn mos8521_trigger_in_ack0_keeps_request_bit() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource8521::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x81);
        run(&mut src, &mut s, &mut line, 9);
        assert_eq!(src.clear(&mut s), 0);

        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        assert_eq!(src.state().idr(), 0x81);
        run(&mut src, &mut s, &mut line, 10);
        assert_eq!(src.state().idr(), 0x81);
        run(&mut src, &mut s, &mut line, 20);
        assert_eq!(line.edges, vec![(11, true)]);
    }

    #[test]
    fn mos6526_timer_b_bug() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource6526::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x82);
        run(&mut src, &mut s, &mut line, 9);
        src.clear(&mut s);

        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_B);
        run(&mut src, &mut s, &mut line, 20);
        assert_eq!(line.edges, vec![(12, true)]);
        assert_eq!(src.state().idr(), INTERRUPT_REQUEST);
    }

    #[test]
    fn reset_cancels_and_is_idempotent() {
        let mut s = CiaScheduler::new();
        let mut line = Line::default();
        let mut src = InterruptSource6526::new();
        run(&mut src, &mut s, &mut line, 5);
        src.set(&mut s, 0x81);
        trigger_at(&mut src, &mut s, &mut line, 10, INTERRUPT_UNDERFLOW_A);
        src.clear(&mut s);

        src.reset(&mut s);
        for ev in OWNED_EVENTS {
            assert!(!s.is_pending(ev));
        }
        let first = src.state().clone();
        src.reset(&mut s);
        let second = src.state().clone();
        assert_eq!(first.icr(), 0);
        assert_eq!(first.idr(), 0);
        assert!(!first.asserted());
        assert_eq!((second.icr(), second.idr(), second.asserted()), (0, 0, false));
        run(&mut src, &mut s, &mut line, 20);
        assert!(line.edges.is_empty());
    }
}
