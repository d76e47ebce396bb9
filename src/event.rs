//! Minimal cycle-accurate event scheduler.
//!
//! Chips are driven by events keyed on a half-cycle clock: even ticks are
//! PHI1, odd ticks PHI2.  An event is a plain `Copy` value (one variant per
//! kind), so the queue never owns closures and a pending kind can be
//! cancelled or queried by value.  Only a handful of events are ever
//! pending at once, so cancellation simply rebuilds the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

// ── Clock types ────────────────────────────────────────────────

/// Tick counter (signed so deltas can be negative).
pub type EventClock = i64;

/// Two-phase clock.  PHI1 is the first half-cycle, PHI2 the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Phi1 = 0,
    Phi2 = 1,
}

// ── Scheduler entry ────────────────────────────────────────────

struct ScheduledEvent<E> {
    trigger_time: EventClock,
    /// Insertion order, breaks ties between events due on the same tick.
    seq: u64,
    event: E,
}

impl<E> Eq for ScheduledEvent<E> {}
impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.trigger_time == other.trigger_time && self.seq == other.seq
    }
}
impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<E> Ord for ScheduledEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want earliest first → reverse.
        other
            .trigger_time
            .cmp(&self.trigger_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ── EventScheduler ─────────────────────────────────────────────

/// Priority queue of pending events keyed by half-cycle time.
///
/// Each event value is pending at most once: scheduling a value that is
/// already queued moves it.  Events due on the same tick fire in the order
/// they were scheduled, but callers must not depend on that for events of
/// the same phase.
pub struct EventScheduler<E> {
    current_time: EventClock,
    next_seq: u64,
    queue: BinaryHeap<ScheduledEvent<E>>,
}

impl<E: Copy + PartialEq + Debug> EventScheduler<E> {
    pub fn new() -> Self {
        Self {
            current_time: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    // ── Time queries ───────────────────────────────────────────

    /// Cycle count as seen from the given phase.
    ///
    /// During PHI2 the PHI1 time already points at the next cycle.
    pub fn get_time(&self, phase: Phase) -> EventClock {
        (self.current_time + ((phase as EventClock) ^ 1)) >> 1
    }

    /// Cycle the current half-cycle belongs to.
    pub fn cycle(&self) -> EventClock {
        self.current_time >> 1
    }

    /// Raw half-cycle counter.
    pub fn now(&self) -> EventClock {
        self.current_time
    }

    pub fn phase(&self) -> Phase {
        if self.current_time & 1 == 0 {
            Phase::Phi1
        } else {
            Phase::Phi2
        }
    }

    // ── Scheduling ─────────────────────────────────────────────

    /// Schedule `event` `cycles` cycles after the next `phase` slot.
    ///
    /// The slot is the current half-cycle when it already is `phase`.
    pub fn schedule(&mut self, event: E, cycles: u32, phase: Phase) {
        let align = (self.current_time & 1) ^ (phase as EventClock);
        let trigger_time = self.current_time + align + (EventClock::from(cycles) << 1);
        self.insert(event, trigger_time);
    }

    /// Schedule `event` `cycles` cycles from now, in the current phase.
    pub fn schedule_cycles(&mut self, event: E, cycles: u32) {
        let trigger_time = self.current_time + (EventClock::from(cycles) << 1);
        self.insert(event, trigger_time);
    }

    fn insert(&mut self, event: E, trigger_time: EventClock) {
        self.cancel(event);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledEvent {
            trigger_time,
            seq,
            event,
        });
    }

    /// Cancel a pending event.  No-op if it is not pending.
    pub fn cancel(&mut self, event: E) {
        self.queue.retain(|e| e.event != event);
    }

    pub fn is_pending(&self, event: E) -> bool {
        self.queue.iter().any(|e| e.event == event)
    }

    /// Whole cycles until `event` fires, `None` if it is not pending.
    pub fn remaining(&self, event: E) -> Option<EventClock> {
        self.queue
            .iter()
            .find(|e| e.event == event)
            .map(|e| (e.trigger_time - self.current_time) >> 1)
    }

    // ── Advance ────────────────────────────────────────────────

    /// Take the earliest event due at or before half-cycle `until`.
    ///
    /// The clock moves to the event's trigger time before it is returned,
    /// so the caller dispatches it "at" that time.
    pub fn pop_due(&mut self, until: EventClock) -> Option<E> {
        if self.queue.peek()?.trigger_time > until {
            return None;
        }
        let entry = self.queue.pop()?;
        debug_assert!(entry.trigger_time >= self.current_time);
        self.current_time = entry.trigger_time;
        Some(entry.event)
    }

    /// Settle the clock at half-cycle `until` once all due events ran.
    pub fn advance_to(&mut self, until: EventClock) {
        debug_assert!(until >= self.current_time, "clock cannot run backwards");
        self.current_time = self.current_time.max(until);
    }

    /// Drop every pending event and rewind the clock (new session).
    pub fn reset(&mut self) {
        self.current_time = 0;
        self.next_seq = 0;
        self.queue.clear();
    }
}

impl<E: Copy + PartialEq + Debug> Default for EventScheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Ev {
        A,
        B,
        C,
    }

    fn drain(s: &mut EventScheduler<Ev>, until: EventClock) -> Vec<(EventClock, Ev)> {
        let mut fired = Vec::new();
        while let Some(e) = s.pop_due(until) {
            fired.push((s.now(), e));
        }
        s.advance_to(until);
        fired
    }

    #[test]
    fn phase_time_mapping() {
        let mut s = EventScheduler::<Ev>::new();
        assert_eq!(s.phase(), Phase::Phi1);
        assert_eq!(s.get_time(Phase::Phi1), 0);
        assert_eq!(s.get_time(Phase::Phi2), 0);

        s.advance_to(1);
        assert_eq!(s.phase(), Phase::Phi2);
        assert_eq!(s.get_time(Phase::Phi1), 1);
        assert_eq!(s.get_time(Phase::Phi2), 0);
        assert_eq!(s.cycle(), 0);
    }

    #[test]
    fn schedule_aligns_to_requested_phase() {
        let mut s = EventScheduler::new();
        s.advance_to(5); // PHI2 of cycle 2
        s.schedule(Ev::A, 0, Phase::Phi1);
        s.schedule(Ev::B, 0, Phase::Phi2);
        s.schedule(Ev::C, 1, Phase::Phi1);
        assert_eq!(drain(&mut s, 20), vec![(5, Ev::B), (6, Ev::A), (8, Ev::C)]);
    }

    #[test]
    fn schedule_cycles_keeps_phase() {
        let mut s = EventScheduler::new();
        s.advance_to(3);
        s.schedule_cycles(Ev::A, 2);
        assert_eq!(s.remaining(Ev::A), Some(2));
        assert_eq!(drain(&mut s, 10), vec![(7, Ev::A)]);
    }

    #[test]
    fn rescheduling_moves_pending_event() {
        let mut s = EventScheduler::new();
        s.schedule(Ev::A, 3, Phase::Phi1);
        s.schedule(Ev::A, 1, Phase::Phi1);
        assert_eq!(drain(&mut s, 20), vec![(2, Ev::A)]);
    }

    #[test]
    fn same_tick_events_fire_in_schedule_order() {
        let mut s = EventScheduler::new();
        s.schedule(Ev::C, 1, Phase::Phi1);
        s.schedule(Ev::A, 1, Phase::Phi1);
        s.schedule(Ev::B, 1, Phase::Phi1);
        let order: Vec<Ev> = drain(&mut s, 2).into_iter().map(|(_, e)| e).collect();
        assert_eq!(order, vec![Ev::C, Ev::A, Ev::B]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut s = EventScheduler::new();
        s.cancel(Ev::A);
        s.schedule(Ev::A, 1, Phase::Phi2);
        assert!(s.is_pending(Ev::A));
        s.cancel(Ev::A);
        s.cancel(Ev::A);
        assert!(!s.is_pending(Ev::A));
        assert_eq!(s.remaining(Ev::A), None);
        assert!(drain(&mut s, 10).is_empty());
    }
}
