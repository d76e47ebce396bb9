//! Cycle-exact MOS 6526 / 8521 CIA core.
//!
//! Two interval timers with cascade, the interrupt controller with its
//! per-model delays and acknowledge races, the BCD time-of-day clock and
//! the serial port's output timing, driven by a half-cycle event scheduler.

pub mod cia;
pub mod config;
pub mod event;
pub mod trace;

pub use cia::interrupt::{CiaModel, IrqSink};
pub use cia::{CiaEvent, CiaScheduler, IrqLog, Mos652x};
pub use config::CiaConfig;
pub use event::{EventClock, EventScheduler, Phase};
