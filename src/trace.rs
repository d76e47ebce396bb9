// Scripted register traffic against a CIA, recording what the CPU would
// see: read results and IRQ line edges, each stamped with its cycle.
//
// Script: JSON array of accesses, in time order:
//   [{"cycle": 10, "op": "write", "addr": 4, "value": 5},
//    {"cycle": 20, "op": "read", "addr": 13}]
// "phase" ("phi1" / "phi2") is optional and defaults to PHI2, when the CPU
// drives the bus.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cia::{IrqLog, Mos652x};
use crate::config::CiaConfig;
use crate::event::{EventClock, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub cycle: EventClock,
    #[serde(default = "default_phase")]
    pub phase: Phase,
    pub op: Op,
    pub addr: u8,
    /// Ignored for reads.
    #[serde(default)]
    pub value: u8,
}

fn default_phase() -> Phase {
    Phase::Phi2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TraceEntry {
    Read { cycle: EventClock, addr: u8, value: u8 },
    Irq { cycle: EventClock, level: bool },
}

pub fn parse_script(text: &str) -> Result<Vec<Access>, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid trace script: {e}"))
}

pub fn load_script(path: &Path) -> Result<Vec<Access>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    parse_script(&text)
}

pub fn to_json(trace: &[TraceEntry]) -> Result<String, String> {
    serde_json::to_string_pretty(trace).map_err(|e| format!("Cannot encode trace: {e}"))
}

/// Run `script` on a freshly reset chip.
pub fn run_script(config: &CiaConfig, script: &[Access]) -> Result<Vec<TraceEntry>, String> {
    let mut cia = Mos652x::with_config(IrqLog::new(), config);
    let mut trace = Vec::new();

    for (i, access) in script.iter().enumerate() {
        let target = 2 * access.cycle + access.phase as EventClock;
        if target < cia.scheduler().now() {
            return Err(format!(
                "Access #{i} at cycle {} {:?} is earlier than the one before it",
                access.cycle, access.phase
            ));
        }

        // Half-cycle steps so every edge gets its own timestamp.
        while cia.scheduler().now() < target {
            cia.clock();
            let cycle = cia.scheduler().cycle();
            for level in cia.irq_mut().take_edges() {
                trace.push(TraceEntry::Irq { cycle, level });
            }
        }

        match access.op {
            Op::Read => {
                let value = cia.read(access.addr);
                log::trace!("cycle {}: read ${:X} = ${value:02X}", access.cycle, access.addr);
                trace.push(TraceEntry::Read {
                    cycle: access.cycle,
                    addr: access.addr,
                    value,
                });
            }
            Op::Write => {
                log::trace!("cycle {}: write ${:X} = ${:02X}", access.cycle, access.addr, access.value);
                cia.write(access.addr, access.value);
            }
        }
    }

    log::debug!(
        "Trace finished at cycle {}: {} entries",
        cia.time(Phase::Phi2),
        trace.len()
    );
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cia::interrupt::CiaModel;

    const TIMER_SCRIPT: &str = r#"[
        {"cycle": 10, "op": "write", "addr": 4, "value": 5},
        {"cycle": 10, "op": "write", "addr": 5, "value": 0},
        {"cycle": 10, "op": "write", "addr": 13, "value": 129},
        {"cycle": 12, "op": "write", "addr": 14, "value": 9},
        {"cycle": 22, "op": "read", "addr": 13}
    ]"#;

    #[test]
    fn records_reads_and_edges() {
        let script = parse_script(TIMER_SCRIPT).unwrap();
        assert_eq!(script[0].phase, Phase::Phi2);

        let config = CiaConfig::pal().with_model(CiaModel::Mos8521);
        let trace = run_script(&config, &script).unwrap();
        assert_eq!(
            trace,
            vec![
                TraceEntry::Irq { cycle: 20, level: true },
                TraceEntry::Read { cycle: 22, addr: 13, value: 0x81 },
            ]
        );
    }

    #[test]
    fn old_cia_edge_is_a_cycle_later() {
        let script = parse_script(TIMER_SCRIPT).unwrap();
        let trace = run_script(&CiaConfig::pal(), &script).unwrap();
        assert_eq!(trace[0], TraceEntry::Irq { cycle: 21, level: true });
    }

    #[test]
    fn out_of_order_script_is_rejected() {
        let script = parse_script(
            r#"[{"cycle": 5, "op": "read", "addr": 0},
                {"cycle": 4, "op": "read", "addr": 0}]"#,
        )
        .unwrap();
        let err = run_script(&CiaConfig::pal(), &script).unwrap_err();
        assert!(err.contains("#1"));
    }

    #[test]
    fn trace_json_is_tagged() {
        let json = to_json(&[TraceEntry::Irq { cycle: 3, level: false }]).unwrap();
        assert!(json.contains(r#""kind": "irq""#));
        assert!(parse_script(r#"[{"cycle": 1, "op": "poke", "addr": 0}]"#).is_err());
    }
}
