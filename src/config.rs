// Chip configuration: CIA model and TOD divider.
// Stored as JSON, e.g. {"model": "MOS8521", "tod_rate": 17045}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cia::interrupt::CiaModel;

/// PAL-B color burst → CPU clock (÷ 18 after ×4).
pub const PAL_CPU_FREQ: f64 = 4_433_618.75 * 4.0 / 18.0;
/// NTSC color burst → CPU clock (÷ 14 after ×4).
pub const NTSC_CPU_FREQ: f64 = 3_579_545.455 * 4.0 / 14.0;

pub const PAL_POWER_FREQ: f64 = 50.0;
pub const NTSC_POWER_FREQ: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiaConfig {
    /// Chip revision.
    pub model: CiaModel,
    /// CPU cycles per power-line tick (TOD divider).
    pub tod_rate: u32,
}

impl Default for CiaConfig {
    fn default() -> Self {
        Self::pal()
    }
}

impl CiaConfig {
    /// European machine: 985 kHz, 50 Hz mains.
    pub fn pal() -> Self {
        Self::from_clock(PAL_CPU_FREQ, PAL_POWER_FREQ)
    }

    /// US machine: 1.02 MHz, 60 Hz mains.
    pub fn ntsc() -> Self {
        Self::from_clock(NTSC_CPU_FREQ, NTSC_POWER_FREQ)
    }

    /// MOS6526 driven from `cpu_hz` with a `power_hz` TOD input.
    pub fn from_clock(cpu_hz: f64, power_hz: f64) -> Self {
        let rate = if power_hz > 0.0 { (cpu_hz / power_hz) as u32 } else { 0 };
        Self {
            model: CiaModel::Mos6526,
            tod_rate: rate.max(1),
        }
    }

    pub fn with_model(mut self, model: CiaModel) -> Self {
        self.model = model;
        self
    }

    pub fn from_json(s: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| format!("Invalid CIA config: {e}"))?;
        if config.tod_rate == 0 {
            return Err("Invalid CIA config: tod_rate must be at least 1".to_string());
        }
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // Two plain fields, serialisation cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
        let config = Self::from_json(&text)?;
        log::debug!("Loaded CIA config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Write the config as JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Cannot create {}: {e}", parent.display()))?;
        }

        std::fs::write(path, self.to_json())
            .map_err(|e| format!("Cannot save config to {}: {e}", path.display()))?;
        log::debug!("CIA config saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_machine_clocks() {
        assert_eq!(CiaConfig::pal().tod_rate, 19_704);
        assert_eq!(CiaConfig::ntsc().tod_rate, 17_045);
        assert_eq!(CiaConfig::default(), CiaConfig::pal());
        assert_eq!(CiaConfig::default().model, CiaModel::Mos6526);
    }

    #[test]
    fn json_fields_default() {
        let config = CiaConfig::from_json(r#"{"model": "MOS8521"}"#).unwrap();
        assert_eq!(config.model, CiaModel::Mos8521);
        assert_eq!(config.tod_rate, 19_704);

        let config = CiaConfig::from_json("{}").unwrap();
        assert_eq!(config, CiaConfig::pal());
    }

    #[test]
    fn json_round_trip() {
        let config = CiaConfig::ntsc().with_model(CiaModel::Mos6526W4485);
        let text = config.to_json();
        assert!(text.contains("MOS6526W4485"));
        assert_eq!(CiaConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("cia652x-config-{}", std::process::id()));
        let path = dir.join("nested").join("cia.json");
        let config = CiaConfig::ntsc().with_model(CiaModel::Mos8521);

        config.save(&path).unwrap();
        assert_eq!(CiaConfig::load(&path).unwrap(), config);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bad_json_is_an_error() {
        let err = CiaConfig::from_json(r#"{"model": "MOS6581"}"#).unwrap_err();
        assert!(err.starts_with("Invalid CIA config"));
        assert!(CiaConfig::from_json(r#"{"tod_rate": 0}"#).is_err());
        assert!(CiaConfig::load(Path::new("/nonexistent/cia.json")).is_err());
    }
}
