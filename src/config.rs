use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Catalogue-wide settings. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    /// SIMD partition width advertised to the engine.
    pub partition_width: u32,
    /// Buffer alignment in bytes advertised to the engine.
    pub alignment: u32,
    /// Fingerprint string stamped into every native mechanism record.
    pub fingerprint: String,
    /// Reject out-of-order lifecycle phases and node index changes.
    pub strict_lifecycle: bool,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        CatalogueConfig {
            partition_width: 1,
            alignment: 8,
            fingerprint: "<placeholder>".to_string(),
            strict_lifecycle: true,
        }
    }
}

impl CatalogueConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Settings of the in-process host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Seed for the random-number streams; group `k` uses `seed + k`.
    pub seed: u64,
    /// Membrane capacitance used when integrating the voltage.
    pub membrane_capacitance: f64,
    /// Apply `dv = -i * dt / cm` after every step.
    pub integrate_voltage: bool,
    /// Reject out-of-order lifecycle phases and node index changes.
    pub strict_lifecycle: bool,
    /// Membrane voltage every compartment starts at, in mV.
    pub initial_voltage: f64,
    /// Temperature every compartment starts at, in °C.
    pub temperature_degc: f64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            seed: 0,
            membrane_capacitance: 1.0,
            integrate_voltage: false,
            strict_lifecycle: true,
            initial_voltage: -65.0,
            temperature_degc: 6.3,
        }
    }
}

impl HostConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = CatalogueConfig::from_json(r#"{ "alignment": 64 }"#).unwrap();
        assert_eq!(config.alignment, 64);
        assert_eq!(config.partition_width, 1);
        assert_eq!(config.fingerprint, "<placeholder>");

        let host = HostConfig::from_json(r#"{ "seed": 7, "integrate_voltage": true }"#).unwrap();
        assert_eq!(host.seed, 7);
        assert!(host.integrate_voltage);
        assert_eq!(host.initial_voltage, -65.0);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = CatalogueConfig::from_json("{ alignment: }").unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }
}
