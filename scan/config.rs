use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::scoring::ScoringFunction;

/// Tunables of a bias scan. Every field has a default, so a TOML file only
/// needs to name the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Charged once per value named in a subgroup definition.
    pub penalty: f64,
    /// Number of independent coordinate-ascent runs.
    pub restarts: usize,
    /// Upper bound on full passes over the features within one restart.
    pub max_passes: usize,
    pub seed: u64,
    /// Worker threads for the restarts; the global rayon pool when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Whether larger outcomes (label 1) are the favourable ones.
    pub favorable_high: bool,
    /// Minimum score gain for a feature's new value set to be adopted.
    pub improvement_tolerance: f64,
    pub scoring: ScoringFunction,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringFunction::Bernoulli,
            penalty: 0.0,
            restarts: 10,
            max_passes: 50,
            seed: 0,
            threads: None,
            favorable_high: true,
            improvement_tolerance: 1e-6,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ScanConfig {
    /// Loads a configuration from a TOML file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.penalty.is_finite() || self.penalty < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "penalty",
                reason: format!("must be a finite number >= 0, got {}", self.penalty),
            });
        }
        if self.restarts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "restarts",
                reason: "at least one restart is required".to_string(),
            });
        }
        if self.max_passes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_passes",
                reason: "at least one pass is required".to_string(),
            });
        }
        if self.threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "threads",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        if !self.improvement_tolerance.is_finite() || self.improvement_tolerance < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "improvement_tolerance",
                reason: format!(
                    "must be a finite number >= 0, got {}",
                    self.improvement_tolerance
                ),
            });
        }
        if let ScoringFunction::Gaussian { variance } = self.scoring {
            if !variance.is_finite() || variance <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "scoring.variance",
                    reason: format!("must be a finite number > 0, got {variance}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: ScanConfig = toml::from_str("restarts = 4\npenalty = 0.25\n").unwrap();
        assert_eq!(config.restarts, 4);
        assert_eq!(config.penalty, 0.25);
        assert_eq!(config.scoring, ScoringFunction::Bernoulli);
        assert_eq!(config.max_passes, ScanConfig::default().max_passes);
        assert!(config.favorable_high);
    }

    #[test]
    fn gaussian_scoring_is_a_tagged_table() {
        let text = "[scoring]\nkind = \"gaussian\"\nvariance = 2.5\n";
        let config: ScanConfig = toml::from_str(text).unwrap();
        assert_eq!(config.scoring, ScoringFunction::Gaussian { variance: 2.5 });
    }

    #[test]
    fn save_then_load_preserves_every_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        let config = ScanConfig {
            scoring: ScoringFunction::Poisson,
            penalty: 1.5,
            restarts: 3,
            max_passes: 7,
            seed: 42,
            threads: Some(2),
            favorable_high: false,
            improvement_tolerance: 1e-8,
        };
        config.save(&path).unwrap();
        assert_eq!(ScanConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn validation_rejects_nonsense() {
        let cases = [
            ScanConfig {
                penalty: -1.0,
                ..ScanConfig::default()
            },
            ScanConfig {
                restarts: 0,
                ..ScanConfig::default()
            },
            ScanConfig {
                max_passes: 0,
                ..ScanConfig::default()
            },
            ScanConfig {
                threads: Some(0),
                ..ScanConfig::default()
            },
            ScanConfig {
                scoring: ScoringFunction::Gaussian { variance: 0.0 },
                ..ScanConfig::default()
            },
            ScanConfig {
                improvement_tolerance: f64::NAN,
                ..ScanConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
        assert!(ScanConfig::default().validate().is_ok());
    }
}
