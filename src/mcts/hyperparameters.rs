//! Search agent configuration.
//!
//! All tunables of the search live in [`AgentConfig`]. The struct (de)serializes with serde so
//! it can be loaded from a JSON file; missing fields take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    // ========== Parallelism ==========
    /// Concurrent playouts per wave
    /// Default: 16
    pub threads: usize,

    /// Requests evaluated per network call; must divide `threads`
    /// Default: 8
    pub batch_size: usize,

    // ========== Budgets ==========
    /// Playout budget when the pockets are empty (standard chess)
    /// Default: 256
    pub playouts_empty_pockets: u32,

    /// Playout budget when pieces sit in the pockets (drop variants)
    /// Default: 512
    pub playouts_filled_pockets: u32,

    /// Search stops once a playout reaches this depth
    /// Default: 15
    pub max_search_depth: usize,

    /// Move-time budget in milliseconds; checked between waves only
    /// Default: 100
    pub min_movetime_ms: u64,

    // ========== Selection ==========
    /// PUCT exploration constant of the first wave
    /// Default: 2.5
    pub cpuct: f32,

    /// Floor of the per-wave cpuct anneal
    /// Default: 1.3
    pub cpuct_floor: f32,

    /// cpuct decrement per wave
    /// Default: 0.005
    pub cpuct_decay: f32,

    /// Pending visits charged to an edge while its playout is in flight
    /// Default: 3
    pub virtual_loss: u32,

    /// Take an immediately winning move whenever one exists
    /// Default: false
    pub check_mate_in_one: bool,

    // ========== Root noise ==========
    /// Share of Dirichlet noise mixed into the root prior
    /// Default: 0.25
    pub dirichlet_epsilon: f32,

    /// Dirichlet concentration
    /// Default: 0.2
    pub dirichlet_alpha: f32,

    // ========== Move choice ==========
    /// Sampling temperature; at or below 0.01 the best move is taken
    /// Default: 0.0
    pub temperature: f32,

    /// Probability mass cut from the tail before sampling
    /// Default: 0.0
    pub clip_quantile: f32,

    /// Weight of the action values in the final move distribution
    /// Default: 0.0
    pub q_value_weight: f32,

    // ========== Inference ==========
    /// Run partial batches after `batch_timeout_ms`
    /// Default: false
    pub enable_timeout: bool,

    /// Default: 1000
    pub batch_timeout_ms: u64,

    // ========== Misc ==========
    /// Print engine info lines to stdout
    /// Default: true
    pub verbose: bool,

    /// Seed for root noise and move sampling; entropy when absent
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            threads: 16,
            batch_size: 8,

            playouts_empty_pockets: 256,
            playouts_filled_pockets: 512,
            max_search_depth: 15,
            min_movetime_ms: 100,

            cpuct: 2.5,
            cpuct_floor: 1.3,
            cpuct_decay: 0.005,
            virtual_loss: 3,
            check_mate_in_one: false,

            dirichlet_epsilon: 0.25,
            dirichlet_alpha: 0.2,

            temperature: 0.0,
            clip_quantile: 0.0,
            q_value_weight: 0.0,

            enable_timeout: false,
            batch_timeout_ms: 1000,

            verbose: true,
            seed: None,
        }
    }
}

impl AgentConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(EngineError::Config("threads must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be at least 1".to_string()));
        }
        if self.batch_size > self.threads {
            return Err(EngineError::Config(format!(
                "batch_size {} exceeds threads {}",
                self.batch_size, self.threads
            )));
        }
        if self.threads % self.batch_size != 0 {
            return Err(EngineError::Config(format!(
                "threads {} is not a multiple of batch_size {}",
                self.threads, self.batch_size
            )));
        }
        if self.virtual_loss == 0 {
            return Err(EngineError::Config("virtual_loss must be at least 1".to_string()));
        }
        if self.max_search_depth == 0 {
            return Err(EngineError::Config("max_search_depth must be at least 1".to_string()));
        }
        for (name, value) in [
            ("dirichlet_epsilon", self.dirichlet_epsilon),
            ("clip_quantile", self.clip_quantile),
            ("q_value_weight", self.q_value_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{} must lie in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.dirichlet_alpha <= 0.0 {
            return Err(EngineError::Config("dirichlet_alpha must be positive".to_string()));
        }
        if self.temperature < 0.0 || !self.temperature.is_finite() {
            return Err(EngineError::Config(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if self.cpuct < 0.0 || self.cpuct_decay < 0.0 {
            return Err(EngineError::Config(
                "cpuct and cpuct_decay must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Playout budget for a position.
    pub fn playout_budget(&self, pockets_empty: bool) -> u32 {
        if pockets_empty {
            self.playouts_empty_pockets
        } else {
            self.playouts_filled_pockets
        }
    }

    /// cpuct for the given wave: lowered by `cpuct_decay` per wave, never below
    /// `min(cpuct, cpuct_floor)`.
    pub fn annealed_cpuct(&self, wave: u32) -> f32 {
        let floor = self.cpuct_floor.min(self.cpuct);
        (self.cpuct - self.cpuct_decay * wave as f32).max(floor)
    }

    pub fn movetime(&self) -> Duration {
        Duration::from_millis(self.min_movetime_ms)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.enable_timeout
            .then(|| Duration::from_millis(self.batch_timeout_ms))
    }

    /// Compact summary for logging.
    pub fn to_config_string(&self) -> String {
        format!(
            "threads={}_batch={}_playouts[{},{}]_cpuct[{:.2},{:.2},{:.3}]_vl={}_noise[{:.2},{:.2}]_temp={:.2}",
            self.threads,
            self.batch_size,
            self.playouts_empty_pockets,
            self.playouts_filled_pockets,
            self.cpuct,
            self.cpuct_floor,
            self.cpuct_decay,
            self.virtual_loss,
            self.dirichlet_epsilon,
            self.dirichlet_alpha,
            self.temperature
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threads, 16);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.virtual_loss, 3);
    }

    #[test]
    fn test_batch_size_constraints() {
        let mut config = AgentConfig {
            threads: 4,
            batch_size: 8,
            ..AgentConfig::default()
        };
        assert_matches!(config.validate(), Err(EngineError::Config(_)));

        config.batch_size = 3;
        assert_matches!(config.validate(), Err(EngineError::Config(_)));

        config.batch_size = 0;
        assert_matches!(config.validate(), Err(EngineError::Config(_)));

        config.batch_size = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values() {
        let config = AgentConfig {
            dirichlet_epsilon: 1.5,
            ..AgentConfig::default()
        };
        assert_matches!(config.validate(), Err(EngineError::Config(msg)) if msg.contains("dirichlet_epsilon"));

        let config = AgentConfig {
            temperature: -1.0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_cpuct_anneals_to_floor() {
        let config = AgentConfig::default();
        assert!(config.cpuct > config.cpuct_floor);
        let first = config.annealed_cpuct(1);
        let later = config.annealed_cpuct(50);
        assert!((first - 2.495).abs() < 1e-5);
        assert!(later < first);
        assert!((config.annealed_cpuct(100) - 2.0).abs() < 1e-5);
        assert!((config.annealed_cpuct(10_000) - 1.3).abs() < 1e-6);
    }

    #[test]
    fn test_cpuct_anneal_never_raises() {
        let config = AgentConfig {
            cpuct: 1.0,
            ..AgentConfig::default()
        };
        assert_eq!(config.annealed_cpuct(1), 1.0);
        assert_eq!(config.annealed_cpuct(100), 1.0);
    }

    #[test]
    fn test_playout_budget_by_pockets() {
        let config = AgentConfig::default();
        assert_eq!(config.playout_budget(true), 256);
        assert_eq!(config.playout_budget(false), 512);
    }

    #[test]
    fn test_batch_timeout_only_when_enabled() {
        let mut config = AgentConfig::default();
        assert_eq!(config.batch_timeout(), None);
        config.enable_timeout = true;
        assert_eq!(config.batch_timeout(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"threads": 4, "batch_size": 2, "seed": 42}}"#).unwrap();

        let config = AgentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.playouts_empty_pockets, 256);
    }

    #[test]
    fn test_from_json_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"threads": 3, "batch_size": 2}}"#).unwrap();
        assert_matches!(AgentConfig::from_json_file(file.path()), Err(EngineError::Config(_)));
    }

    #[test]
    fn test_config_string() {
        let config = AgentConfig::default();
        assert!(config.to_config_string().contains("threads=16_batch=8"));
    }
}
