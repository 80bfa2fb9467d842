//! Configuration for the orchestrator: one sub-config per component, each
//! with a `Default`, loaded from TOML and overridable by environment
//! variables.

use crate::types::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    pub general: GeneralConfig,
    pub event_bus: EventBusConfig,
    pub state: StateConfig,
    pub metrics: MetricsConfig,
    pub monitor: MonitorConfig,
    pub phase: PhaseConfig,
    pub coordination: CoordinationConfig,
    pub complexity: ComplexityConfig,
    pub historical: HistoricalConfig,
    pub bridge: BridgeConfig,
}

impl OrchestratorConfig {
    /// Loads from `path` if it exists, otherwise writes and returns a default
    /// config at that path. Either way, applies environment variable
    /// overrides afterward.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| OrchestratorError::ConfigError(format!("failed to parse config: {}", e)))?
        } else {
            let config = Self::default();
            config.save(path)?;
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), OrchestratorError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::ConfigError(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Applies the environment variables named in the external interfaces
    /// contract, overriding whatever TOML supplied.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STATE_BACKEND") {
            self.state.backend = v;
        }
        if let Ok(v) = std::env::var("STATE_DIR") {
            self.state.state_dir = v;
        }
        if let Ok(v) = std::env::var("HISTORY_RETENTION_DAYS") {
            if let Ok(n) = v.parse() {
                self.historical.retention_days = n;
            }
        }
        if let Ok(v) = std::env::var("COORDINATION_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                self.coordination.max_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("CIRCUIT_FAILURE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.monitor.circuit_failure_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("CIRCUIT_RECOVERY_TIMEOUT_SEC") {
            if let Ok(n) = v.parse() {
                self.monitor.circuit_recovery_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_WARN_PCT") {
            if let Ok(n) = v.parse() {
                self.monitor.memory_warn_pct = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_CRITICAL_PCT") {
            if let Ok(n) = v.parse() {
                self.monitor.memory_critical_pct = n;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            data_dir: "orchestrator_data".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Per-subscriber queue high-water mark before back-pressure kicks in.
    pub queue_high_water_mark: usize,
    pub block_emitter_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_high_water_mark: 1000,
            block_emitter_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// `memory`, `file`, or `sql`.
    pub backend: String,
    pub state_dir: String,
    pub snapshot_interval_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            state_dir: "orchestrator_data/state".into(),
            snapshot_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Ring buffer capacity per metric name.
    pub ring_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { ring_capacity: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout_secs: u64,
    pub circuit_half_open_success_threshold: u32,
    pub memory_warn_pct: u8,
    pub memory_critical_pct: u8,
    pub memory_budget_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: 5,
            circuit_recovery_timeout_secs: 30,
            circuit_half_open_success_threshold: 2,
            memory_warn_pct: 75,
            memory_critical_pct: 90,
            memory_budget_bytes: 1_073_741_824,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub max_parallel_phases: usize,
    pub checkpoint_on_complete: bool,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            max_parallel_phases: 4,
            checkpoint_on_complete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    pub max_iterations: u32,
    pub response_timeout_secs: u64,
    pub context_ttl_secs: u64,
    pub keep_final_outputs_on_prune: bool,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            response_timeout_secs: 30,
            context_ttl_secs: 86_400,
            keep_final_outputs_on_prune: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityConfig {
    pub low_threshold: f64,
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            low_threshold: 30.0,
            medium_threshold: 60.0,
            high_threshold: 80.0,
            critical_threshold: 95.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalConfig {
    pub retention_days: u32,
    pub min_pattern_frequency: u32,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            min_pattern_frequency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub address: String,
    pub port: u16,
    /// Minimum event priority republished over `/events`.
    pub min_event_priority: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 8787,
            min_event_priority: "normal".into(),
        }
    }
}
