//! Engine configuration, loaded from a TOML file with per-field defaults

use crate::batch::Throttle;
use crate::error::{EngineError, EngineResult};
use crate::reconciliation::OverlapPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute tolerance when comparing hour figures
    pub tolerance: f64,

    /// How the legacy sheet's social column relates to its volunteering column
    pub overlap_policy: OverlapPolicy,

    /// Rows per range read when paging through members
    pub page_size: usize,

    /// Attendance records per insert-many call
    pub batch_size: usize,

    /// Pause between per-entity mutation sequences
    pub throttle_ms: u64,

    /// Type label for meetings created by the seeder
    pub meeting_type: String,

    /// Actor recorded on audit events
    pub actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tolerance: 0.01,
            overlap_policy: OverlapPolicy::SubtractSocial,
            page_size: 100,
            batch_size: 50,
            throttle_ms: 100,
            meeting_type: "General Meeting".to_string(),
            actor: "hours-ledger".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.page_size == 0 {
            return Err(EngineError::InvalidConfig("page_size must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(EngineError::InvalidConfig("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn throttle(&self) -> Throttle {
        Throttle::from_millis(self.throttle_ms)
    }

    /// Defaults with throttling disabled, for tests and local runs
    pub fn unthrottled() -> Self {
        EngineConfig {
            throttle_ms: 0,
            ..Default::default()
        }
    }
}
