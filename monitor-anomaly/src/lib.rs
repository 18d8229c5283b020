pub mod analyzer;
pub mod detector;
pub mod history;
pub mod ledger;
pub mod service;

pub use detector::{filter_by_volume, AnomalyDetector};
pub use history::{HistoryStore, Recorded, SymbolHistory};
pub use ledger::AlertLedger;
pub use service::{DetectionService, DetectorStatus, PassGuard, PassOutcome};

use chrono::{DateTime, Utc};
use monitor_core::{DetectionConfig, MAX_COOLDOWN_MINUTES};
use serde::{Deserialize, Serialize};

/// Which conditions fired. Only the compound condition alerts today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    BothConditions,
}

/// A raised funding/open-interest divergence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub kind: AlertKind,
    pub funding_history: Vec<f64>,
    pub open_interest_history: Vec<f64>,
    pub consecutive_fr_decreases: usize,
    pub consecutive_oi_increases: usize,
    pub funding_rate: f64,
    pub open_interest: f64,
    pub volume: f64,
    pub description: String,
}

/// Thresholds the detector evaluates against.
#[derive(Debug, Clone, PartialEq)]
pub struct DivergenceThresholds {
    pub min_history: usize,
    pub min_funding_decreases: usize,
    pub min_oi_increases: usize,
    pub cooldown: chrono::Duration,
}

impl From<&DetectionConfig> for DivergenceThresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            min_history: config.min_history,
            min_funding_decreases: config.min_funding_decreases,
            min_oi_increases: config.min_oi_increases,
            cooldown: chrono::Duration::minutes(
                config.cooldown_minutes.clamp(0, MAX_COOLDOWN_MINUTES),
            ),
        }
    }
}

impl Default for DivergenceThresholds {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}
