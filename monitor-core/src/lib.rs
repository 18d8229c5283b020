pub mod event;
pub mod model;
pub mod source;
pub mod stream;

pub use model::{Snapshot, SymbolSeries};
pub use source::{SnapshotSource, SourceSet};
pub use stream::EventBus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Detector not initialized")]
    DetectorUninitialized,

    #[error("Source {source_name} error: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl MonitorError {
    pub fn source_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub event_type: EventType,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventSource {
    Monitor,
    Anomaly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventType {
    Anomaly(AnomalyType),
    System(SystemEventType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyType {
    /// Funding rate falling while open interest keeps rising.
    FundingOiDivergence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemEventType {
    Started,
    Stopped,
    PassCompleted,
    PassSkipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sources: Vec<SourceConfig>,
    pub detection: DetectionConfig,
    pub polling: PollingConfig,
    pub api: ApiConfig,
    pub notification: NotificationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Binance,
    Bybit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the exchange's public REST endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Empty means every listed perpetual with the configured quote suffix.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_quote_suffix")]
    pub quote_suffix: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Longest accepted alert cooldown, one week.
pub const MAX_COOLDOWN_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub history_capacity: usize,
    pub min_history: usize,
    pub min_funding_decreases: usize,
    pub min_oi_increases: usize,
    pub cooldown_minutes: i64,
    pub ledger_capacity: usize,
    pub min_volume: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            min_history: 6,
            min_funding_decreases: 5,
            min_oi_increases: 5,
            cooldown_minutes: 30,
            ledger_capacity: 100,
            min_volume: 50_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub log_enabled: bool,
    pub telegram: TelegramConfig,
    pub email: EmailConfig,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            log_enabled: true,
            telegram: TelegramConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub use_tls: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            to_addresses: Vec::new(),
            use_tls: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_quote_suffix() -> String {
    "USDT".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detection_config() {
        let config = DetectionConfig::default();
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.min_history, 6);
        assert_eq!(config.min_funding_decreases, 5);
        assert_eq!(config.min_oi_increases, 5);
        assert_eq!(config.cooldown_minutes, 30);
        assert_eq!(config.ledger_capacity, 100);
        assert_eq!(config.min_volume, 50_000_000.0);
    }

    #[test]
    fn test_source_config_defaults() {
        let config: SourceConfig = serde_json::from_str(r#"{"kind": "bybit"}"#).unwrap();
        assert_eq!(config.kind, SourceKind::Bybit);
        assert!(config.enabled);
        assert!(config.symbols.is_empty());
        assert_eq!(config.quote_suffix, "USDT");
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_source_error_display() {
        let err = MonitorError::source_failure("binance", "HTTP 418");
        assert_eq!(err.to_string(), "Source binance error: HTTP 418");
    }
}
