use crate::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation of a perpetual contract's funding and positioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub funding_rate: f64,
    pub open_interest: f64,
    /// 24h traded value in quote currency.
    pub volume: f64,
}

impl Snapshot {
    pub fn new(
        source: impl Into<String>,
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        funding_rate: f64,
        open_interest: f64,
        volume: f64,
    ) -> Self {
        Self {
            source: source.into(),
            symbol: symbol.into(),
            timestamp,
            funding_rate,
            open_interest,
            volume,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(MonitorError::InvalidSnapshot(format!(
                "missing symbol (source {})",
                self.source
            )));
        }

        let fields = [
            ("funding_rate", self.funding_rate),
            ("open_interest", self.open_interest),
            ("volume", self.volume),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MonitorError::InvalidSnapshot(format!(
                "{}: non-finite {} ({})",
                self.symbol, name, value
            )));
        }

        Ok(())
    }

    pub fn meets_volume_floor(&self, min_volume: f64) -> bool {
        self.volume >= min_volume
    }
}

/// Copy of one symbol's recorded history, as served to dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolSeries {
    pub funding_history: Vec<f64>,
    pub open_interest_history: Vec<f64>,
}

/// Picks the traded volume the way exchanges report it: quote volume first,
/// then base volume, then any precomputed total.
pub fn resolve_volume(
    quote_volume: Option<f64>,
    base_volume: Option<f64>,
    precomputed_total: Option<f64>,
) -> Option<f64> {
    [quote_volume, base_volume, precomputed_total]
        .into_iter()
        .flatten()
        .find(|v| v.is_finite())
}

/// Exchange REST payloads carry numbers as strings.
pub fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
