pub mod binance;
pub mod bybit;

pub use binance::BinanceFuturesSource;
pub use bybit::BybitLinearSource;

use monitor_core::{Result, SourceConfig, SourceKind, SourceSet};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Which exchange symbols a source reports on.
#[derive(Debug, Clone)]
pub struct SymbolFilter {
    allow: HashSet<String>,
    quote_suffix: String,
}

impl SymbolFilter {
    pub fn new(symbols: &[String], quote_suffix: &str) -> Self {
        Self {
            allow: symbols.iter().map(|s| s.to_uppercase()).collect(),
            quote_suffix: quote_suffix.to_uppercase(),
        }
    }

    pub fn accepts(&self, symbol: &str) -> bool {
        if !self.allow.is_empty() {
            return self.allow.contains(symbol);
        }
        symbol.ends_with(&self.quote_suffix)
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?;
    Ok(client)
}

/// Builds the enabled sources in configuration order.
pub fn build_sources(configs: &[SourceConfig], min_volume: f64) -> Result<SourceSet> {
    let mut set = SourceSet::new();

    for config in configs.iter().filter(|c| c.enabled) {
        match config.kind {
            SourceKind::Binance => {
                set.add_source(Arc::new(BinanceFuturesSource::new(config, min_volume)?));
            }
            SourceKind::Bybit => {
                set.add_source(Arc::new(BybitLinearSource::new(config)?));
            }
        }
        info!("Configured snapshot source {:?}", config.kind);
    }

    Ok(set)
}
