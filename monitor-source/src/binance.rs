use crate::{http_client, SymbolFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use monitor_core::{
    model::{parse_decimal, resolve_volume},
    MonitorError, Result, Snapshot, SnapshotSource, SourceConfig,
};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const OPEN_INTEREST_CONCURRENCY: usize = 8;

/// Binance USD-M perpetual futures over the public REST API.
///
/// Funding and volume come from two bulk endpoints; open interest has to be
/// requested per symbol, so only symbols already above the volume floor are
/// queried.
#[derive(Debug)]
pub struct BinanceFuturesSource {
    client: Client,
    base_url: String,
    filter: SymbolFilter,
    min_volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    symbol: String,
    mark_price: Option<String>,
    last_funding_rate: Option<String>,
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    quote_volume: Option<String>,
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterest {
    open_interest: Option<String>,
}

/// Funding, mark price and volume for one symbol before open interest is known.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    symbol: String,
    timestamp: DateTime<Utc>,
    funding_rate: f64,
    mark_price: f64,
    volume: f64,
}

impl BinanceFuturesSource {
    pub fn new(config: &SourceConfig, min_volume: f64) -> Result<Self> {
        Ok(Self {
            client: http_client(config.request_timeout_secs)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            filter: SymbolFilter::new(&config.symbols, &config.quote_suffix),
            min_volume,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::source_failure(
                self.name(),
                format!("{} returned {}: {}", path, status, body),
            ));
        }

        Ok(response.json::<T>().await?)
    }

    async fn open_interest_notional(&self, candidate: &Candidate) -> Option<f64> {
        let path = format!("/fapi/v1/openInterest?symbol={}", candidate.symbol);
        match self.get_json::<OpenInterest>(&path).await {
            Ok(oi) => parse_decimal(oi.open_interest.as_deref()).map(|c| c * candidate.mark_price),
            Err(e) => {
                warn!("Open interest unavailable for {}: {}", candidate.symbol, e);
                None
            }
        }
    }
}

fn candidates(
    premiums: Vec<PremiumIndex>,
    tickers: Vec<Ticker24h>,
    filter: &SymbolFilter,
    min_volume: f64,
    fetched_at: DateTime<Utc>,
) -> Vec<Candidate> {
    let volumes: HashMap<String, f64> = tickers
        .into_iter()
        .filter_map(|t| {
            let volume = resolve_volume(
                parse_decimal(t.quote_volume.as_deref()),
                parse_decimal(t.volume.as_deref()),
                None,
            )?;
            Some((t.symbol, volume))
        })
        .collect();

    premiums
        .into_iter()
        .filter(|p| filter.accepts(&p.symbol))
        .filter_map(|p| {
            let funding_rate = parse_decimal(p.last_funding_rate.as_deref());
            let mark_price = parse_decimal(p.mark_price.as_deref());
            let volume = volumes.get(&p.symbol).copied();

            let (Some(funding_rate), Some(mark_price), Some(volume)) =
                (funding_rate, mark_price, volume)
            else {
                debug!("Dropping incomplete Binance record for {}", p.symbol);
                return None;
            };

            let timestamp = p
                .time
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or(fetched_at);

            Some(Candidate {
                symbol: p.symbol,
                timestamp,
                funding_rate,
                mark_price,
                volume,
            })
        })
        .filter(|c| c.volume >= min_volume)
        .collect()
}

#[async_trait]
impl SnapshotSource for BinanceFuturesSource {
    async fn fetch(&self) -> Result<Vec<Snapshot>> {
        let fetched_at = Utc::now();
        let (premiums, tickers) = tokio::try_join!(
            self.get_json::<Vec<PremiumIndex>>("/fapi/v1/premiumIndex"),
            self.get_json::<Vec<Ticker24h>>("/fapi/v1/ticker/24hr"),
        )?;

        let liquid = candidates(premiums, tickers, &self.filter, self.min_volume, fetched_at);
        debug!("Binance: {} liquid symbols, querying open interest", liquid.len());

        let snapshots = stream::iter(liquid)
            .map(|candidate| async move {
                let open_interest = self.open_interest_notional(&candidate).await?;
                Some(Snapshot::new(
                    self.name(),
                    candidate.symbol,
                    candidate.timestamp,
                    candidate.funding_rate,
                    open_interest,
                    candidate.volume,
                ))
            })
            .buffer_unordered(OPEN_INTEREST_CONCURRENCY)
            .filter_map(|snapshot| async move { snapshot })
            .collect::<Vec<_>>()
            .await;

        Ok(snapshots)
    }

    fn name(&self) -> &str {
        "binance"
    }
}
