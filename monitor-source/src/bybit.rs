use crate::{http_client, SymbolFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use monitor_core::{
    model::{parse_decimal, resolve_volume},
    MonitorError, Result, Snapshot, SnapshotSource, SourceConfig,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

/// Bybit v5 linear perpetuals. One tickers call carries everything needed.
#[derive(Debug)]
pub struct BybitLinearSource {
    client: Client,
    base_url: String,
    filter: SymbolFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickersResponse {
    ret_code: i64,
    ret_msg: String,
    result: Option<TickersResult>,
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    list: Vec<LinearTicker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearTicker {
    symbol: String,
    funding_rate: Option<String>,
    open_interest_value: Option<String>,
    #[serde(rename = "turnover24h")]
    turnover_24h: Option<String>,
    #[serde(rename = "volume24h")]
    volume_24h: Option<String>,
}

impl BybitLinearSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.request_timeout_secs)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            filter: SymbolFilter::new(&config.symbols, &config.quote_suffix),
        })
    }
}

fn snapshots_from_response(
    response: TickersResponse,
    filter: &SymbolFilter,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Snapshot>> {
    if response.ret_code != 0 {
        return Err(MonitorError::source_failure(
            "bybit",
            format!("retCode {}: {}", response.ret_code, response.ret_msg),
        ));
    }

    let timestamp = response
        .time
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(fetched_at);

    let tickers = response.result.map(|r| r.list).unwrap_or_default();

    let snapshots = tickers
        .into_iter()
        .filter(|t| filter.accepts(&t.symbol))
        .filter_map(|t| {
            let funding_rate = parse_decimal(t.funding_rate.as_deref());
            let open_interest = parse_decimal(t.open_interest_value.as_deref());
            let volume = resolve_volume(
                parse_decimal(t.turnover_24h.as_deref()),
                parse_decimal(t.volume_24h.as_deref()),
                None,
            );

            match (funding_rate, open_interest, volume) {
                (Some(funding_rate), Some(open_interest), Some(volume)) => Some(Snapshot::new(
                    "bybit",
                    t.symbol,
                    timestamp,
                    funding_rate,
                    open_interest,
                    volume,
                )),
                _ => {
                    debug!("Dropping incomplete Bybit record for {}", t.symbol);
                    None
                }
            }
        })
        .collect();

    Ok(snapshots)
}

#[async_trait]
impl SnapshotSource for BybitLinearSource {
    async fn fetch(&self) -> Result<Vec<Snapshot>> {
        let fetched_at = Utc::now();
        let url = format!("{}/v5/market/tickers?category=linear", self.base_url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::source_failure(
                self.name(),
                format!("tickers returned {}: {}", status, body),
            ));
        }

        let payload = response.json::<TickersResponse>().await?;
        snapshots_from_response(payload, &self.filter, fetched_at)
    }

    fn name(&self) -> &str {
        "bybit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "retCode": 0,
        "retMsg": "OK",
        "result": {
            "category": "linear",
            "list": [
                {
                    "symbol": "BTCUSDT",
                    "lastPrice": "67000.00",
                    "fundingRate": "-0.00012",
                    "openInterest": "52000.1",
                    "openInterestValue": "3484006700.00",
                    "turnover24h": "12000000000.5",
                    "volume24h": "180000.2"
                },
                {
                    "symbol": "ETHUSDT",
                    "fundingRate": "0.0001",
                    "openInterestValue": "1500000000",
                    "volume24h": "75000000"
                },
                {
                    "symbol": "ETHPERP",
                    "fundingRate": "0.0001",
                    "openInterestValue": "1",
                    "turnover24h": "1"
                },
                {
                    "symbol": "NEWUSDT",
                    "fundingRate": "",
                    "openInterestValue": "10",
                    "turnover24h": "10"
                }
            ]
        },
        "time": 1717228800000
    }"#;

    #[test]
    fn test_parse_tickers() {
        let response: TickersResponse = serde_json::from_str(PAYLOAD).unwrap();
        let filter = SymbolFilter::new(&[], "USDT");
        let snapshots = snapshots_from_response(response, &filter, Utc::now()).unwrap();

        assert_eq!(snapshots.len(), 2);

        let btc = &snapshots[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert_eq!(btc.source, "bybit");
        assert_eq!(btc.funding_rate, -0.00012);
        assert_eq!(btc.open_interest, 3_484_006_700.0);
        assert_eq!(btc.volume, 12_000_000_000.5);
        assert_eq!(btc.timestamp.timestamp_millis(), 1_717_228_800_000);

        // No turnover: falls back to base volume.
        assert_eq!(snapshots[1].volume, 75_000_000.0);
    }

    #[test]
    fn test_error_ret_code() {
        let response: TickersResponse = serde_json::from_str(
            r#"{"retCode": 10006, "retMsg": "Too many visits!", "result": null, "time": 1}"#,
        )
        .unwrap();
        let filter = SymbolFilter::new(&[], "USDT");
        let err = snapshots_from_response(response, &filter, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("Too many visits"));
    }
}
