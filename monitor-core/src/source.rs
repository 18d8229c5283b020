use crate::{Result, Snapshot};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Anything that can produce a batch of market snapshots on demand.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Snapshot>>;
    fn name(&self) -> &str;
}

/// Polls several sources and merges their batches.
///
/// Sources are consulted in insertion order; when two of them report the
/// same symbol the earlier source's snapshot is kept.
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn SnapshotSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: Arc<dyn SnapshotSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Never fails: a source that errors is logged and contributes nothing.
    pub async fn fetch_all(&self) -> Vec<Snapshot> {
        let results = join_all(self.sources.iter().map(|source| source.fetch())).await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => {
                    info!("Fetched {} snapshots from {}", batch.len(), source.name());
                    for snapshot in batch {
                        if seen.insert(snapshot.symbol.clone()) {
                            merged.push(snapshot);
                        }
                    }
                }
                Err(e) => {
                    warn!("Source {} failed, skipping this pass: {}", source.name(), e);
                }
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MonitorError;
    use chrono::Utc;

    struct StaticSource {
        name: String,
        snapshots: Vec<Snapshot>,
    }

    #[async_trait]
    impl SnapshotSource for StaticSource {
        async fn fetch(&self) -> Result<Vec<Snapshot>> {
            Ok(self.snapshots.clone())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SnapshotSource for FailingSource {
        async fn fetch(&self) -> Result<Vec<Snapshot>> {
            Err(MonitorError::source_failure("failing", "connection refused"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn source(name: &str, symbols: &[&str]) -> Arc<dyn SnapshotSource> {
        let now = Utc::now();
        Arc::new(StaticSource {
            name: name.to_string(),
            snapshots: symbols
                .iter()
                .map(|s| Snapshot::new(name, *s, now, 0.0001, 1.0, 1.0))
                .collect(),
        })
    }

    #[tokio::test]
    async fn test_first_source_wins_on_duplicate_symbol() {
        let mut set = SourceSet::new();
        set.add_source(source("binance", &["BTCUSDT", "ETHUSDT"]));
        set.add_source(source("bybit", &["ETHUSDT", "SOLUSDT"]));

        let merged = set.fetch_all().await;
        assert_eq!(merged.len(), 3);

        let eth = merged.iter().find(|s| s.symbol == "ETHUSDT").unwrap();
        assert_eq!(eth.source, "binance");
    }

    #[tokio::test]
    async fn test_failing_source_is_skipped() {
        let mut set = SourceSet::new();
        set.add_source(Arc::new(FailingSource));
        set.add_source(source("bybit", &["SOLUSDT"]));

        let merged = set.fetch_all().await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].symbol, "SOLUSDT");
        assert_eq!(set.names(), vec!["failing".to_string(), "bybit".to_string()]);
    }
}
