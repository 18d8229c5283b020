use crate::{
    analyzer::{consecutive_decreases, consecutive_increases},
    Alert, AlertKind, AlertLedger, DivergenceThresholds, HistoryStore, Recorded,
};
use monitor_core::{DetectionConfig, Snapshot, SymbolSeries};
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

/// Drops snapshots whose traded volume is under `min_volume`.
pub fn filter_by_volume(snapshots: &[Snapshot], min_volume: f64) -> Vec<Snapshot> {
    snapshots
        .iter()
        .filter(|s| s.meets_volume_floor(min_volume))
        .cloned()
        .collect()
}

/// Watches for funding rates falling while open interest rises.
///
/// Owns the per-symbol history and the alert ledger. Callers are expected
/// to apply [`filter_by_volume`] before [`AnomalyDetector::process`].
pub struct AnomalyDetector {
    thresholds: DivergenceThresholds,
    history: HistoryStore,
    ledger: AlertLedger,
    invalid_snapshots: u64,
}

impl AnomalyDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            thresholds: DivergenceThresholds::from(config),
            history: HistoryStore::new(config.history_capacity),
            ledger: AlertLedger::new(config.ledger_capacity),
            invalid_snapshots: 0,
        }
    }

    /// Drops snapshots that fail validation, logging and counting each one.
    pub fn retain_valid(&mut self, snapshots: &[Snapshot]) -> Vec<Snapshot> {
        snapshots
            .iter()
            .filter(|snapshot| match snapshot.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Skipping snapshot from {}: {}", snapshot.source, e);
                    self.invalid_snapshots += 1;
                    false
                }
            })
            .cloned()
            .collect()
    }

    /// Runs one pass over `snapshots` and returns the alerts it raised.
    pub fn process(&mut self, snapshots: &[Snapshot]) -> Vec<Alert> {
        let valid = self.retain_valid(snapshots);

        valid
            .iter()
            .filter_map(|snapshot| self.process_snapshot(snapshot))
            .collect()
    }

    fn process_snapshot(&mut self, snapshot: &Snapshot) -> Option<Alert> {
        let Recorded {
            changed,
            funding,
            open_interest,
        } = self.history.record_if_changed(
            &snapshot.symbol,
            snapshot.funding_rate,
            snapshot.open_interest,
        );

        if !changed {
            trace!("{}: unchanged reading, skipped", snapshot.symbol);
            return None;
        }

        if funding.len() < self.thresholds.min_history
            || open_interest.len() < self.thresholds.min_history
        {
            trace!(
                "{}: insufficient history ({} of {})",
                snapshot.symbol,
                funding.len(),
                self.thresholds.min_history
            );
            return None;
        }

        let fr_decreases = consecutive_decreases(&funding);
        let oi_increases = consecutive_increases(&open_interest);

        debug!(
            "{}: funding decreases {}, open interest increases {}",
            snapshot.symbol, fr_decreases, oi_increases
        );

        if fr_decreases < self.thresholds.min_funding_decreases
            || oi_increases < self.thresholds.min_oi_increases
        {
            return None;
        }

        if let Some(previous) = self.ledger.recent_within_window(
            &snapshot.symbol,
            self.thresholds.cooldown,
            snapshot.timestamp,
        ) {
            debug!(
                "{}: divergence still active, last alert at {}; suppressed",
                snapshot.symbol, previous.timestamp
            );
            return None;
        }

        let description = format!(
            "Funding/OI divergence on {}: funding rate fell {} times in a row to {:.6}, \
             open interest rose {} times in a row to {:.2}",
            snapshot.symbol,
            fr_decreases,
            snapshot.funding_rate,
            oi_increases,
            snapshot.open_interest
        );

        info!("{}", description);

        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            timestamp: snapshot.timestamp,
            symbol: snapshot.symbol.clone(),
            kind: AlertKind::BothConditions,
            funding_history: funding,
            open_interest_history: open_interest,
            consecutive_fr_decreases: fr_decreases,
            consecutive_oi_increases: oi_increases,
            funding_rate: snapshot.funding_rate,
            open_interest: snapshot.open_interest,
            volume: snapshot.volume,
            description,
        };

        self.ledger.add(alert.clone());
        Some(alert)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.ledger.all()
    }

    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        self.ledger.recent(n)
    }

    pub fn current_data(&self) -> BTreeMap<String, SymbolSeries> {
        self.history.snapshot()
    }

    pub fn symbol_data(&self, symbol: &str) -> Option<SymbolSeries> {
        self.history.get(symbol)
    }

    pub fn thresholds(&self) -> &DivergenceThresholds {
        &self.thresholds
    }

    pub fn symbols_tracked(&self) -> usize {
        self.history.len()
    }

    pub fn alerts_held(&self) -> usize {
        self.ledger.len()
    }

    pub fn invalid_snapshots(&self) -> u64 {
        self.invalid_snapshots
    }
}
