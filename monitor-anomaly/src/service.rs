use crate::{detector::filter_by_volume, Alert, AnomalyDetector};
use chrono::{DateTime, Utc};
use monitor_core::{
    AnomalyType, DetectionConfig, EventBus, MonitorEvent, Snapshot, SymbolSeries,
    SystemEventType,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed {
        received: usize,
        analyzed: usize,
        alerts: Vec<Alert>,
    },
    /// Another pass was still running.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub started_at: DateTime<Utc>,
    pub passes_completed: u64,
    pub passes_skipped: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub symbols_tracked: usize,
    pub alerts_held: usize,
    pub invalid_snapshots: u64,
}

/// Owns the detector for the lifetime of the service and serialises passes.
///
/// Created once at start-up and shared behind an `Arc`. Only one pass runs
/// at a time; readers never make a pass skip. New alerts are published on
/// the [`EventBus`] after the detector lock is released.
pub struct DetectionService {
    detector: Mutex<AnomalyDetector>,
    pass_running: AtomicBool,
    bus: EventBus,
    min_volume: f64,
    started_at: DateTime<Utc>,
    last_pass_at: Mutex<Option<DateTime<Utc>>>,
    passes_completed: AtomicU64,
    passes_skipped: AtomicU64,
}

/// Exclusive right to run one detection pass, released on drop.
///
/// Taken before fetching so a slow fetch blocks the next tick's pass too.
pub struct PassGuard {
    service: Arc<DetectionService>,
}

impl PassGuard {
    pub fn run(self, batch: &[Snapshot]) -> PassOutcome {
        self.service.process_batch(batch)
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.service.pass_running.store(false, Ordering::Release);
    }
}

struct PassFlag<'a>(&'a AtomicBool);

impl Drop for PassFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DetectionService {
    pub fn new(config: &DetectionConfig, bus: EventBus) -> Self {
        Self {
            detector: Mutex::new(AnomalyDetector::new(config)),
            pass_running: AtomicBool::new(false),
            bus,
            min_volume: config.min_volume,
            started_at: Utc::now(),
            last_pass_at: Mutex::new(None),
            passes_completed: AtomicU64::new(0),
            passes_skipped: AtomicU64::new(0),
        }
    }

    /// Claims the next pass, or records a skip if one is still running.
    pub fn try_begin_pass(self: &Arc<Self>) -> Option<PassGuard> {
        if !self.claim_pass() {
            return None;
        }
        Some(PassGuard {
            service: Arc::clone(self),
        })
    }

    /// Validates, applies the volume floor, runs the detector and publishes
    /// new alerts. If a previous pass is still running this one is skipped.
    pub fn run_pass(&self, batch: &[Snapshot]) -> PassOutcome {
        if !self.claim_pass() {
            return PassOutcome::Skipped;
        }
        let _release = PassFlag(&self.pass_running);
        self.process_batch(batch)
    }

    fn claim_pass(&self) -> bool {
        if self
            .pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }

        warn!("Detection pass still running, skipping this tick");
        self.passes_skipped.fetch_add(1, Ordering::Relaxed);
        self.bus.publish(MonitorEvent::system(
            SystemEventType::PassSkipped,
            serde_json::Value::Null,
        ));
        false
    }

    fn process_batch(&self, batch: &[Snapshot]) -> PassOutcome {
        let (analyzed, alerts) = {
            let mut detector = self.detector.lock();
            let valid = detector.retain_valid(batch);
            let liquid = filter_by_volume(&valid, self.min_volume);
            (liquid.len(), detector.process(&liquid))
        };

        *self.last_pass_at.lock() = Some(Utc::now());
        self.passes_completed.fetch_add(1, Ordering::Relaxed);

        info!(
            "Detection pass: {} snapshots received, {} above volume floor, {} new alerts",
            batch.len(),
            analyzed,
            alerts.len()
        );

        for alert in &alerts {
            self.publish_alert(alert);
        }
        self.bus.publish(MonitorEvent::system(
            SystemEventType::PassCompleted,
            serde_json::json!({
                "received": batch.len(),
                "analyzed": analyzed,
                "alerts": alerts.len(),
            }),
        ));

        PassOutcome::Completed {
            received: batch.len(),
            analyzed,
            alerts,
        }
    }

    fn publish_alert(&self, alert: &Alert) {
        match serde_json::to_value(alert) {
            Ok(data) => {
                let event =
                    MonitorEvent::anomaly(AnomalyType::FundingOiDivergence, alert.timestamp, data);
                self.bus.publish(event);
            }
            Err(e) => error!("Failed to serialize alert for {}: {}", alert.symbol, e),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.detector.lock().alerts()
    }

    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        self.detector.lock().recent_alerts(n)
    }

    pub fn current_data(&self) -> BTreeMap<String, SymbolSeries> {
        self.detector.lock().current_data()
    }

    pub fn symbol_data(&self, symbol: &str) -> Option<SymbolSeries> {
        self.detector.lock().symbol_data(symbol)
    }

    pub fn status(&self) -> DetectorStatus {
        let detector = self.detector.lock();
        DetectorStatus {
            started_at: self.started_at,
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_skipped: self.passes_skipped.load(Ordering::Relaxed),
            last_pass_at: *self.last_pass_at.lock(),
            symbols_tracked: detector.symbols_tracked(),
            alerts_held: detector.alerts_held(),
            invalid_snapshots: detector.invalid_snapshots(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn min_volume(&self) -> f64 {
        self.min_volume
    }
}
