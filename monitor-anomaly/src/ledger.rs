use crate::Alert;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Most recent alerts, newest first, bounded to `capacity`.
#[derive(Debug, Clone)]
pub struct AlertLedger {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&mut self, alert: Alert) {
        self.alerts.push_front(alert);
        self.alerts.truncate(self.capacity);
    }

    /// The newest alert for `symbol` raised less than `window` before `now`.
    pub fn recent_within_window(
        &self,
        symbol: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<&Alert> {
        self.alerts
            .iter()
            .find(|alert| alert.symbol == symbol && now - alert.timestamp < window)
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn recent(&self, n: usize) -> Vec<Alert> {
        self.alerts.iter().take(n).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
