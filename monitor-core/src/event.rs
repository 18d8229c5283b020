use crate::{AnomalyType, EventSource, EventType, MonitorEvent, SystemEventType};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl MonitorEvent {
    pub fn anomaly(
        anomaly_type: AnomalyType,
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            source: EventSource::Anomaly,
            event_type: EventType::Anomaly(anomaly_type),
            data,
        }
    }

    pub fn system(kind: SystemEventType, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: EventSource::Monitor,
            event_type: EventType::System(kind),
            data,
        }
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(self.event_type, EventType::Anomaly(_))
    }
}
