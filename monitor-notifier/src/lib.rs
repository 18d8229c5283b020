pub mod email;
pub mod logger;
pub mod manager;
pub mod telegram;

use async_trait::async_trait;
use monitor_anomaly::Alert;
use monitor_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: AlertLevel,
    pub symbol: String,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl Notification {
    pub fn from_alert(alert: &Alert) -> Self {
        // Both series running well past the trigger is a stronger signal.
        let level = if alert.consecutive_fr_decreases >= 8 && alert.consecutive_oi_increases >= 8 {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };

        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: alert.timestamp,
            level,
            symbol: alert.symbol.clone(),
            title: format!("Funding/OI divergence on {}", alert.symbol),
            message: alert.description.clone(),
            data: serde_json::to_value(alert).ok(),
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync + Debug {
    async fn send(&self, notification: &Notification) -> Result<()>;
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
}

pub fn format_notification_message(notification: &Notification) -> String {
    let emoji = match notification.level {
        AlertLevel::Critical => "🚨",
        AlertLevel::Warning => "⚠️",
        AlertLevel::Info => "ℹ️",
    };

    format!(
        "{} *{}*\n\n{}\n\n_Time: {}_",
        emoji,
        notification.title,
        notification.message,
        notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_alert() {
        let notification = Notification::from_alert(&test_support::alert(5, 5));
        assert_eq!(notification.level, AlertLevel::Warning);
        assert_eq!(notification.symbol, "BTCUSDT");
        assert_eq!(notification.title, "Funding/OI divergence on BTCUSDT");
        let data = notification.data.unwrap();
        assert_eq!(data["consecutive_fr_decreases"], 5);

        let strong = Notification::from_alert(&test_support::alert(9, 8));
        assert_eq!(strong.level, AlertLevel::Critical);
    }

    #[test]
    fn test_format_message() {
        let notification = Notification::from_alert(&test_support::alert(5, 5));
        let text = format_notification_message(&notification);
        assert!(text.starts_with("⚠️ *Funding/OI divergence on BTCUSDT*"));
        assert!(text.ends_with("_Time: 2024-06-01 12:30:00 UTC_"));
    }
}
