use crate::{Notification, NotificationChannel};
use async_trait::async_trait;
use monitor_core::Result;
use tracing::warn;

/// Writes notifications to the application log.
#[derive(Debug, Default)]
pub struct LogNotifier {
    enabled: bool,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        warn!(
            symbol = %notification.symbol,
            level = ?notification.level,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "Log"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
