use crate::{Notification, NotificationChannel};
use monitor_anomaly::Alert;
use monitor_core::{EventBus, MonitorError, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
pub struct NotificationManager {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Box<dyn NotificationChannel>) {
        info!("Registered notification channel {}", channel.name());
        self.channels.push(channel);
    }

    /// Delivers to every enabled channel. A failing channel is logged and
    /// does not stop the others.
    pub async fn send_all(&self, notification: &Notification) -> Result<()> {
        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            debug!("Sending notification via {}", channel.name());
            if let Err(e) = channel.send(notification).await {
                error!("Failed to send via {}: {}", channel.name(), e);
            }
        }

        Ok(())
    }

    pub async fn send_to_channel(
        &self,
        channel_name: &str,
        notification: &Notification,
    ) -> Result<()> {
        for channel in &self.channels {
            if channel.name() == channel_name && channel.is_enabled() {
                return channel.send(notification).await;
            }
        }

        Err(MonitorError::Notification(format!(
            "Channel {} not found or disabled",
            channel_name
        )))
    }

    pub fn get_enabled_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name().to_string())
            .collect()
    }
}

/// Drains anomaly events from the bus into the manager until the bus closes.
pub fn spawn_alert_forwarder(bus: &EventBus, manager: Arc<NotificationManager>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.is_anomaly() => {
                    match serde_json::from_value::<Alert>(event.data) {
                        Ok(alert) => {
                            let notification = Notification::from_alert(&alert);
                            if let Err(e) = manager.send_all(&notification).await {
                                error!("Failed to dispatch notification: {}", e);
                            }
                        }
                        Err(e) => error!("Failed to decode alert event: {}", e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!("Notification forwarder lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Notification forwarder stopped");
    })
}
