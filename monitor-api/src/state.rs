use crate::websocket::{Subscription, WsMessage};
use dashmap::DashMap;
use monitor_anomaly::DetectionService;
use monitor_core::{MonitorError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct AppState {
    detector: Arc<RwLock<Option<Arc<DetectionService>>>>,
    pub websocket_clients: Arc<DashMap<Uuid, mpsc::UnboundedSender<WsMessage>>>,
    pub subscriptions: Arc<DashMap<Uuid, Vec<Subscription>>>,
}

impl AppState {
    /// State with no detector attached; queries answer 503 until `attach`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(detector: Arc<DetectionService>) -> Self {
        let state = Self::new();
        state.attach(detector);
        state
    }

    pub fn attach(&self, detector: Arc<DetectionService>) {
        *self.detector.write() = Some(detector);
    }

    pub fn detector(&self) -> Result<Arc<DetectionService>> {
        self.detector
            .read()
            .clone()
            .ok_or(MonitorError::DetectorUninitialized)
    }

    pub fn add_websocket_client(&self, client_id: Uuid, tx: mpsc::UnboundedSender<WsMessage>) {
        self.websocket_clients.insert(client_id, tx);
    }

    pub fn remove_websocket_client(&self, client_id: Uuid) {
        self.websocket_clients.remove(&client_id);
        self.subscriptions.remove(&client_id);
    }

    pub fn get_websocket_client(&self, client_id: Uuid) -> Option<mpsc::UnboundedSender<WsMessage>> {
        self.websocket_clients.get(&client_id).map(|c| c.clone())
    }

    pub fn add_subscription(&self, client_id: Uuid, subscription: Subscription) {
        let mut subs = self.subscriptions.entry(client_id).or_default();
        subs.retain(|s| s.channel != subscription.channel);
        subs.push(subscription);
    }

    pub fn remove_subscription(&self, client_id: Uuid, subscription: &Subscription) {
        if let Some(mut subs) = self.subscriptions.get_mut(&client_id) {
            subs.retain(|s| s.channel != subscription.channel);
        }
    }

    /// Sends to every client with at least one matching subscription.
    /// Returns how many clients the message was queued for.
    pub fn broadcast_to_subscribers<F>(&self, message: &WsMessage, filter: F) -> usize
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut delivered = 0;
        for entry in self.subscriptions.iter() {
            if !entry.value().iter().any(&filter) {
                continue;
            }
            if let Some(tx) = self.websocket_clients.get(entry.key()) {
                if tx.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::WsMessageType;
    use monitor_core::{DetectionConfig, EventBus};

    fn subscription(channel: &str) -> Subscription {
        Subscription {
            channel: channel.to_string(),
            symbols: vec![],
        }
    }

    #[test]
    fn test_detector_requires_attach() {
        let state = AppState::new();
        assert!(matches!(
            state.detector(),
            Err(MonitorError::DetectorUninitialized)
        ));

        let service = Arc::new(DetectionService::new(
            &DetectionConfig::default(),
            EventBus::default(),
        ));
        state.clone().attach(service);
        assert!(state.detector().is_ok());
    }

    #[test]
    fn test_broadcast_respects_subscriptions() {
        let state = AppState::new();
        let (alerts_tx, mut alerts_rx) = mpsc::unbounded_channel();
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let alerts_client = Uuid::new_v4();
        let status_client = Uuid::new_v4();

        state.add_websocket_client(alerts_client, alerts_tx);
        state.add_websocket_client(status_client, status_tx);
        state.add_subscription(alerts_client, subscription("alerts"));
        state.add_subscription(status_client, subscription("status"));

        let message = WsMessage {
            msg_type: WsMessageType::Alert,
            data: serde_json::json!({"symbol": "BTCUSDT"}),
        };
        let delivered = state.broadcast_to_subscribers(&message, |s| s.channel == "alerts");

        assert_eq!(delivered, 1);
        assert!(alerts_rx.try_recv().is_ok());
        assert!(status_rx.try_recv().is_err());

        state.remove_websocket_client(alerts_client);
        assert!(state.get_websocket_client(alerts_client).is_none());
        assert!(!state.subscriptions.contains_key(&alerts_client));
    }

    #[test]
    fn test_resubscribe_replaces_channel() {
        let state = AppState::new();
        let client = Uuid::new_v4();
        state.add_subscription(client, subscription("alerts"));
        state.add_subscription(client, subscription("alerts"));
        assert_eq!(state.subscriptions.get(&client).map(|s| s.len()), Some(1));

        state.remove_subscription(client, &subscription("alerts"));
        assert_eq!(state.subscriptions.get(&client).map(|s| s.len()), Some(0));
    }
}
