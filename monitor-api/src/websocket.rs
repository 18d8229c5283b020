use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use monitor_anomaly::Alert;
use monitor_core::EventBus;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    pub msg_type: WsMessageType,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WsMessageType {
    Subscribe,
    Unsubscribe,
    Alert,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// `alerts` or `all`.
    pub channel: String,
    /// Empty means every symbol.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Subscription {
    pub fn wants_alert(&self, symbol: &str) -> bool {
        (self.channel == "alerts" || self.channel == "all")
            && (self.symbols.is_empty() || self.symbols.iter().any(|s| s == symbol))
    }
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let client_id = uuid::Uuid::new_v4();
    state.add_websocket_client(client_id, tx);

    info!("WebSocket client connected: {}", client_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(ws_msg) => handle_client_message(ws_msg, &recv_state, client_id),
                    Err(e) => debug!("Ignoring malformed message from {}: {}", client_id, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.remove_websocket_client(client_id);
    info!("WebSocket client disconnected: {}", client_id);
}

fn handle_client_message(msg: WsMessage, state: &AppState, client_id: uuid::Uuid) {
    match msg.msg_type {
        WsMessageType::Subscribe => {
            if let Ok(sub) = serde_json::from_value::<Subscription>(msg.data) {
                info!("Client {} subscribed to {}", client_id, sub.channel);
                state.add_subscription(client_id, sub);
            }
        }
        WsMessageType::Unsubscribe => {
            if let Ok(sub) = serde_json::from_value::<Subscription>(msg.data) {
                info!("Client {} unsubscribed from {}", client_id, sub.channel);
                state.remove_subscription(client_id, &sub);
            }
        }
        WsMessageType::Heartbeat => {
            if let Some(tx) = state.get_websocket_client(client_id) {
                let _ = tx.send(WsMessage {
                    msg_type: WsMessageType::Heartbeat,
                    data: serde_json::json!({"timestamp": chrono::Utc::now()}),
                });
            }
        }
        WsMessageType::Alert => {
            warn!("Unexpected message type from client: {:?}", msg.msg_type);
        }
    }
}

pub fn broadcast_alert(state: &AppState, alert: &Alert) -> usize {
    let data = match serde_json::to_value(alert) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize alert: {}", e);
            return 0;
        }
    };
    let msg = WsMessage {
        msg_type: WsMessageType::Alert,
        data,
    };

    state.broadcast_to_subscribers(&msg, |sub| sub.wants_alert(&alert.symbol))
}

/// Pushes every anomaly event on the bus to subscribed WebSocket clients.
/// Delivery is best effort; a lagging forwarder drops what it missed.
pub fn spawn_ws_forwarder(bus: &EventBus, state: AppState) -> JoinHandle<()> {
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.is_anomaly() => {
                    match serde_json::from_value::<Alert>(event.data) {
                        Ok(alert) => {
                            let delivered = broadcast_alert(&state, &alert);
                            debug!("Alert for {} pushed to {} clients", alert.symbol, delivered);
                        }
                        Err(e) => error!("Failed to decode alert event: {}", e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!("WebSocket forwarder lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("WebSocket forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_filter() {
        let all = Subscription {
            channel: "all".to_string(),
            symbols: vec![],
        };
        assert!(all.wants_alert("BTCUSDT"));

        let btc_only = Subscription {
            channel: "alerts".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
        };
        assert!(btc_only.wants_alert("BTCUSDT"));
        assert!(!btc_only.wants_alert("ETHUSDT"));

        let other = Subscription {
            channel: "status".to_string(),
            symbols: vec![],
        };
        assert!(!other.wants_alert("BTCUSDT"));
    }

    #[test]
    fn test_client_message_parses() {
        let msg: WsMessage = serde_json::from_str(
            r#"{"msg_type": "Subscribe", "data": {"channel": "alerts"}}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_type, WsMessageType::Subscribe);

        let sub: Subscription = serde_json::from_value(msg.data).unwrap();
        assert_eq!(sub.channel, "alerts");
        assert!(sub.symbols.is_empty());
    }

    #[test]
    fn test_subscribe_then_heartbeat() {
        let state = AppState::new();
        let client_id = uuid::Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.add_websocket_client(client_id, tx);

        handle_client_message(
            WsMessage {
                msg_type: WsMessageType::Subscribe,
                data: serde_json::json!({"channel": "alerts"}),
            },
            &state,
            client_id,
        );
        assert_eq!(state.subscriptions.get(&client_id).map(|s| s.len()), Some(1));

        handle_client_message(
            WsMessage {
                msg_type: WsMessageType::Heartbeat,
                data: serde_json::Value::Null,
            },
            &state,
            client_id,
        );
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.msg_type, WsMessageType::Heartbeat);
    }
}
