use crate::MonitorEvent;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out of monitor events.
///
/// Delivery is best effort: a subscriber that falls more than `capacity`
/// events behind sees `RecvError::Lagged` and loses the overflow. Events
/// published while nobody is subscribed are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => {
                trace!("Published event to {} subscribers", receivers);
                receivers
            }
            Err(_) => {
                debug!("No subscribers for event, dropped");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
