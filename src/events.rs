use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the cart and reservation services.
///
/// Delivery is best-effort over an in-process channel; event loss never
/// affects the correctness of the reservation path, which relies solely on
/// the storage layer's conditional update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartCleared(Uuid),

    // Reservation events
    ItemReserved {
        item_id: Uuid,
        user_id: String,
    },
    ItemReleased(Uuid),

    // Reconciliation events
    SweepCompleted {
        mode: String,
        updated: u64,
        failed_batches: u64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Processes events from the receiver channel until it closes.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CartCreated(cart_id) => {
                info!(%cart_id, "Cart created");
            }
            Event::CartItemAdded { cart_id, item_id } => {
                info!(%cart_id, %item_id, "Item added to cart");
            }
            Event::CartCleared(cart_id) => {
                info!(%cart_id, "Cart cleared");
            }
            Event::ItemReserved { item_id, user_id } => {
                info!(%item_id, user_id = %user_id, "Item reserved");
            }
            Event::ItemReleased(item_id) => {
                info!(%item_id, "Item released");
            }
            Event::SweepCompleted {
                mode,
                updated,
                failed_batches,
            } => {
                info!(mode = %mode, updated, failed_batches, "Reconciliation sweep completed");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::CartCreated(Uuid::new_v4()))
            .await
            .expect("send should succeed");

        assert!(matches!(rx.recv().await, Some(Event::CartCreated(_))));
    }

    #[tokio::test]
    async fn test_send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out.
        sender.send_or_log(Event::ItemReleased(Uuid::new_v4())).await;
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::SweepCompleted {
            mode: "stale".to_string(),
            updated: 3,
            failed_batches: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("SweepCompleted"));
        assert!(json.contains("stale"));
    }
}
