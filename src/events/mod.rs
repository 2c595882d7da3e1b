use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a fresh channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing. Used after a commit,
    /// when the caller's outcome must not depend on event delivery.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Domain event dropped");
        }
    }
}

/// Domain events emitted by the checkout and order services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
        currency: String,
    },
    CartCleared {
        cart_id: Uuid,
        user_id: Uuid,
    },
    PaymentInitiated {
        order_id: Uuid,
        gateway: String,
        reference: String,
    },
    /// The order exists but has no gateway reference; needs a retry or cleanup.
    PaymentInitiationFailed {
        order_id: Uuid,
        gateway: String,
        reason: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total,
                currency,
            } => info!(%order_id, %user_id, %total, %currency, "order created"),
            Event::CartCleared { cart_id, user_id } => {
                info!(%cart_id, %user_id, "cart cleared")
            }
            Event::PaymentInitiated {
                order_id,
                gateway,
                reference,
            } => info!(%order_id, %gateway, %reference, "payment initiated"),
            Event::PaymentInitiationFailed {
                order_id,
                gateway,
                reason,
            } => warn!(
                %order_id,
                %gateway,
                %reason,
                reconciliation_required = true,
                "payment initiation failed"
            ),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
        }
    }

    info!("Event processing loop stopped");
}
