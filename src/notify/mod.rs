//! Best-effort fan-out of dispatch events.
//!
//! The engine only sees the [`Notifier`] trait; the composing application
//! decides what sits behind it. Publishing never fails the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::drone::GeoPoint;
use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "scope", content = "id")]
pub enum EventKey {
    Order(Uuid),
    Drone(Uuid),
    Fleet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DispatchEvent {
    OrderAssigned {
        order_id: Uuid,
        drone_id: Uuid,
        estimated_delivery_at: Option<DateTime<Utc>>,
        handoff: bool,
    },
    LocationUpdated {
        order_id: Uuid,
        drone_id: Uuid,
        location: GeoPoint,
        estimated_delivery_at: Option<DateTime<Utc>>,
    },
    DroneBroken {
        drone_id: Uuid,
        order_id: Option<Uuid>,
        handoff_id: Option<Uuid>,
        location: GeoPoint,
        reason: String,
    },
    RescueAssigned {
        handoff_id: Uuid,
        order_id: Uuid,
        broken_drone_id: Uuid,
        rescue_drone_id: Uuid,
    },
    LowBattery {
        drone_id: Uuid,
        battery_level: f64,
        order_id: Option<Uuid>,
    },
    OrderCompleted {
        order_id: Uuid,
        drone_id: Uuid,
        status: OrderStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub key: EventKey,
    pub event: DispatchEvent,
    pub emitted_at: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn publish(&self, key: EventKey, event: DispatchEvent);

    fn publish_all(&self, keys: &[EventKey], event: DispatchEvent) {
        for key in keys {
            self.publish(*key, event.clone());
        }
    }
}

/// Notifier backed by a tokio broadcast channel. Slow subscribers lag and
/// drop events; nobody listening is not an error.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, key: EventKey, event: DispatchEvent) {
        let notification = Notification {
            key,
            event,
            emitted_at: Utc::now(),
        };
        if let Err(err) = self.tx.send(notification) {
            debug!(key = ?err.0.key, "no subscribers for dispatch event");
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{BroadcastNotifier, DispatchEvent, EventKey, Notifier};

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::new(8);
        notifier.publish(
            EventKey::Fleet,
            DispatchEvent::OrderCompleted {
                order_id: Uuid::new_v4(),
                drone_id: Uuid::new_v4(),
                status: crate::models::order::OrderStatus::Delivered,
            },
        );
    }

    #[test]
    fn publish_all_fans_out_one_notification_per_key() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let order_id = Uuid::new_v4();
        let drone_id = Uuid::new_v4();

        notifier.publish_all(
            &[EventKey::Order(order_id), EventKey::Fleet],
            DispatchEvent::OrderAssigned {
                order_id,
                drone_id,
                estimated_delivery_at: None,
                handoff: false,
            },
        );

        assert_eq!(rx.try_recv().unwrap().key, EventKey::Order(order_id));
        assert_eq!(rx.try_recv().unwrap().key, EventKey::Fleet);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let value = serde_json::to_value(DispatchEvent::LowBattery {
            drone_id: Uuid::nil(),
            battery_level: 15.0,
            order_id: None,
        })
        .unwrap();
        assert_eq!(value["type"], "LowBattery");
        assert_eq!(value["battery_level"], 15.0);
    }
}
