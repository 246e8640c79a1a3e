use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::GeoPoint;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Reserved,
    InTransit,
    HandoffPending,
    Delivered,
    Failed,
    Withdrawn,
}

impl OrderStatus {
    /// Statuses in which a drone is bound to the order.
    pub fn is_assigned(self) -> bool {
        matches!(self, OrderStatus::Reserved | OrderStatus::InTransit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub current_location: Option<GeoPoint>,
    pub weight_kg: f64,
    pub priority: Priority,
    pub status: OrderStatus,
    pub assigned_drone: Option<Uuid>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub handoff_count: u32,
    pub is_handoff_job: bool,
    pub original_drone: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryOrder {
    pub fn new(origin: GeoPoint, destination: GeoPoint, weight_kg: f64, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            origin,
            destination,
            current_location: None,
            weight_kg,
            priority,
            status: OrderStatus::Pending,
            assigned_drone: None,
            estimated_delivery_at: None,
            delivered_at: None,
            handoff_count: 0,
            is_handoff_job: false,
            original_drone: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_assigned_to(&self, drone_id: Uuid) -> bool {
        self.status.is_assigned() && self.assigned_drone == Some(drone_id)
    }
}
