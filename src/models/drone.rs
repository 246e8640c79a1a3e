use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DroneStatus {
    Available,
    Busy,
    Broken,
    Maintenance,
}

/// A drone as the dispatch engine sees it.
///
/// `current_order` is set only while the drone is `Busy`, or `Maintenance`
/// when a low-battery heartbeat arrived mid-delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: Uuid,
    pub status: DroneStatus,
    pub location: Option<GeoPoint>,
    pub battery_level: f64,
    pub current_order: Option<Uuid>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Drone {
    pub fn new(location: Option<GeoPoint>, battery_level: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: DroneStatus::Available,
            location,
            battery_level,
            current_order: None,
            last_heartbeat_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn holds(&self, order_id: Uuid) -> bool {
        self.current_order == Some(order_id)
    }
}
