use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HandoffStatus {
    Pending,
    Assigned,
    Completed,
}

/// Record of an order stranded by a broken drone and the rescue that picks it up.
///
/// A request can sit in `Pending` indefinitely when no rescue drone is free;
/// the sweeper keeps re-trying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub id: Uuid,
    pub broken_drone: Uuid,
    pub order_id: Uuid,
    pub failure_location: GeoPoint,
    /// Whether the package was aboard the broken drone. If not, it is still
    /// waiting at the order origin.
    pub picked_up: bool,
    pub reason: String,
    pub status: HandoffStatus,
    pub rescue_drone: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HandoffRequest {
    pub fn new(
        broken_drone: Uuid,
        order_id: Uuid,
        failure_location: GeoPoint,
        picked_up: bool,
        reason: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            broken_drone,
            order_id,
            failure_location,
            picked_up,
            reason,
            status: HandoffStatus::Pending,
            rescue_drone: None,
            created_at: now,
            updated_at: now,
        }
    }
}
