//! The dispatch and handoff engine.
//!
//! [`DispatchEngine`] owns no locks of its own. Every transition that binds
//! or releases an order/drone pair is a sequence of single-record
//! compare-and-swap steps against the [`StateStore`], with explicit rollback
//! of the earlier steps when a later one loses a race.

pub mod admin;
pub mod delivery;
pub mod handoff;
pub mod heartbeat;
pub mod matcher;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::drone::{Drone, GeoPoint};
use crate::models::handoff::HandoffRequest;
use crate::models::order::DeliveryOrder;
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many of the oldest pending orders a reservation looks at.
    pub reserve_window: usize,
    /// Claim attempts before a reservation or rescue gives up.
    pub reserve_max_attempts: usize,
    pub average_speed_kmh: f64,
    /// Heartbeats below this battery percentage force `Maintenance`.
    pub low_battery_threshold: f64,
    /// Minimum battery percentage for a rescue drone.
    pub rescue_min_battery: f64,
    /// Rescued orders resume as `InTransit` instead of `Reserved`.
    pub handoff_resume_in_transit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reserve_window: 10,
            reserve_max_attempts: 3,
            average_speed_kmh: 15.0,
            low_battery_threshold: 20.0,
            rescue_min_battery: 30.0,
            handoff_resume_in_transit: false,
        }
    }
}

pub struct DispatchEngine {
    store: Arc<StateStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    config: EngineConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<StateStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
            config,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn order(&self, order_id: Uuid) -> Result<DeliveryOrder, AppError> {
        self.store
            .orders
            .get(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    pub fn drone(&self, drone_id: Uuid) -> Result<Drone, AppError> {
        self.store
            .drones
            .get(drone_id)
            .ok_or_else(|| AppError::NotFound(format!("drone {drone_id} not found")))
    }

    pub fn handoff(&self, handoff_id: Uuid) -> Result<HandoffRequest, AppError> {
        self.store
            .handoffs
            .get(handoff_id)
            .ok_or_else(|| AppError::NotFound(format!("handoff {handoff_id} not found")))
    }

    /// Newest first.
    pub fn list_orders(&self) -> Vec<DeliveryOrder> {
        let mut orders = self.store.orders.list(|_| true);
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        orders
    }

    pub fn list_drones(&self) -> Vec<Drone> {
        let mut drones = self.store.drones.list(|_| true);
        drones.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        drones
    }

    pub fn list_handoffs(&self) -> Vec<HandoffRequest> {
        let mut handoffs = self.store.handoffs.list(|_| true);
        handoffs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        handoffs
    }

    /// The order a drone is currently carrying.
    pub fn current_order(&self, drone_id: Uuid) -> Result<DeliveryOrder, AppError> {
        let drone = self.drone(drone_id)?;
        let order_id = drone.current_order.ok_or_else(|| {
            AppError::NotFound(format!("no order currently assigned to drone {drone_id}"))
        })?;
        self.order(order_id)
    }

    fn eta_along(&self, now: DateTime<Utc>, waypoints: &[GeoPoint]) -> DateTime<Utc> {
        geo::eta_from(now, geo::path_km(waypoints), self.config.average_speed_kmh)
    }
}

pub(crate) fn ensure_valid_point(point: &GeoPoint, what: &str) -> Result<(), AppError> {
    if geo::is_valid(point) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "{what} ({}, {}) is outside lat [-90, 90] / lng [-180, 180]",
            point.lat, point.lng
        )))
    }
}
