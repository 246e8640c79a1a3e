use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::engine::{ensure_valid_point, DispatchEngine};
use crate::error::AppError;
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::order::{DeliveryOrder, OrderStatus, Priority};

const MIN_WEIGHT_KG: f64 = 0.1;
const MAX_WEIGHT_KG: f64 = 10.0;

impl DispatchEngine {
    pub fn register_drone(
        &self,
        location: Option<GeoPoint>,
        battery_level: Option<f64>,
    ) -> Result<Drone, AppError> {
        if let Some(location) = &location {
            ensure_valid_point(location, "drone location")?;
        }
        let battery_level = battery_level.unwrap_or(100.0);
        if !battery_level.is_finite() || !(0.0..=100.0).contains(&battery_level) {
            return Err(AppError::InvalidInput(format!(
                "battery level {battery_level} outside 0..=100"
            )));
        }

        let drone = self.store.drones.insert(Drone::new(location, battery_level));
        info!(drone_id = %drone.id, "drone registered");
        Ok(drone)
    }

    pub fn submit_order(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        weight_kg: f64,
        priority: Priority,
    ) -> Result<DeliveryOrder, AppError> {
        ensure_valid_point(&origin, "origin")?;
        ensure_valid_point(&destination, "destination")?;
        if !weight_kg.is_finite() || !(MIN_WEIGHT_KG..=MAX_WEIGHT_KG).contains(&weight_kg) {
            return Err(AppError::InvalidInput(format!(
                "weight {weight_kg} kg outside {MIN_WEIGHT_KG}..={MAX_WEIGHT_KG}"
            )));
        }

        let order = self
            .store
            .orders
            .insert(DeliveryOrder::new(origin, destination, weight_kg, priority));
        info!(order_id = %order.id, priority = ?order.priority, "order submitted");
        Ok(order)
    }

    /// Owner withdrawal; only orders no drone has claimed yet.
    pub fn withdraw_order(&self, order_id: Uuid) -> Result<DeliveryOrder, AppError> {
        let order = self
            .store
            .orders
            .conditional_update(order_id, OrderStatus::Pending, |order| {
                order.status = OrderStatus::Withdrawn;
            })?;
        info!(order_id = %order_id, "order withdrawn");
        Ok(order)
    }

    /// Administrative route edit while the package is still on the ground.
    pub fn edit_order_route(
        &self,
        order_id: Uuid,
        origin: Option<GeoPoint>,
        destination: Option<GeoPoint>,
    ) -> Result<DeliveryOrder, AppError> {
        if origin.is_none() && destination.is_none() {
            return Err(AppError::InvalidInput(
                "origin or destination is required".to_string(),
            ));
        }
        if let Some(origin) = &origin {
            ensure_valid_point(origin, "origin")?;
        }
        if let Some(destination) = &destination {
            ensure_valid_point(destination, "destination")?;
        }

        let current = self.order(order_id)?;
        let drone_location = current
            .assigned_drone
            .and_then(|drone_id| self.store.drones.get(drone_id))
            .and_then(|drone| drone.location);

        let now = Utc::now();
        let edited = self.store.orders.update_if(
            order_id,
            |order| {
                matches!(order.status, OrderStatus::Pending | OrderStatus::Reserved)
                    && order.status == current.status
                    && order.assigned_drone == current.assigned_drone
            },
            |order| {
                if let Some(origin) = origin {
                    order.origin = origin;
                }
                if let Some(destination) = destination {
                    order.destination = destination;
                }
                if order.status == OrderStatus::Reserved {
                    let start = drone_location.unwrap_or(order.origin);
                    order.estimated_delivery_at =
                        Some(self.eta_along(now, &[start, order.origin, order.destination]));
                }
            },
        )?;

        info!(order_id = %order_id, "order route edited");
        Ok(edited)
    }

    /// Administrative status override.
    ///
    /// `Broken` goes through the regular failure path so a carried order is
    /// handed off. `Available` and `Maintenance` are only accepted for drones
    /// that carry nothing; `Busy` is reserved for job assignment.
    pub fn set_drone_status(&self, drone_id: Uuid, status: DroneStatus) -> Result<Drone, AppError> {
        let drone = self.drone(drone_id)?;

        match status {
            DroneStatus::Busy => Err(AppError::InvalidInput(
                "drones become busy only by reserving a job".to_string(),
            )),
            DroneStatus::Broken => {
                let location = drone
                    .location
                    .or_else(|| {
                        drone
                            .current_order
                            .and_then(|order_id| self.store.orders.get(order_id))
                            .map(|order| order.current_location.unwrap_or(order.origin))
                    })
                    .ok_or_else(|| {
                        AppError::InvalidState(format!(
                            "drone {drone_id} has never reported a position"
                        ))
                    })?;
                let report =
                    self.report_broken(drone_id, location, Some("Marked broken by admin".into()))?;
                Ok(report.drone)
            }
            DroneStatus::Available | DroneStatus::Maintenance => {
                let updated = self.store.drones.update_if(
                    drone_id,
                    |drone| drone.current_order.is_none() && drone.status != DroneStatus::Busy,
                    |drone| {
                        if status == DroneStatus::Available {
                            drone.last_error = None;
                        }
                        drone.status = status;
                    },
                )?;
                info!(drone_id = %drone_id, from = ?drone.status, to = ?status, "drone status overridden");
                Ok(updated)
            }
        }
    }
}
