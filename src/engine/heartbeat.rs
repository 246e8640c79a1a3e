use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{ensure_valid_point, DispatchEngine};
use crate::error::AppError;
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::order::OrderStatus;
use crate::notify::{DispatchEvent, EventKey};

impl DispatchEngine {
    /// Records a position/battery report.
    ///
    /// The drone record is overwritten regardless of its status. A reading
    /// below the low-battery threshold moves the drone to `Maintenance` unless
    /// it is `Broken`; an order it carries stays bound to it.
    pub fn update_heartbeat(
        &self,
        drone_id: Uuid,
        location: GeoPoint,
        battery_level: f64,
    ) -> Result<Drone, AppError> {
        let result = self.apply_heartbeat(drone_id, location, battery_level);
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .heartbeats_total
            .with_label_values(&[outcome])
            .inc();
        result
    }

    fn apply_heartbeat(
        &self,
        drone_id: Uuid,
        location: GeoPoint,
        battery_level: f64,
    ) -> Result<Drone, AppError> {
        if !battery_level.is_finite() || !(0.0..=100.0).contains(&battery_level) {
            return Err(AppError::InvalidInput(format!(
                "battery level {battery_level} outside 0..=100"
            )));
        }
        ensure_valid_point(&location, "heartbeat location")?;

        let threshold = self.config.low_battery_threshold;
        let now = Utc::now();
        let (drone, entered_maintenance) = self.store.drones.update_with(drone_id, |drone| {
            drone.location = Some(location);
            drone.battery_level = battery_level;
            drone.last_heartbeat_at = Some(now);

            let low = battery_level < threshold
                && !matches!(drone.status, DroneStatus::Broken | DroneStatus::Maintenance);
            if low {
                drone.status = DroneStatus::Maintenance;
            }
            low
        })?;

        self.metrics
            .drone_battery_level
            .with_label_values(&[&drone_id.to_string()])
            .set(battery_level);

        if let Some(order_id) = drone.current_order {
            self.track_order(drone_id, order_id, location);
        }

        if entered_maintenance {
            warn!(
                drone_id = %drone_id,
                battery_level,
                order_id = ?drone.current_order,
                "battery below threshold; drone moved to maintenance"
            );
            self.notifier.publish_all(
                &[EventKey::Drone(drone_id), EventKey::Fleet],
                DispatchEvent::LowBattery {
                    drone_id,
                    battery_level,
                    order_id: drone.current_order,
                },
            );
        }

        Ok(drone)
    }

    /// Moves the order along with its drone and refreshes its ETA. Before
    /// pickup the estimate still routes through the order origin.
    fn track_order(&self, drone_id: Uuid, order_id: Uuid, location: GeoPoint) {
        let now = Utc::now();
        let tracked = self.store.orders.update_if(
            order_id,
            |order| order.is_assigned_to(drone_id),
            |order| {
                let eta = match order.status {
                    OrderStatus::Reserved => {
                        self.eta_along(now, &[location, order.origin, order.destination])
                    }
                    _ => self.eta_along(now, &[location, order.destination]),
                };
                order.current_location = Some(location);
                order.estimated_delivery_at = Some(eta);
            },
        );

        match tracked {
            Ok(order) => self.notifier.publish(
                EventKey::Order(order_id),
                DispatchEvent::LocationUpdated {
                    order_id,
                    drone_id,
                    location,
                    estimated_delivery_at: order.estimated_delivery_at,
                },
            ),
            Err(err) => {
                debug!(order_id = %order_id, drone_id = %drone_id, error = %err, "order no longer follows this drone");
            }
        }
    }
}
