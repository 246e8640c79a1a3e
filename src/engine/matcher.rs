use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::DispatchEngine;
use crate::error::AppError;
use crate::geo::{eta_from, haversine_km};
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::notify::{DispatchEvent, EventKey};

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub order: DeliveryOrder,
    pub drone: Drone,
}

/// Orders from the pending window, nearest pickup first, oldest first on ties.
/// A drone with no known position measures from each order's own origin.
pub fn rank_pending(from: Option<GeoPoint>, window: Vec<DeliveryOrder>) -> Vec<(DeliveryOrder, f64)> {
    let mut ranked: Vec<(DeliveryOrder, f64)> = window
        .into_iter()
        .map(|order| {
            let start = from.unwrap_or(order.origin);
            let distance = haversine_km(&start, &order.origin);
            (order, distance)
        })
        .collect();

    ranked.sort_by(|(a, da), (b, db)| {
        da.total_cmp(db)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    ranked
}

impl DispatchEngine {
    /// Binds the nearest pending order to an available drone.
    pub fn reserve_job(&self, drone_id: Uuid) -> Result<Reservation, AppError> {
        let start = Instant::now();
        let result = self.try_reserve(drone_id);

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NoJobsAvailable) => "no_jobs",
            Err(AppError::DroneUnavailable(_)) => "drone_unavailable",
            Err(_) => "error",
        };
        self.metrics
            .reservation_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .reservations_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    fn try_reserve(&self, drone_id: Uuid) -> Result<Reservation, AppError> {
        let drone = self
            .store
            .drones
            .get(drone_id)
            .filter(|drone| drone.status == DroneStatus::Available)
            .ok_or(AppError::DroneUnavailable(drone_id))?;

        let window = self.store.oldest_pending_orders(self.config.reserve_window);
        let ranked = rank_pending(drone.location, window);

        for (candidate, distance_km) in ranked
            .into_iter()
            .take(self.config.reserve_max_attempts.max(1))
        {
            // Measured to the pickup; heartbeats extend it toward the destination.
            let eta = eta_from(Utc::now(), distance_km, self.config.average_speed_kmh);

            let claimed = self.store.orders.conditional_update_if(
                candidate.id,
                OrderStatus::Pending,
                |order| order.assigned_drone.is_none(),
                |order| {
                    order.status = OrderStatus::Reserved;
                    order.assigned_drone = Some(drone_id);
                    order.estimated_delivery_at = Some(eta);
                },
            );

            match claimed {
                Ok(order) => {
                    let reservation = self.bind_drone(drone_id, order)?;
                    info!(
                        order_id = %reservation.order.id,
                        drone_id = %drone_id,
                        distance_km,
                        "order reserved"
                    );
                    self.notifier.publish_all(
                        &[EventKey::Order(reservation.order.id), EventKey::Fleet],
                        DispatchEvent::OrderAssigned {
                            order_id: reservation.order.id,
                            drone_id,
                            estimated_delivery_at: reservation.order.estimated_delivery_at,
                            handoff: reservation.order.is_handoff_job,
                        },
                    );
                    return Ok(reservation);
                }
                Err(err) => {
                    debug!(order_id = %candidate.id, drone_id = %drone_id, error = %err, "lost order claim; trying next candidate");
                }
            }
        }

        Err(AppError::NoJobsAvailable)
    }

    /// Second half of a reservation. If the drone is no longer available the
    /// order claim is undone before returning.
    fn bind_drone(&self, drone_id: Uuid, order: DeliveryOrder) -> Result<Reservation, AppError> {
        let order_id = order.id;
        let bound = self.store.drones.conditional_update_if(
            drone_id,
            DroneStatus::Available,
            |drone| drone.current_order.is_none(),
            |drone| {
                drone.status = DroneStatus::Busy;
                drone.current_order = Some(order_id);
            },
        );

        match bound {
            Ok(drone) => Ok(Reservation { order, drone }),
            Err(err) => {
                debug!(order_id = %order_id, drone_id = %drone_id, error = %err, "drone changed state during reservation; releasing order");
                let released = self.store.orders.conditional_update_if(
                    order_id,
                    OrderStatus::Reserved,
                    |order| order.assigned_drone == Some(drone_id),
                    |order| {
                        order.status = OrderStatus::Pending;
                        order.assigned_drone = None;
                        order.estimated_delivery_at = None;
                    },
                );
                if let Err(err) = released {
                    error!(order_id = %order_id, drone_id = %drone_id, error = %err, "failed to release order after aborted reservation");
                }
                Err(AppError::DroneUnavailable(drone_id))
            }
        }
    }
}
