use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{ensure_valid_point, DispatchEngine};
use crate::error::AppError;
use crate::models::drone::{DroneStatus, GeoPoint};
use crate::models::handoff::HandoffStatus;
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::notify::{DispatchEvent, EventKey};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl DispatchEngine {
    /// `Reserved -> InTransit` for the drone holding the order. Without an
    /// explicit location the package is taken where it was last seen: the
    /// failure point of a handoff, the drone's last report, or the origin.
    pub fn pickup_order(
        &self,
        order_id: Uuid,
        drone_id: Uuid,
        location: Option<GeoPoint>,
    ) -> Result<DeliveryOrder, AppError> {
        if let Some(location) = &location {
            ensure_valid_point(location, "pickup location")?;
        }
        let order = self.order(order_id)?;
        if order.assigned_drone != Some(drone_id) {
            return Err(AppError::InvalidState(format!(
                "order {order_id} is not assigned to drone {drone_id}"
            )));
        }

        let now = Utc::now();
        let picked = self.store.orders.conditional_update_if(
            order_id,
            OrderStatus::Reserved,
            |order| order.assigned_drone == Some(drone_id),
            |order| {
                let at = location.or(order.current_location).unwrap_or(order.origin);
                order.status = OrderStatus::InTransit;
                order.current_location = Some(at);
                order.estimated_delivery_at = Some(self.eta_along(now, &[at, order.destination]));
            },
        )?;

        info!(order_id = %order_id, drone_id = %drone_id, "order picked up");
        Ok(picked)
    }

    /// Terminal transition for an order, then frees the drone that carried it
    /// and closes the handoff the drone was rescuing, if any.
    pub fn complete_order(
        &self,
        order_id: Uuid,
        drone_id: Uuid,
        outcome: DeliveryOutcome,
        notes: Option<String>,
    ) -> Result<DeliveryOrder, AppError> {
        let order = self.order(order_id)?;
        if order.assigned_drone != Some(drone_id) {
            return Err(AppError::InvalidState(format!(
                "order {order_id} is not assigned to drone {drone_id}"
            )));
        }

        let final_status = match outcome {
            DeliveryOutcome::Delivered => OrderStatus::Delivered,
            DeliveryOutcome::Failed => OrderStatus::Failed,
        };
        // A failure may be declared before pickup; a delivery may not.
        let allowed = |status: OrderStatus| match outcome {
            DeliveryOutcome::Delivered => status == OrderStatus::InTransit,
            DeliveryOutcome::Failed => {
                matches!(status, OrderStatus::InTransit | OrderStatus::Reserved)
            }
        };

        let now = Utc::now();
        let completed = self
            .store
            .orders
            .update_if(
                order_id,
                |order| order.assigned_drone == Some(drone_id) && allowed(order.status),
                |order| {
                    order.status = final_status;
                    order.assigned_drone = None;
                    order.notes = notes.filter(|notes| !notes.trim().is_empty());
                    if final_status == OrderStatus::Delivered {
                        order.delivered_at = Some(now);
                    }
                },
            )
            .map_err(|err| completion_error(err, order.status, final_status))?;

        self.release_drone(drone_id, order_id);
        if completed.is_handoff_job {
            self.close_handoffs(order_id, drone_id);
        }

        info!(order_id = %order_id, drone_id = %drone_id, status = ?final_status, "order completed");
        self.notifier.publish_all(
            &[
                EventKey::Order(order_id),
                EventKey::Drone(drone_id),
                EventKey::Fleet,
            ],
            DispatchEvent::OrderCompleted {
                order_id,
                drone_id,
                status: final_status,
            },
        );

        Ok(completed)
    }

    /// A busy drone goes back to `Available`; a drone that dropped into
    /// `Maintenance` mid-flight only loses the order reference.
    fn release_drone(&self, drone_id: Uuid, order_id: Uuid) {
        let released = self.store.drones.update_if(
            drone_id,
            |drone| {
                drone.holds(order_id)
                    && matches!(drone.status, DroneStatus::Busy | DroneStatus::Maintenance)
            },
            |drone| {
                drone.current_order = None;
                if drone.status == DroneStatus::Busy {
                    drone.status = DroneStatus::Available;
                }
            },
        );
        if let Err(err) = released {
            warn!(drone_id = %drone_id, order_id = %order_id, error = %err, "drone no longer held the completed order");
        }
    }

    fn close_handoffs(&self, order_id: Uuid, rescuer_id: Uuid) {
        let open = self.store.handoffs.list(|request| {
            request.order_id == order_id
                && request.status == HandoffStatus::Assigned
                && request.rescue_drone == Some(rescuer_id)
        });
        for request in open {
            let closed = self.store.handoffs.conditional_update(
                request.id,
                HandoffStatus::Assigned,
                |request| request.status = HandoffStatus::Completed,
            );
            match closed {
                Ok(_) => info!(handoff_id = %request.id, order_id = %order_id, "handoff completed"),
                Err(err) => warn!(handoff_id = %request.id, error = %err, "failed to close handoff"),
            }
        }
    }
}

fn completion_error(err: StoreError, from: OrderStatus, to: OrderStatus) -> AppError {
    match err {
        StoreError::PreconditionFailed(id) => {
            AppError::InvalidState(format!("order {id} cannot move from {from:?} to {to:?}"))
        }
        other => other.into(),
    }
}
