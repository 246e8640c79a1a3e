//! Recovery of orders stranded by a broken drone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{ensure_valid_point, DispatchEngine};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::handoff::{HandoffRequest, HandoffStatus};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::notify::{DispatchEvent, EventKey};
use crate::store::StoreError;

const DEFAULT_BROKEN_REASON: &str = "Reported broken";

#[derive(Debug, Clone, Serialize)]
pub struct BrokenReport {
    pub drone: Drone,
    pub order: Option<DeliveryOrder>,
    pub handoff: Option<HandoffRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rescue {
    pub handoff: HandoffRequest,
    pub order: DeliveryOrder,
    pub rescue_drone: Drone,
}

enum RescueAttempt {
    Done(Rescue),
    /// The candidate drone was taken; another one may still work.
    NextCandidate,
    /// The handoff or its order moved on; stop trying for now.
    Abandon,
}

impl DispatchEngine {
    /// Marks a drone broken and, if it carried an order, opens a handoff and
    /// tries to rescue the order right away.
    pub fn report_broken(
        &self,
        drone_id: Uuid,
        location: GeoPoint,
        reason: Option<String>,
    ) -> Result<BrokenReport, AppError> {
        ensure_valid_point(&location, "failure location")?;
        let reason = reason
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BROKEN_REASON.to_string());

        let (drone, held_order) = self.store.drones.update_with(drone_id, |drone| {
            drone.status = DroneStatus::Broken;
            drone.location = Some(location);
            drone.last_error = Some(reason.clone());
            drone.current_order.take()
        })?;

        let Some(order_id) = held_order else {
            info!(drone_id = %drone_id, reason = %reason, "idle drone reported broken");
            self.publish_broken(drone_id, None, None, location, &reason);
            return Ok(BrokenReport {
                drone,
                order: None,
                handoff: None,
            });
        };

        let mut picked_up = false;
        let stranded = self.store.orders.update_if(
            order_id,
            |order| order.is_assigned_to(drone_id),
            |order| {
                picked_up = order.status == OrderStatus::InTransit;
                order.status = OrderStatus::HandoffPending;
                order.assigned_drone = None;
                order.original_drone = Some(drone_id);
                order.handoff_count += 1;
                order.is_handoff_job = true;
                order.current_location = picked_up.then_some(location);
                order.estimated_delivery_at = None;
            },
        );

        let order = match stranded {
            Ok(order) => order,
            Err(err) => {
                warn!(drone_id = %drone_id, order_id = %order_id, error = %err, "order left the broken drone before handoff; nothing to recover");
                self.publish_broken(drone_id, None, None, location, &reason);
                return Ok(BrokenReport {
                    drone,
                    order: None,
                    handoff: None,
                });
            }
        };

        let handoff = self.store.handoffs.insert(HandoffRequest::new(
            drone_id,
            order_id,
            location,
            picked_up,
            reason.clone(),
        ));
        self.metrics
            .handoffs_total
            .with_label_values(&["created"])
            .inc();
        self.metrics.pending_handoffs.inc();

        warn!(
            drone_id = %drone_id,
            order_id = %order_id,
            handoff_id = %handoff.id,
            handoff_count = order.handoff_count,
            picked_up,
            reason = %reason,
            "busy drone reported broken; handoff opened"
        );
        self.publish_broken(drone_id, Some(order_id), Some(handoff.id), location, &reason);

        match self.attempt_rescue(&handoff) {
            Some(rescue) => Ok(BrokenReport {
                drone,
                order: Some(rescue.order),
                handoff: Some(rescue.handoff),
            }),
            None => {
                self.metrics
                    .handoffs_total
                    .with_label_values(&["backlogged"])
                    .inc();
                info!(handoff_id = %handoff.id, order_id = %order_id, "no rescue drone available; handoff backlogged");
                Ok(BrokenReport {
                    drone,
                    order: Some(order),
                    handoff: Some(handoff),
                })
            }
        }
    }

    /// Runs rescue matching for a pending handoff. `None` leaves the handoff
    /// and its order in their backlog states.
    pub fn attempt_rescue(&self, handoff: &HandoffRequest) -> Option<Rescue> {
        let candidates = self.rescue_candidates(handoff);

        for candidate in candidates
            .into_iter()
            .take(self.config.reserve_max_attempts.max(1))
        {
            match self.try_rescue_with(handoff, &candidate) {
                RescueAttempt::Done(rescue) => return Some(rescue),
                RescueAttempt::NextCandidate => continue,
                RescueAttempt::Abandon => break,
            }
        }

        debug!(handoff_id = %handoff.id, order_id = %handoff.order_id, "no rescue drone available; handoff stays pending");
        None
    }

    /// Re-runs rescue matching for every pending handoff, oldest first.
    /// Returns how many were assigned.
    pub fn retry_pending_handoffs(&self) -> usize {
        self.store
            .pending_handoffs()
            .iter()
            .filter_map(|handoff| self.attempt_rescue(handoff))
            .count()
    }

    /// Available drones with enough battery, nearest to the failure point
    /// first. Drones that never reported a position rank last; ties go by id.
    fn rescue_candidates(&self, handoff: &HandoffRequest) -> Vec<Drone> {
        let min_battery = self.config.rescue_min_battery;
        let mut ranked: Vec<(Drone, f64)> = self
            .store
            .drones
            .list(|drone| {
                drone.status == DroneStatus::Available
                    && drone.battery_level >= min_battery
                    && drone.id != handoff.broken_drone
            })
            .into_iter()
            .map(|drone| {
                let distance = drone
                    .location
                    .map(|at| haversine_km(&at, &handoff.failure_location))
                    .unwrap_or(f64::INFINITY);
                (drone, distance)
            })
            .collect();

        ranked.sort_by(|(a, da), (b, db)| da.total_cmp(db).then(a.id.cmp(&b.id)));
        ranked.into_iter().map(|(drone, _)| drone).collect()
    }

    fn try_rescue_with(&self, handoff: &HandoffRequest, candidate: &Drone) -> RescueAttempt {
        let order_id = handoff.order_id;
        let rescuer_id = candidate.id;
        let min_battery = self.config.rescue_min_battery;

        let rescuer = match self.store.drones.conditional_update_if(
            rescuer_id,
            DroneStatus::Available,
            |drone| drone.current_order.is_none() && drone.battery_level >= min_battery,
            |drone| {
                drone.status = DroneStatus::Busy;
                drone.current_order = Some(order_id);
            },
        ) {
            Ok(drone) => drone,
            Err(err) => {
                debug!(drone_id = %rescuer_id, handoff_id = %handoff.id, error = %err, "rescue candidate taken");
                return RescueAttempt::NextCandidate;
            }
        };

        // A package still at its origin is collected there; resuming in
        // transit only makes sense when it was already aboard.
        let resume_status = if handoff.picked_up && self.config.handoff_resume_in_transit {
            OrderStatus::InTransit
        } else {
            OrderStatus::Reserved
        };
        let start = rescuer.location.unwrap_or(handoff.failure_location);
        let order = match self.store.orders.conditional_update_if(
            order_id,
            OrderStatus::HandoffPending,
            |order| order.assigned_drone.is_none(),
            |order| {
                let package_at = if handoff.picked_up {
                    handoff.failure_location
                } else {
                    order.origin
                };
                order.status = resume_status;
                order.assigned_drone = Some(rescuer_id);
                order.estimated_delivery_at =
                    Some(self.eta_along(Utc::now(), &[start, package_at, order.destination]));
            },
        ) {
            Ok(order) => order,
            Err(err) => {
                debug!(order_id = %order_id, handoff_id = %handoff.id, error = %err, "stranded order changed during rescue");
                self.release_rescuer(rescuer_id, order_id);
                return RescueAttempt::Abandon;
            }
        };

        self.commit_rescue(handoff, rescuer_id, order, resume_status)
    }

    /// Assigns the handoff once rescuer and order are bound, then confirms the
    /// rescuer still holds the order. A rescuer that broke in between has
    /// already let go of it; the order and handoff return to the backlog.
    fn commit_rescue(
        &self,
        handoff: &HandoffRequest,
        rescuer_id: Uuid,
        order: DeliveryOrder,
        resume_status: OrderStatus,
    ) -> RescueAttempt {
        let order_id = order.id;

        let assigned = match self.store.handoffs.conditional_update(
            handoff.id,
            HandoffStatus::Pending,
            |request| {
                request.status = HandoffStatus::Assigned;
                request.rescue_drone = Some(rescuer_id);
            },
        ) {
            Ok(request) => request,
            Err(err) => {
                debug!(handoff_id = %handoff.id, error = %err, "handoff changed during rescue");
                if let Err(err) = self.unbind_rescued_order(order_id, rescuer_id, resume_status) {
                    error!(order_id = %order_id, error = %err, "failed to revert order after aborted rescue");
                }
                self.release_rescuer(rescuer_id, order_id);
                return RescueAttempt::Abandon;
            }
        };

        let rescuer = match self
            .store
            .drones
            .update_if(rescuer_id, |drone| drone.holds(order_id), |_| {})
        {
            Ok(drone) => drone,
            Err(err) => {
                warn!(drone_id = %rescuer_id, order_id = %order_id, handoff_id = %handoff.id, error = %err, "rescue drone dropped the order mid-rescue");
                return match self.unbind_rescued_order(order_id, rescuer_id, resume_status) {
                    Ok(_) => {
                        let reopened = self.store.handoffs.conditional_update_if(
                            handoff.id,
                            HandoffStatus::Assigned,
                            |request| request.rescue_drone == Some(rescuer_id),
                            |request| {
                                request.status = HandoffStatus::Pending;
                                request.rescue_drone = None;
                            },
                        );
                        if let Err(err) = reopened {
                            error!(handoff_id = %handoff.id, error = %err, "failed to reopen handoff after aborted rescue");
                        }
                        RescueAttempt::NextCandidate
                    }
                    // The rescuer's own failure report moved the order on to
                    // a newer handoff.
                    Err(_) => RescueAttempt::Abandon,
                };
            }
        };

        self.metrics
            .handoffs_total
            .with_label_values(&["rescued"])
            .inc();
        self.metrics.pending_handoffs.dec();
        info!(
            handoff_id = %assigned.id,
            order_id = %order_id,
            broken_drone_id = %assigned.broken_drone,
            rescue_drone_id = %rescuer_id,
            picked_up = assigned.picked_up,
            "rescue drone assigned"
        );

        self.notifier.publish_all(
            &[EventKey::Drone(rescuer_id), EventKey::Fleet],
            DispatchEvent::RescueAssigned {
                handoff_id: assigned.id,
                order_id,
                broken_drone_id: assigned.broken_drone,
                rescue_drone_id: rescuer_id,
            },
        );
        self.notifier.publish(
            EventKey::Order(order_id),
            DispatchEvent::OrderAssigned {
                order_id,
                drone_id: rescuer_id,
                estimated_delivery_at: order.estimated_delivery_at,
                handoff: true,
            },
        );

        RescueAttempt::Done(Rescue {
            handoff: assigned,
            order,
            rescue_drone: rescuer,
        })
    }

    fn unbind_rescued_order(
        &self,
        order_id: Uuid,
        rescuer_id: Uuid,
        resume_status: OrderStatus,
    ) -> Result<DeliveryOrder, StoreError> {
        self.store.orders.conditional_update_if(
            order_id,
            resume_status,
            |order| order.assigned_drone == Some(rescuer_id),
            |order| {
                order.status = OrderStatus::HandoffPending;
                order.assigned_drone = None;
                order.estimated_delivery_at = None;
            },
        )
    }

    fn release_rescuer(&self, drone_id: Uuid, order_id: Uuid) {
        let released = self.store.drones.conditional_update_if(
            drone_id,
            DroneStatus::Busy,
            |drone| drone.holds(order_id),
            |drone| {
                drone.status = DroneStatus::Available;
                drone.current_order = None;
            },
        );
        if let Err(err) = released {
            error!(drone_id = %drone_id, order_id = %order_id, error = %err, "failed to release rescue drone");
        }
    }

    fn publish_broken(
        &self,
        drone_id: Uuid,
        order_id: Option<Uuid>,
        handoff_id: Option<Uuid>,
        location: GeoPoint,
        reason: &str,
    ) {
        let event = DispatchEvent::DroneBroken {
            drone_id,
            order_id,
            handoff_id,
            location,
            reason: reason.to_string(),
        };
        match order_id {
            Some(order_id) => self
                .notifier
                .publish_all(&[EventKey::Fleet, EventKey::Order(order_id)], event),
            None => self.notifier.publish(EventKey::Fleet, event),
        }
    }
}

/// Periodically retries pending handoffs until the task is dropped.
pub async fn run_handoff_sweeper(engine: Arc<DispatchEngine>, every: Duration) {
    info!(interval_secs = every.as_secs(), "handoff sweeper started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let rescued = engine.retry_pending_handoffs();
        if rescued > 0 {
            info!(rescued, "handoff sweep reassigned stranded orders");
        }
    }
}
