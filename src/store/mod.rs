//! In-memory state store for orders, drones and handoff requests.
//!
//! Every cross-entity transition goes through [`Table::conditional_update`] or
//! [`Table::update_if`]: the check and the mutation run under the same shard
//! lock, so a status that changed concurrently is never overwritten.
//! Mutation closures must not call back into the same table.

pub mod table;

pub use table::{Record, StoreError, Table};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::drone::{Drone, DroneStatus};
use crate::models::handoff::{HandoffRequest, HandoffStatus};
use crate::models::order::{DeliveryOrder, OrderStatus};

impl Record for DeliveryOrder {
    type Status = OrderStatus;

    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> OrderStatus {
        self.status
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl Record for Drone {
    type Status = DroneStatus;

    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> DroneStatus {
        self.status
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl Record for HandoffRequest {
    type Status = HandoffStatus;

    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> HandoffStatus {
        self.status
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[derive(Default)]
pub struct StateStore {
    pub orders: Table<DeliveryOrder>,
    pub drones: Table<Drone>,
    pub handoffs: Table<HandoffRequest>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Up to `limit` pending orders, oldest first.
    pub fn oldest_pending_orders(&self, limit: usize) -> Vec<DeliveryOrder> {
        let mut pending = self
            .orders
            .list(|order| order.status == OrderStatus::Pending);
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        pending
    }

    pub fn pending_handoffs(&self) -> Vec<HandoffRequest> {
        let mut pending = self
            .handoffs
            .list(|handoff| handoff.status == HandoffStatus::Pending);
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending
    }
}
