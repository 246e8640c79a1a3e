use std::fmt::Debug;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

/// An entity the store can hold: identified by id, guarded by a status field.
pub trait Record: Clone + Send + Sync + 'static {
    type Status: Copy + PartialEq + Debug + Send + Sync;

    fn id(&self) -> Uuid;
    fn status(&self) -> Self::Status;
    fn touch(&mut self, now: DateTime<Utc>);
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(Uuid),

    #[error("record {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("record {0} no longer satisfies the update precondition")]
    PreconditionFailed(Uuid),
}

pub struct Table<R: Record> {
    rows: DashMap<Uuid, R>,
}

impl<R: Record> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }
}

impl<R: Record> Table<R> {
    pub fn insert(&self, record: R) -> R {
        self.rows.insert(record.id(), record.clone());
        record
    }

    pub fn get(&self, id: Uuid) -> Option<R> {
        self.rows.get(&id).map(|entry| entry.value().clone())
    }

    pub fn list<F>(&self, filter: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.rows
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unconditional write. Returns the committed record plus whatever the
    /// mutation chose to hand back (e.g. a field it took out of the record).
    pub fn update_with<T, F>(&self, id: Uuid, mutation: F) -> Result<(R, T), StoreError>
    where
        F: FnOnce(&mut R) -> T,
    {
        let mut entry = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let out = mutation(entry.value_mut());
        entry.touch(Utc::now());
        Ok((entry.value().clone(), out))
    }

    pub fn update<F>(&self, id: Uuid, mutation: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut R),
    {
        self.update_with(id, mutation).map(|(record, ())| record)
    }

    /// Applies `mutation` only if `guard` holds for the record at commit time.
    pub fn update_if<G, F>(&self, id: Uuid, guard: G, mutation: F) -> Result<R, StoreError>
    where
        G: FnOnce(&R) -> bool,
        F: FnOnce(&mut R),
    {
        let mut entry = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !guard(entry.value()) {
            return Err(StoreError::PreconditionFailed(id));
        }
        mutation(entry.value_mut());
        entry.touch(Utc::now());
        Ok(entry.value().clone())
    }

    /// Compare-and-swap on the status field.
    pub fn conditional_update<F>(
        &self,
        id: Uuid,
        expected: R::Status,
        mutation: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut R),
    {
        self.conditional_update_if(id, expected, |_| true, mutation)
    }

    /// Compare-and-swap on the status field with an extra guard on the rest of
    /// the record (typically the order/drone back-reference).
    pub fn conditional_update_if<G, F>(
        &self,
        id: Uuid,
        expected: R::Status,
        guard: G,
        mutation: F,
    ) -> Result<R, StoreError>
    where
        G: FnOnce(&R) -> bool,
        F: FnOnce(&mut R),
    {
        let mut entry = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let actual = entry.status();
        if actual != expected {
            return Err(StoreError::StatusMismatch {
                id,
                expected: format!("{expected:?}"),
                actual: format!("{actual:?}"),
            });
        }
        if !guard(entry.value()) {
            return Err(StoreError::PreconditionFailed(id));
        }
        mutation(entry.value_mut());
        entry.touch(Utc::now());
        Ok(entry.value().clone())
    }
}
