// src/store.rs
//! In-memory tracking store
//!
//! Holds one [`TrackingState`] per entity behind its own async mutex, so the
//! read-modify-write in [`TrackingStore::record`] is atomic per entity while
//! different entities never wait on each other.

use crate::{
    gps::PositionFix,
    odometer::{self, AccumulateError, EntityId, TrackingState},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::Mutex as AsyncMutex;

type Slot = Arc<AsyncMutex<TrackingState>>;

/// Result of recording one fix.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub fix: PositionFix,
    pub delta_km: f64,
    pub total_km: f64,
}

#[derive(Debug, Default)]
pub struct TrackingStore {
    entities: Mutex<HashMap<EntityId, Slot>>,
}

impl TrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, entity: &EntityId) -> Slot {
        let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entities.entry(entity.clone()).or_default())
    }

    fn existing_slot(&self, entity: &EntityId) -> Option<Slot> {
        let entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        entities.get(entity).map(Arc::clone)
    }

    /// Record a new fix for an entity and advance its odometer.
    ///
    /// An out-of-order fix is reported and leaves the stored state untouched.
    pub async fn record(&self, entity: &EntityId, fix: PositionFix) -> Result<Progress, AccumulateError> {
        let slot = self.slot(entity);
        let mut state = slot.lock().await;

        let (next, delta_km) = odometer::apply(entity, fix.clone(), &state)?;
        let total_km = next.cumulative_distance_km;
        *state = next;

        Ok(Progress {
            fix,
            delta_km,
            total_km,
        })
    }

    /// Most recent fix recorded for an entity.
    pub async fn latest(&self, entity: &EntityId) -> Option<PositionFix> {
        let slot = self.existing_slot(entity)?;
        let state = slot.lock().await;
        state.last_fix.clone()
    }

    /// Snapshot of an entity's state.
    pub async fn state(&self, entity: &EntityId) -> Option<TrackingState> {
        let slot = self.existing_slot(entity)?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    /// Seed an entity with state loaded from elsewhere, replacing what is held.
    pub async fn restore(&self, entity: &EntityId, restored: TrackingState) {
        let slot = self.slot(entity);
        *slot.lock().await = restored;
    }

    /// Entities known to the store, sorted.
    pub fn entities(&self) -> Vec<EntityId> {
        let entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<EntityId> = entities.keys().cloned().collect();
        ids.sort();
        ids
    }
}
