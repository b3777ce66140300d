use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use tessera_core::error::{EngineError, EngineResult};
use tessera_core::models::{ResourceUnit, UnitState};

/// One registry slot: the unit record behind its own lock.
///
/// The slot mutex is the engine's single atomic state-transition primitive.
/// Pessimistic acquire holds a batch of them across its critical section;
/// optimistic CAS, confirm, release and the sweeper each take one for a
/// short check-and-write. Nothing mutates a unit outside its slot lock.
pub type UnitSlot = Arc<Mutex<ResourceUnit>>;

/// In-memory table of resource units.
pub struct UnitRegistry {
    units: RwLock<HashMap<Uuid, UnitSlot>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
        }
    }

    /// Provision `count` fresh units for a group, returning their IDs in
    /// ascending order.
    pub async fn provision(&self, group_id: Uuid, count: usize) -> Vec<Uuid> {
        let mut map = self.units.write().await;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let unit = ResourceUnit::new(group_id);
            ids.push(unit.id);
            map.insert(unit.id, Arc::new(Mutex::new(unit)));
        }
        ids.sort();
        debug!("Provisioned {} units for group {}", count, group_id);
        ids
    }

    /// Register a unit built elsewhere, e.g. carried over from an external
    /// store at startup. Its state and version are taken as-is.
    pub async fn insert(&self, unit: ResourceUnit) {
        let mut map = self.units.write().await;
        map.insert(unit.id, Arc::new(Mutex::new(unit)));
    }

    /// Consistent snapshot of a single unit.
    pub async fn get(&self, unit_id: &Uuid) -> EngineResult<ResourceUnit> {
        let slot = self.slot(unit_id).await?;
        let unit = slot.lock().await;
        Ok(unit.clone())
    }

    /// Units of a group currently sellable. A fresh query on every call; no
    /// cursor state is kept.
    ///
    /// The read never waits on a slot lock: a unit whose slot is locked
    /// (mid-CAS, or held across a pessimistic batch that may yet abort) is
    /// omitted, so the listing can briefly under-report availability while
    /// an acquire is in flight. Callers treat the result as advisory.
    pub async fn list_available(&self, group_id: &Uuid) -> Vec<ResourceUnit> {
        let map = self.units.read().await;
        let mut out = Vec::new();
        for slot in map.values() {
            if let Ok(unit) = slot.try_lock() {
                if unit.group_id == *group_id && unit.is_available() {
                    out.push(unit.clone());
                }
            }
        }
        out.sort_by_key(|u| u.id);
        out
    }

    /// Resolve the slots for a batch of unit IDs, preserving input order.
    pub async fn slots(&self, unit_ids: &[Uuid]) -> EngineResult<Vec<(Uuid, UnitSlot)>> {
        let map = self.units.read().await;
        let mut out = Vec::with_capacity(unit_ids.len());
        for id in unit_ids {
            let slot = map.get(id).ok_or(EngineError::UnitNotFound(*id))?;
            out.push((*id, Arc::clone(slot)));
        }
        Ok(out)
    }

    /// Fence a unit out of sale. Only an available unit may be blocked; a
    /// held or reserved unit is never pulled out from under its claimant.
    pub async fn block(&self, unit_id: &Uuid) -> EngineResult<()> {
        self.flip(unit_id, UnitState::Available, UnitState::Blocked).await
    }

    pub async fn unblock(&self, unit_id: &Uuid) -> EngineResult<()> {
        self.flip(unit_id, UnitState::Blocked, UnitState::Available).await
    }

    async fn flip(&self, unit_id: &Uuid, from: UnitState, to: UnitState) -> EngineResult<()> {
        let slot = self.slot(unit_id).await?;
        let mut unit = slot.lock().await;
        if unit.state != from {
            return Err(EngineError::UnitUnavailable {
                unit_id: *unit_id,
                state: unit.state,
            });
        }
        unit.state = to;
        unit.version += 1;
        Ok(())
    }

    async fn slot(&self, unit_id: &Uuid) -> EngineResult<UnitSlot> {
        let map = self.units.read().await;
        map.get(unit_id)
            .map(Arc::clone)
            .ok_or(EngineError::UnitNotFound(*unit_id))
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
