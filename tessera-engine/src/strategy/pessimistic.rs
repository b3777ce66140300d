use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::registry::UnitRegistry;
use crate::strategy::AcquireStrategy;
use tessera_core::error::{EngineError, EngineResult};
use tessera_core::models::{ResourceUnit, UnitState};

/// Lock-first concurrency control.
///
/// Takes the per-unit slot locks in ascending unit-ID order, so two
/// multi-unit requests can never wait on each other in a cycle. Each lock
/// wait is bounded; on timeout or an unavailable unit every guard taken so
/// far is dropped, which releases the locks on all exit paths.
pub struct PessimisticStrategy {
    lock_wait: Duration,
}

impl PessimisticStrategy {
    pub fn new(lock_wait: Duration) -> Self {
        Self { lock_wait }
    }
}

#[async_trait]
impl AcquireStrategy for PessimisticStrategy {
    async fn acquire(
        &self,
        registry: &UnitRegistry,
        unit_ids: &[Uuid],
        token: Uuid,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut ids = unit_ids.to_vec();
        ids.sort();
        ids.dedup();

        let slots = registry.slots(&ids).await?;
        let mut guards: Vec<OwnedMutexGuard<ResourceUnit>> = Vec::with_capacity(slots.len());
        for (unit_id, slot) in &slots {
            let guard = match timeout(self.lock_wait, slot.clone().lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("Lock wait exceeded on unit {} for hold {}", unit_id, token);
                    return Err(EngineError::AcquisitionTimeout(*unit_id));
                }
            };
            if guard.state != UnitState::Available {
                return Err(EngineError::UnitUnavailable {
                    unit_id: *unit_id,
                    state: guard.state,
                });
            }
            guards.push(guard);
        }

        // Every unit verified while locked; commit the batch.
        for guard in guards.iter_mut() {
            guard.state = UnitState::Held;
            guard.holder = Some(token);
            guard.hold_expires_at = Some(expires_at);
            guard.version += 1;
        }
        Ok(())
    }
}
