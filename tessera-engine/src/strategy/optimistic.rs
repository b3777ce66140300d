use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

use crate::registry::{UnitRegistry, UnitSlot};
use crate::strategy::AcquireStrategy;
use tessera_core::error::{EngineError, EngineResult};
use tessera_core::models::UnitState;

/// Version-check concurrency control.
///
/// Reads (state, version) for the whole batch without holding anything,
/// then writes each unit only if its version is still the one read — the
/// in-memory form of `UPDATE ... WHERE id=? AND version=?`. A lost race
/// rolls back the units this attempt already won and retries the whole
/// batch with jittered backoff, up to a bounded attempt count. Callers
/// never wait on a lock; they pay in retries.
pub struct OptimisticStrategy {
    max_retries: u32,
    backoff_base: Duration,
}

impl OptimisticStrategy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff_base,
        }
    }

    async fn snapshot(&self, slots: &[(Uuid, UnitSlot)]) -> Result<Vec<u64>, (Uuid, UnitState)> {
        let mut versions = Vec::with_capacity(slots.len());
        for (unit_id, slot) in slots {
            let unit = slot.lock().await;
            if unit.state != UnitState::Available {
                return Err((*unit_id, unit.state));
            }
            versions.push(unit.version);
        }
        Ok(versions)
    }

    /// One CAS per unit. On the first conflict the units this attempt
    /// already flipped are compensated back to Available.
    async fn try_cas_batch(
        &self,
        slots: &[(Uuid, UnitSlot)],
        versions: &[u64],
        token: Uuid,
        expires_at: DateTime<Utc>,
    ) -> bool {
        let mut applied = Vec::with_capacity(slots.len());
        for (i, (unit_id, slot)) in slots.iter().enumerate() {
            let mut unit = slot.lock().await;
            if unit.state == UnitState::Available && unit.version == versions[i] {
                unit.state = UnitState::Held;
                unit.holder = Some(token);
                unit.hold_expires_at = Some(expires_at);
                unit.version += 1;
                applied.push(i);
            } else {
                debug!(
                    "CAS conflict on unit {} (expected v{}, found v{})",
                    unit_id, versions[i], unit.version
                );
                drop(unit);
                self.rollback(slots, &applied, token).await;
                return false;
            }
        }
        true
    }

    async fn rollback(&self, slots: &[(Uuid, UnitSlot)], applied: &[usize], token: Uuid) {
        for &i in applied {
            let mut unit = slots[i].1.lock().await;
            if unit.state == UnitState::Held && unit.holder == Some(token) {
                unit.state = UnitState::Available;
                unit.holder = None;
                unit.hold_expires_at = None;
                unit.version += 1;
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64 * u64::from(attempt);
        let jitter = rand::rng().random_range(0..=base.max(1));
        Duration::from_millis(base + jitter)
    }
}

#[async_trait]
impl AcquireStrategy for OptimisticStrategy {
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

        let mut attempt = 1;
        loop {
            match self.snapshot(&slots).await {
                // a unit that is busy on the very first read is a business
                // conflict; seen only after a CAS loss it is contention
                Err((unit_id, state)) if attempt == 1 => {
                    return Err(EngineError::UnitUnavailable { unit_id, state });
                }
                Err(_) => {}
                Ok(versions) => {
                    if self.try_cas_batch(&slots, &versions, token, expires_at).await {
                        return Ok(());
                    }
                }
            }

            if attempt >= self.max_retries {
                return Err(EngineError::ContentionExceeded { attempts: attempt });
            }
            attempt += 1;
            sleep(self.backoff(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn strategy() -> OptimisticStrategy {
        OptimisticStrategy::new(3, Duration::from_millis(1))
    }

    async fn provisioned(count: usize) -> (UnitRegistry, Vec<Uuid>) {
        let registry = UnitRegistry::new();
        let ids = registry.provision(Uuid::new_v4(), count).await;
        (registry, ids)
    }

    fn in_ten_minutes() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::minutes(10)
    }

    #[tokio::test]
    async fn test_acquire_bumps_versions() {
        let (registry, ids) = provisioned(2).await;
        let token = Uuid::new_v4();

        strategy().acquire(&registry, &ids, token, in_ten_minutes()).await.unwrap();

        for id in &ids {
            let unit = registry.get(id).await.unwrap();
            assert_eq!(unit.state, UnitState::Held);
            assert_eq!(unit.holder, Some(token));
            assert_eq!(unit.version, 1);
        }
    }

    #[tokio::test]
    async fn test_held_unit_fails_first_read() {
        let (registry, ids) = provisioned(1).await;
        strategy()
            .acquire(&registry, &ids, Uuid::new_v4(), in_ten_minutes())
            .await
            .unwrap();

        let err = strategy()
            .acquire(&registry, &ids, Uuid::new_v4(), in_ten_minutes())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnitUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_and_rolls_back() {
        let (registry, ids) = provisioned(2).await;
        let strategy = strategy();
        let slots = registry.slots(&ids).await.unwrap();

        // bump the second unit behind the snapshot's back
        {
            let mut unit = slots[1].1.lock().await;
            unit.version += 1;
        }

        let token = Uuid::new_v4();
        let stale = vec![0, 0];
        assert!(!strategy.try_cas_batch(&slots, &stale, token, in_ten_minutes()).await);

        // the first unit was CAS-won and then compensated back
        let first = registry.get(&ids[0]).await.unwrap();
        assert_eq!(first.state, UnitState::Available);
        assert!(first.holder.is_none());
        assert_eq!(first.version, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exhaustion_yields_contention_exceeded() {
        let (registry, ids) = provisioned(1).await;
        let strategy = OptimisticStrategy::new(2, Duration::from_millis(1));
        let slots = registry.slots(&ids).await.unwrap();

        // keep the stored version permanently ahead of any snapshot: the
        // mutex queue is fair, so this bumps between every unlock/lock
        // pair of the strategy's read and its CAS
        let churn = {
            let slot = slots[0].1.clone();
            tokio::spawn(async move {
                loop {
                    let mut unit = slot.lock().await;
                    unit.version += 1;
                    drop(unit);
                }
            })
        };

        let err = strategy
            .acquire(&registry, &ids, Uuid::new_v4(), in_ten_minutes())
            .await
            .unwrap_err();
        churn.abort();
        assert!(matches!(err, EngineError::ContentionExceeded { attempts: 2 }));

        let unit = registry.get(&ids[0]).await.unwrap();
        assert_eq!(unit.state, UnitState::Available);
    }

    #[tokio::test]
    async fn test_concurrent_race_has_one_winner() {
        let (registry, ids) = provisioned(1).await;
        let registry = std::sync::Arc::new(registry);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let ids = ids.clone();
            tasks.push(tokio::spawn(async move {
                OptimisticStrategy::new(3, Duration::from_millis(1))
                    .acquire(&registry, &ids, Uuid::new_v4(), in_ten_minutes())
                    .await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => winners += 1,
                Err(EngineError::UnitUnavailable { .. })
                | Err(EngineError::ContentionExceeded { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);

        let unit = registry.get(&ids[0]).await.unwrap();
        assert_eq!(unit.state, UnitState::Held);
    }
}
