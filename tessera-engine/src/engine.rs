use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::holds::{HoldManager, TokenClaim};
use crate::ledger::ReservationLedger;
use crate::registry::UnitRegistry;
use crate::strategy::{AcquireStrategy, OptimisticStrategy, PessimisticStrategy};
use crate::sweeper::{self, SweeperHandle};
use tessera_core::config::{EngineConfig, StrategyKind};
use tessera_core::error::{EngineError, EngineResult};
use tessera_core::models::{Hold, HoldStatus, Reservation, ResourceUnit, UnitState};

/// How an acquire names its units within a group.
#[derive(Debug, Clone)]
pub enum UnitSelector {
    /// These exact units, all or nothing.
    Exact(Vec<Uuid>),
    /// Any `n` currently available units, picked by the engine.
    AnyAvailable(usize),
}

/// The reservation engine: registry, hold manager, ledger and the
/// configured concurrency strategy behind one in-process surface.
///
/// Constructed explicitly and passed around by the embedding process; the
/// engine keeps no global state. Acquire semantics come from the strategy
/// chosen at construction; confirm, release and expiry are shared and race
/// each other only through the hold-status transition plus the registry
/// slot locks.
pub struct ReservationEngine {
    config: EngineConfig,
    registry: Arc<UnitRegistry>,
    holds: Arc<HoldManager>,
    ledger: Arc<ReservationLedger>,
    strategy: Arc<dyn AcquireStrategy>,
}

impl ReservationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let strategy: Arc<dyn AcquireStrategy> = match config.strategy {
            StrategyKind::Pessimistic => Arc::new(PessimisticStrategy::new(config.lock_wait())),
            StrategyKind::Optimistic => Arc::new(OptimisticStrategy::new(
                config.max_cas_retries,
                config.retry_backoff(),
            )),
        };
        info!("Reservation engine starting with {:?} strategy", config.strategy);
        Self {
            config,
            registry: Arc::new(UnitRegistry::new()),
            holds: Arc::new(HoldManager::new()),
            ledger: Arc::new(ReservationLedger::new()),
            strategy,
        }
    }

    /// Unit provisioning and blocking are the embedding collaborator's job;
    /// it reaches them here.
    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Place a time-bounded hold on units of `group_id`.
    ///
    /// The token is the idempotency key: replaying it while its hold is
    /// Active or Confirmed returns the existing hold unchanged, and the
    /// token is claimed before the strategy runs, so two concurrent calls
    /// with the same token settle on one hold. With no explicit TTL the
    /// configured default window applies.
    pub async fn acquire_hold(
        &self,
        group_id: Uuid,
        selector: UnitSelector,
        token: Uuid,
        ttl: Option<Duration>,
    ) -> EngineResult<Hold> {
        let ttl = ttl.unwrap_or_else(|| self.config.hold_ttl());
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| EngineError::Validation("hold TTL out of range".into()))?;

        loop {
            match self.holds.claim(token).await {
                TokenClaim::Granted => break,
                TokenClaim::Replay(existing) => {
                    debug!("Replayed acquire for hold {}", token);
                    return Ok(existing);
                }
                // another call with this token is mid-acquire; its commit
                // or abandon settles the claim
                TokenClaim::InFlight => sleep(Duration::from_millis(2)).await,
            }
        }

        let now = Utc::now();
        let expires_at = now + ttl;
        match self.place_hold(group_id, &selector, token, now, expires_at).await {
            Ok(hold) => {
                info!(
                    "Hold {} placed on {} unit(s), expires {}",
                    token,
                    hold.unit_ids.len(),
                    expires_at
                );
                Ok(hold)
            }
            Err(err) => {
                self.holds.abandon(&token).await;
                Err(err)
            }
        }
    }

    /// Run the acquire for a claimed token and publish the hold record.
    async fn place_hold(
        &self,
        group_id: Uuid,
        selector: &UnitSelector,
        token: Uuid,
        now: chrono::DateTime<Utc>,
        expires_at: chrono::DateTime<Utc>,
    ) -> EngineResult<Hold> {
        let mut unit_ids = self.resolve_selector(&group_id, selector).await?;
        match self.strategy.acquire(&self.registry, &unit_ids, token, expires_at).await {
            Ok(()) => {}
            // an AnyAvailable candidate can be stolen between resolution and
            // acquisition; re-resolve once before giving up
            Err(EngineError::UnitUnavailable { .. })
                if matches!(selector, UnitSelector::AnyAvailable(_)) =>
            {
                unit_ids = self.resolve_selector(&group_id, selector).await?;
                self.strategy.acquire(&self.registry, &unit_ids, token, expires_at).await?;
            }
            Err(err) => return Err(err),
        }

        unit_ids.sort();
        unit_ids.dedup();
        let hold = Hold::new(token, unit_ids, now, expires_at);
        self.holds.commit(hold.clone()).await;
        Ok(hold)
    }

    /// Make a hold permanent. Idempotent: a token that already confirmed
    /// returns its reservation unchanged. Wall-clock expiry is checked here,
    /// independent of sweeper timing.
    pub async fn confirm(&self, token: Uuid) -> EngineResult<Reservation> {
        if let Some(existing) = self.ledger.get(&token).await {
            return Ok(existing);
        }
        let hold = self.holds.get(&token).await.ok_or(EngineError::HoldNotFound(token))?;

        let now = Utc::now();
        if hold.is_active() && hold.is_expired(now) {
            // lost to the clock: reclaim now rather than wait for the sweeper
            if let Ok(expired) = self.holds.transition(&token, HoldStatus::Expired).await {
                let reclaimed = self.reclaim_units(&expired).await?;
                warn!("Confirm of {} arrived after expiry; reclaimed {} unit(s)", token, reclaimed);
                return Err(EngineError::HoldExpired(token));
            }
            // a racing confirm/release/sweep moved it first; fall through
        }

        match self.holds.transition(&token, HoldStatus::Confirmed).await {
            Ok(hold) => {
                let slots = self.registry.slots(&hold.unit_ids).await?;
                for (unit_id, slot) in slots {
                    let mut unit = slot.lock().await;
                    if unit.state != UnitState::Held || unit.holder != Some(token) {
                        // we won the status transition, so the units are ours;
                        // anything else is corruption, never coerced
                        return Err(EngineError::Internal(format!(
                            "unit {} not held by {} during confirm",
                            unit_id, token
                        )));
                    }
                    unit.state = UnitState::Reserved;
                    unit.holder = None;
                    unit.hold_expires_at = None;
                    unit.version += 1;
                }
                let reservation = self
                    .ledger
                    .insert_if_absent(Reservation {
                        token,
                        unit_ids: hold.unit_ids.clone(),
                        confirmed_at: now,
                    })
                    .await;
                info!("Hold {} confirmed, {} unit(s) reserved", token, hold.unit_ids.len());
                Ok(reservation)
            }
            Err(Some(HoldStatus::Confirmed)) => {
                // the winning confirm may still be writing the ledger entry
                for _ in 0..64 {
                    if let Some(reservation) = self.ledger.get(&token).await {
                        return Ok(reservation);
                    }
                    tokio::task::yield_now().await;
                }
                Err(EngineError::Internal(format!(
                    "confirmed hold {} has no ledger entry",
                    token
                )))
            }
            Err(Some(HoldStatus::Released)) => Err(EngineError::HoldAlreadyReleased(token)),
            Err(Some(HoldStatus::Expired)) => Err(EngineError::HoldExpired(token)),
            Err(Some(HoldStatus::Active)) => Err(EngineError::Internal(format!(
                "hold {} still active after losing transition",
                token
            ))),
            Err(None) => Err(EngineError::HoldNotFound(token)),
        }
    }

    /// Give a hold back. A no-op (not an error) if the hold already reached
    /// a terminal status.
    pub async fn release(&self, token: Uuid) -> EngineResult<()> {
        match self.holds.transition(&token, HoldStatus::Released).await {
            Ok(hold) => {
                let reclaimed = self.reclaim_units(&hold).await?;
                info!("Hold {} released, {} unit(s) back on sale", token, reclaimed);
                Ok(())
            }
            Err(Some(_)) => Ok(()),
            Err(None) => Err(EngineError::HoldNotFound(token)),
        }
    }

    pub async fn hold_status(&self, token: Uuid) -> EngineResult<Hold> {
        self.holds.get(&token).await.ok_or(EngineError::HoldNotFound(token))
    }

    pub async fn list_available(&self, group_id: Uuid) -> Vec<ResourceUnit> {
        self.registry.list_available(&group_id).await
    }

    pub async fn reservation(&self, token: Uuid) -> Option<Reservation> {
        self.ledger.get(&token).await
    }

    pub fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    /// One expiry pass: every Active hold past its window loses the race
    /// against nobody and its units go back on sale. Returns the number of
    /// holds expired.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut swept = 0;
        for token in self.holds.expired_active(now).await {
            match self.holds.transition(&token, HoldStatus::Expired).await {
                Ok(hold) => match self.reclaim_units(&hold).await {
                    Ok(reclaimed) => {
                        swept += 1;
                        debug!("Expired hold {}, reclaimed {} unit(s)", token, reclaimed);
                    }
                    Err(err) => warn!("Failed to reclaim units of {}: {}", token, err),
                },
                // confirm or release won this hold first
                Err(_) => {}
            }
        }
        if swept > 0 {
            info!("Expiry sweep reclaimed {} hold(s)", swept);
        }
        swept
    }

    /// Spawn the background sweeper at the configured cadence.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        sweeper::start(Arc::clone(self), self.config.sweep_interval())
    }

    /// Move a hold's units back to Available where this hold still owns
    /// them. Units the hold no longer owns (already reclaimed) are skipped.
    async fn reclaim_units(&self, hold: &Hold) -> EngineResult<usize> {
        let slots = self.registry.slots(&hold.unit_ids).await?;
        let mut reclaimed = 0;
        for (_, slot) in slots {
            let mut unit = slot.lock().await;
            if unit.state == UnitState::Held && unit.holder == Some(hold.token) {
                unit.state = UnitState::Available;
                unit.holder = None;
                unit.hold_expires_at = None;
                unit.version += 1;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn resolve_selector(
        &self,
        group_id: &Uuid,
        selector: &UnitSelector,
    ) -> EngineResult<Vec<Uuid>> {
        match selector {
            UnitSelector::Exact(ids) => {
                if ids.is_empty() {
                    return Err(EngineError::Validation("hold must cover at least one unit".into()));
                }
                for id in ids {
                    let unit = self.registry.get(id).await?;
                    if unit.group_id != *group_id {
                        return Err(EngineError::Validation(format!(
                            "unit {} does not belong to group {}",
                            id, group_id
                        )));
                    }
                }
                Ok(ids.clone())
            }
            UnitSelector::AnyAvailable(count) => {
                if *count == 0 {
                    return Err(EngineError::Validation("hold must cover at least one unit".into()));
                }
                let available = self.registry.list_available(group_id).await;
                if available.len() < *count {
                    return Err(EngineError::InsufficientAvailability {
                        group_id: *group_id,
                        requested: *count,
                        available: available.len(),
                    });
                }
                Ok(available.into_iter().take(*count).map(|u| u.id).collect())
            }
        }
    }
}
