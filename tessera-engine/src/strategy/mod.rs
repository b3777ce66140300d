use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::registry::UnitRegistry;
use tessera_core::error::EngineResult;

pub mod optimistic;
pub mod pessimistic;

pub use optimistic::OptimisticStrategy;
pub use pessimistic::PessimisticStrategy;

/// The concurrency-control seam: move every unit in `unit_ids` from
/// Available to Held for `token`, all-or-nothing. A partial hold is never
/// left behind.
///
/// One implementation is chosen at engine construction from configuration;
/// confirm, release and expiry are shared and live on the engine, built on
/// the same registry slot primitive every implementation uses.
#[async_trait]
pub trait AcquireStrategy: Send + Sync {
    async fn acquire(
        &self,
        registry: &UnitRegistry,
        unit_ids: &[Uuid],
        token: Uuid,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<()>;
}
