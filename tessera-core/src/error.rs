use uuid::Uuid;

use crate::models::UnitState;

/// Engine error taxonomy. Every caller-visible failure is one of these;
/// persistence or runtime details never leak through the surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Resource unit not found: {0}")]
    UnitNotFound(Uuid),

    #[error("Hold not found: {0}")]
    HoldNotFound(Uuid),

    #[error("Unit {unit_id} is not available (currently {state:?})")]
    UnitUnavailable { unit_id: Uuid, state: UnitState },

    #[error("Insufficient availability in group {group_id}: requested {requested}, available {available}")]
    InsufficientAvailability {
        group_id: Uuid,
        requested: usize,
        available: usize,
    },

    #[error("Contention not resolved after {attempts} attempts")]
    ContentionExceeded { attempts: u32 },

    #[error("Timed out waiting for lock on unit {0}")]
    AcquisitionTimeout(Uuid),

    #[error("Hold expired: {0}")]
    HoldExpired(Uuid),

    #[error("Hold already released: {0}")]
    HoldAlreadyReleased(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal engine inconsistency: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may sensibly retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ContentionExceeded { .. } | EngineError::AcquisitionTimeout(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
