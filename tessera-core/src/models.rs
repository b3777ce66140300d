use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a single reservable unit (seat, room, inventory slot).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitState {
    Available,
    Held,
    Reserved,
    Blocked,
}

/// A uniquely identified reservable unit belonging to a group
/// (the show, flight or room type it is sold under).
///
/// The (state, holder, hold_expires_at, version) tuple is the only mutable
/// shared state in the engine and is only ever written under the unit's
/// registry slot lock. `version` increases by one on every committed
/// mutation, so the accepted transitions of a unit are totally ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub id: Uuid,
    pub group_id: Uuid,
    pub state: UnitState,
    pub version: u64,
    pub holder: Option<Uuid>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl ResourceUnit {
    pub fn new(group_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            state: UnitState::Available,
            version: 0,
            holder: None,
            hold_expires_at: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == UnitState::Available
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HoldStatus {
    Active,
    Confirmed,
    Expired,
    Released,
}

/// A time-bounded provisional claim on a set of units.
///
/// The token doubles as the idempotency key: replaying an acquire with the
/// same token returns this record, and a confirmed hold maps to exactly one
/// [`Reservation`] under the same token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub token: Uuid,
    pub unit_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: HoldStatus,
}

impl Hold {
    pub fn new(token: Uuid, unit_ids: Vec<Uuid>, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            unit_ids,
            created_at,
            expires_at,
            status: HoldStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// Wall-clock expiry, independent of whether the sweeper has run yet.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The permanent outcome of a confirmed hold. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub token: Uuid,
    pub unit_ids: Vec<Uuid>,
    pub confirmed_at: DateTime<Utc>,
}

impl Reservation {
    pub fn covers(&self, unit_id: &Uuid) -> bool {
        self.unit_ids.contains(unit_id)
    }
}
