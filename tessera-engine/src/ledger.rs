use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use tessera_core::models::Reservation;

/// Durable record of confirmed reservations, keyed by idempotency token.
/// Insert-if-absent is the only write; records are never mutated or removed.
pub struct ReservationLedger {
    reservations: RwLock<HashMap<Uuid, Reservation>>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self {
            reservations: RwLock::new(HashMap::new()),
        }
    }

    /// Insert unless the token is already present; either way the stored
    /// record is returned, so concurrent confirms with the same token all
    /// observe one reservation.
    pub async fn insert_if_absent(&self, reservation: Reservation) -> Reservation {
        let mut map = self.reservations.write().await;
        map.entry(reservation.token).or_insert(reservation).clone()
    }

    pub async fn get(&self, token: &Uuid) -> Option<Reservation> {
        let map = self.reservations.read().await;
        map.get(token).cloned()
    }

    /// Audit helper: whether any reservation covers the unit.
    pub async fn contains_unit(&self, unit_id: &Uuid) -> bool {
        let map = self.reservations.read().await;
        map.values().any(|r| r.covers(unit_id))
    }

    pub async fn len(&self) -> usize {
        let map = self.reservations.read().await;
        map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ReservationLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_write() {
        let ledger = ReservationLedger::new();
        let token = Uuid::new_v4();
        let unit = Uuid::new_v4();

        let first = ledger
            .insert_if_absent(Reservation {
                token,
                unit_ids: vec![unit],
                confirmed_at: Utc::now(),
            })
            .await;

        let replay = ledger
            .insert_if_absent(Reservation {
                token,
                unit_ids: vec![Uuid::new_v4()],
                confirmed_at: Utc::now(),
            })
            .await;

        assert_eq!(replay.unit_ids, first.unit_ids);
        assert_eq!(ledger.len().await, 1);
        assert!(ledger.contains_unit(&unit).await);
    }
}
