use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use tessera_core::models::{Hold, HoldStatus};

/// Outcome of claiming a token before an acquire runs.
#[derive(Debug, Clone)]
pub enum TokenClaim {
    /// The token is free; the caller owns the acquire for it and must
    /// finish with [`HoldManager::commit`] or [`HoldManager::abandon`].
    Granted,
    /// The token already has a live hold; return it unchanged.
    Replay(Hold),
    /// Another acquire with this token is in flight; wait and re-claim.
    InFlight,
}

struct HoldTable {
    holds: HashMap<Uuid, Hold>,
    /// Tokens whose acquire has been claimed but not yet committed.
    pending: HashSet<Uuid>,
}

/// Owns every hold record, keyed by token.
///
/// Status changes go through [`HoldManager::transition`], a check-and-set
/// under the map write lock, so exactly one of confirm / release / expire
/// wins per hold. The same lock backs [`HoldManager::claim`], which makes
/// the replay check and the reservation of a token one atomic step: two
/// concurrent acquires with one token can never both run the strategy.
/// Unit state is guarded separately by the registry slots.
pub struct HoldManager {
    table: RwLock<HoldTable>,
}

impl HoldManager {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HoldTable {
                holds: HashMap::new(),
                pending: HashSet::new(),
            }),
        }
    }

    /// Atomically reserve `token` for a new acquire, or report why not.
    /// A live (Active or Confirmed) hold replays; a terminal hold leaves
    /// the token free for a fresh attempt.
    pub async fn claim(&self, token: Uuid) -> TokenClaim {
        let mut table = self.table.write().await;
        if let Some(hold) = table.holds.get(&token) {
            match hold.status {
                HoldStatus::Active | HoldStatus::Confirmed => {
                    return TokenClaim::Replay(hold.clone());
                }
                HoldStatus::Released | HoldStatus::Expired => {}
            }
        }
        if !table.pending.insert(token) {
            return TokenClaim::InFlight;
        }
        TokenClaim::Granted
    }

    /// Finish a claimed acquire by publishing its hold record.
    pub async fn commit(&self, hold: Hold) {
        let mut table = self.table.write().await;
        table.pending.remove(&hold.token);
        table.holds.insert(hold.token, hold);
    }

    /// Finish a claimed acquire that failed; the token becomes free again.
    pub async fn abandon(&self, token: &Uuid) {
        let mut table = self.table.write().await;
        table.pending.remove(token);
    }

    pub async fn get(&self, token: &Uuid) -> Option<Hold> {
        let table = self.table.read().await;
        table.holds.get(token).cloned()
    }

    /// Move a hold from Active to `to`, atomically.
    ///
    /// Returns the hold as it was at the moment of the transition. When the
    /// hold is no longer Active the loser gets its current status back
    /// (`Err(Some(status))`); an unknown token yields `Err(None)`.
    pub async fn transition(&self, token: &Uuid, to: HoldStatus) -> Result<Hold, Option<HoldStatus>> {
        let mut table = self.table.write().await;
        let hold = table.holds.get_mut(token).ok_or(None)?;
        if hold.status != HoldStatus::Active {
            return Err(Some(hold.status));
        }
        hold.status = to;
        Ok(hold.clone())
    }

    /// Tokens of Active holds whose expiry timestamp has passed.
    pub async fn expired_active(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let table = self.table.read().await;
        table
            .holds
            .values()
            .filter(|h| h.is_active() && h.is_expired(now))
            .map(|h| h.token)
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        let table = self.table.read().await;
        table.holds.values().filter(|h| h.is_active()).count()
    }
}

impl Default for HoldManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn active_hold(expires_in: Duration) -> Hold {
        let now = Utc::now();
        Hold::new(Uuid::new_v4(), vec![Uuid::new_v4()], now, now + expires_in)
    }

    #[tokio::test]
    async fn test_transition_single_winner() {
        let manager = HoldManager::new();
        let hold = active_hold(Duration::minutes(10));
        let token = hold.token;
        manager.commit(hold).await;

        let won = manager.transition(&token, HoldStatus::Confirmed).await;
        assert!(won.is_ok());

        // the racing expire loses and observes the winner's status
        let lost = manager.transition(&token, HoldStatus::Expired).await;
        assert_eq!(lost.unwrap_err(), Some(HoldStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_transition_unknown_token() {
        let manager = HoldManager::new();
        let lost = manager.transition(&Uuid::new_v4(), HoldStatus::Released).await;
        assert_eq!(lost.unwrap_err(), None);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_settled() {
        let manager = HoldManager::new();
        let token = Uuid::new_v4();

        assert!(matches!(manager.claim(token).await, TokenClaim::Granted));
        // the same token cannot be claimed again while in flight
        assert!(matches!(manager.claim(token).await, TokenClaim::InFlight));

        // a failed acquire frees the token
        manager.abandon(&token).await;
        assert!(matches!(manager.claim(token).await, TokenClaim::Granted));

        // a committed acquire turns further claims into replays
        let now = Utc::now();
        manager
            .commit(Hold::new(token, vec![Uuid::new_v4()], now, now + Duration::minutes(10)))
            .await;
        match manager.claim(token).await {
            TokenClaim::Replay(hold) => assert_eq!(hold.token, token),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_claim_after_terminal_hold_is_fresh() {
        let manager = HoldManager::new();
        let hold = active_hold(Duration::minutes(10));
        let token = hold.token;
        manager.claim(token).await;
        manager.commit(hold).await;
        manager.transition(&token, HoldStatus::Released).await.unwrap();

        assert!(matches!(manager.claim(token).await, TokenClaim::Granted));
    }

    #[tokio::test]
    async fn test_expired_active_scan() {
        let manager = HoldManager::new();
        let stale = active_hold(Duration::zero());
        let fresh = active_hold(Duration::minutes(10));
        let stale_token = stale.token;
        manager.commit(stale).await;
        manager.commit(fresh).await;

        let expired = manager.expired_active(Utc::now()).await;
        assert_eq!(expired, vec![stale_token]);
        assert_eq!(manager.active_count().await, 2);
    }
}
