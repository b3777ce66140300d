use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::engine::ReservationEngine;

/// Handle to the running background sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the periodic reclaim loop. Each tick runs one
/// [`ReservationEngine::sweep_expired`] pass; the expiry/confirm race is
/// decided inside the engine, the sweeper adds no locking of its own.
pub fn start(engine: Arc<ReservationEngine>, cadence: Duration) -> SweeperHandle {
    let (tx, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!("Expiry sweeper started, cadence {:?}", cadence);
        let mut tick = interval(cadence);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    engine.sweep_expired().await;
                }
                _ = rx.changed() => {
                    info!("Expiry sweeper stopping");
                    break;
                }
            }
        }
    });
    SweeperHandle { shutdown: tx, handle }
}
