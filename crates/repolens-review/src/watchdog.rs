//! Background task that fails reviews stuck in `pending`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::ReviewStore;

/// Spawn the stale-pending watchdog on the current runtime.
///
/// Every `interval` it fails pending reviews created more than `timeout`
/// ago. Abort the returned handle to stop it.
pub fn spawn_watchdog(store: ReviewStore, interval: Duration, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (repo, review_id) in store.reclaim_stale(timeout) {
                tracing::warn!(
                    %repo,
                    %review_id,
                    timeout_secs = timeout.as_secs(),
                    "reclaimed stale pending review"
                );
            }
        }
    })
}
