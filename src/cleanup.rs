use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::sessions::SessionMemoryStore;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Start the background task that periodically drops expired session records.
pub fn spawn_session_cleanup(store: SessionMemoryStore) {
    tokio::spawn(async move {
        info!(
            target: "cleanup",
            interval_secs = CLEANUP_INTERVAL.as_secs(),
            "starting session cleanup background task"
        );

        let mut ticker = interval(CLEANUP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_cleanup_cycle(&store).await;
        }
    });
}

async fn run_cleanup_cycle(store: &SessionMemoryStore) -> usize {
    let pruned = store.prune_expired().await;
    if pruned > 0 {
        info!(target: "cleanup", pruned, "pruned expired sessions");
    } else {
        debug!(target: "cleanup", "no expired sessions to prune in this cycle");
    }
    pruned
}
