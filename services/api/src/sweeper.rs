//! Background expiry of orphaned sessions.
//!
//! Abandoning a client never retracts anything remotely, so sessions can sit
//! in `waiting` or `active` forever. This task deletes never-completed
//! sessions whose last update is older than the configured TTL. Completed
//! sessions are kept; they are the record of the practice run.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db::Db;

/// Spawns the periodic sweep. The handle is aborted on shutdown.
pub fn spawn_sweeper(db: Arc<Db>, interval: Duration, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = chrono::Duration::seconds(ttl.as_secs() as i64);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now() - ttl;
            match db.purge_stale(cutoff).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept stale sessions"),
                Err(e) => warn!(error = %e, "session sweep failed"),
            }
        }
    })
}
