//! Cleanup service: periodic removal of expired rows.
//!
//! DESIGN
//! ======
//! A background task wakes every `cleanup_interval_secs` and deletes
//! sessions past their maximum lifetime, authorization codes past
//! `valid_until` and device codes past `expires_unix`. Each sweep is
//! independent: a failing one is logged and the others still run. Missed
//! ticks are skipped rather than replayed in a burst.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::db::now_unix;
use crate::models::{oauth2, oauth2_device, session};
use crate::state::AppState;

/// Rows removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub authorization_codes: u64,
    pub device_codes: u64,
}

/// Spawn the background cleanup task. Returns a handle for shutdown.
pub fn spawn_cleanup_task(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            run_cleanup_once(&state).await;
        }
    })
}

pub async fn run_cleanup_once(state: &AppState) -> CleanupReport {
    run_cleanup_at(state, now_unix()).await
}

/// One pass with an explicit clock.
pub async fn run_cleanup_at(state: &AppState, now: i64) -> CleanupReport {
    let mut report = CleanupReport::default();

    match session::cleanup_sessions_at(&state.pool, state.config.session_max_lifetime_secs, now).await {
        Ok(n) => report.sessions = n,
        Err(e) => warn!(error = %e, "session cleanup failed"),
    }
    match oauth2::delete_expired_authorization_codes(&state.pool, now).await {
        Ok(n) => report.authorization_codes = n,
        Err(e) => warn!(error = %e, "authorization code cleanup failed"),
    }
    match oauth2_device::delete_expired_device_codes(&state.pool, now).await {
        Ok(n) => report.device_codes = n,
        Err(e) => warn!(error = %e, "device code cleanup failed"),
    }

    debug!(?report, "cleanup pass finished");
    report
}

#[cfg(test)]
#[path = "cleanup_test.rs"]
mod tests;
