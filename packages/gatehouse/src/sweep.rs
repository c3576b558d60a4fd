//! Periodic cleanup of time-bounded records.

use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use tracing::{error, info};

use crate::db::Postgres;

/// Default interval between sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Counts of records touched by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_invitations: u64,
    pub manifest_states: u64,
    pub sessions: u64,
}

/// Run a single sweep:
/// - pending invitations past their expiry become `expired`
/// - expired manifest states are deleted
/// - expired or revoked sessions are deleted
#[tracing::instrument(name = "sweep::once")]
pub async fn once(db: &Postgres) -> Result<SweepReport> {
    let expired_invitations = db
        .expire_invitations()
        .await
        .context("expire invitations")?;
    let manifest_states = db
        .cleanup_expired_manifest_states()
        .await
        .context("clean up manifest states")?;
    let sessions = db.cleanup_sessions().await.context("clean up sessions")?;

    let report = SweepReport {
        expired_invitations,
        manifest_states,
        sessions,
    };
    info!(?report, "sweep.complete");
    Ok(report)
}

/// Sweep forever on a fixed interval. A failed sweep is logged and retried on
/// the next tick.
pub async fn run(db: Postgres, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = once(&db).await {
            error!(?err, "sweep.error");
        }
    }
}
