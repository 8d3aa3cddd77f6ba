//! Background loops owned by the swarm client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use reelgrid_torrent_core::InfoHash;

use crate::client::SwarmClient;
use crate::sinks::ProgressSink;

/// Cadence of the per-download monitor.
const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
/// Cadence of the integrity watcher.
const INTEGRITY_INTERVAL: Duration = Duration::from_secs(30);
/// Cadence of tracker re-registration for seeders.
const SEEDER_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Spawn the monitor for one download; exits when the torrent goes away or
/// the transfer completes.
pub fn spawn_download_monitor(
    client: Arc<SwarmClient>,
    info_hash: InfoHash,
    transfer_id: Uuid,
    sink: Arc<dyn ProgressSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(MONITOR_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let Some(stats) = client.get_stats(info_hash).await else {
                debug!(info_hash = %info_hash, "download monitor exiting, torrent gone");
                break;
            };
            debug!(
                info_hash = %info_hash,
                transfer_id = %transfer_id,
                progress = stats.progress_percent,
                download_bps = stats.download_speed_bps,
                peers = stats.peers_connected,
                "download monitor tick"
            );
            if stats.is_errored {
                debug!(info_hash = %info_hash, "download monitor exiting, torrent errored");
                break;
            }
            if let Err(err) = sink.report_progress(transfer_id, &stats).await {
                warn!(error = %err, transfer_id = %transfer_id, "failed to report progress");
            }
            if stats.progress_percent >= 100.0 {
                if let Err(err) = client.complete_download(info_hash).await {
                    warn!(error = %err, info_hash = %info_hash, "failed to finalise download");
                }
                if let Err(err) = sink.transfer_completed(transfer_id, &stats).await {
                    warn!(error = %err, transfer_id = %transfer_id, "failed to report completion");
                }
                break;
            }
        }
    })
}

/// Spawn the 30-second integrity watcher.
pub fn spawn_integrity_watcher(
    client: Arc<SwarmClient>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(INTEGRITY_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => client.integrity_check().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Spawn the periodic tracker re-registration task.
pub fn spawn_seeder_maintenance(
    client: Arc<SwarmClient>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SEEDER_MAINTENANCE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => client.refresh_tracker_registrations().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}
