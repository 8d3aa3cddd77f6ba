//! Seeding restoration and seeder-row upkeep.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use reelgrid_swarm::SwarmClient;
use reelgrid_torrent_core::InfoHash;
use reelgrid_torrent_core::store::{ServerStore, TorrentStore};

/// Cadence of the ensure-seeding restorer.
const ENSURE_SEEDING_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Cadence of the seeder-row sync.
const SEEDER_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// One ensure-seeding pass: start every torrent with a local inventory row
/// that is not already active; failures land in `server_torrent_status`.
///
/// # Errors
///
/// Returns an error when the inventory join fails.
pub async fn ensure_seeding_once(
    swarm: &Arc<SwarmClient>,
    torrents: &Arc<dyn TorrentStore>,
    servers: &Arc<dyn ServerStore>,
) -> Result<usize> {
    let active: HashSet<InfoHash> = swarm
        .active_views()
        .await
        .into_iter()
        .map(|view| view.info_hash)
        .collect();
    let seedable = torrents
        .seedable_torrents(swarm.server_id())
        .await
        .context("failed to join inventory with torrents")?;

    let mut started = 0usize;
    for candidate in seedable {
        if active.contains(&candidate.torrent.info_hash) {
            continue;
        }
        let path = PathBuf::from(&candidate.local_path);
        match swarm
            .start_seeding(
                &candidate.torrent.file_bytes,
                &path,
                candidate.torrent.package_id,
                candidate.torrent.id,
            )
            .await
        {
            Ok(_) => started += 1,
            Err(err) => {
                warn!(
                    error = %err,
                    torrent_id = %candidate.torrent.id,
                    "ensure-seeding failed for torrent"
                );
                if let Err(err) = servers
                    .record_server_torrent_status(
                        swarm.server_id(),
                        candidate.torrent.id,
                        "error",
                        Some(&err.to_string()),
                    )
                    .await
                {
                    warn!(error = %err, "failed to record seeding failure");
                }
            }
        }
    }
    if started > 0 {
        info!(started, "ensure-seeding pass restored torrents");
    }
    Ok(started)
}

/// Spawn the five-minute ensure-seeding restorer.
pub fn spawn_ensure_seeding(
    swarm: Arc<SwarmClient>,
    torrents: Arc<dyn TorrentStore>,
    servers: Arc<dyn ServerStore>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ENSURE_SEEDING_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(err) = ensure_seeding_once(&swarm, &torrents, &servers).await {
                        warn!(error = %err, "ensure-seeding pass failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Spawn the thirty-second seeder-row syncer.
pub fn spawn_seeder_sync(
    swarm: Arc<SwarmClient>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SEEDER_SYNC_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => swarm.sync_seeders_to_store().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}
