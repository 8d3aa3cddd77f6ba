//! Periodic torrent-status reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use reelgrid_swarm::{SwarmClient, TorrentStats};
use reelgrid_torrent_core::store::QueueStore;
use reelgrid_torrent_core::{TorrentStatusEntry, TorrentStatusReport};

use crate::api::MainApi;
use crate::service::MainService;

/// Reporter tick cadence.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);
/// With no active downloads, only every sixth tick reports.
const IDLE_SKIP_TICKS: u32 = 6;

/// Where a finished report goes: the store on main, HTTP on clients.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver one report.
    async fn ship(&self, report: &TorrentStatusReport) -> Result<()>;
}

#[async_trait]
impl ReportSink for MainService {
    async fn ship(&self, report: &TorrentStatusReport) -> Result<()> {
        self.ingest_status_report(report).await
    }
}

/// HTTP delivery for client nodes.
pub struct HttpReportSink {
    api: Arc<dyn MainApi>,
}

impl HttpReportSink {
    /// Wrap the control-plane client.
    #[must_use]
    pub fn new(api: Arc<dyn MainApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn ship(&self, report: &TorrentStatusReport) -> Result<()> {
        self.api.post_status_report(report.server_id, report).await
    }
}

/// Classify one torrent for the status report.
///
/// Errored torrents always report `error`. Torrents serving a transfer
/// classify by completion, peers, and the downloading flag; the rest by
/// progress and role.
#[must_use]
pub fn classify_torrent(stats: &TorrentStats) -> &'static str {
    if stats.is_errored {
        return "error";
    }
    if stats.transfer_id.is_some() {
        if stats.progress_percent >= 100.0 {
            return "completed";
        }
        if !stats.is_downloading && stats.peers_connected == 0 {
            return "paused";
        }
        if stats.peers_connected > 0 {
            return "downloading";
        }
        return "checking";
    }
    if stats.progress_percent < 100.0 {
        if stats.is_downloading {
            return "downloading";
        }
        return "verifying";
    }
    if stats.is_seeding {
        return "seeding";
    }
    "completed"
}

/// Ships a status report every five seconds, backing off while idle.
pub struct StatusReporter {
    swarm: Arc<SwarmClient>,
    queue: Arc<dyn QueueStore>,
    sink: Arc<dyn ReportSink>,
    server_id: Uuid,
    sent_first: AtomicBool,
    idle_ticks: AtomicU32,
}

impl StatusReporter {
    /// Assemble the reporter.
    #[must_use]
    pub fn new(
        swarm: Arc<SwarmClient>,
        queue: Arc<dyn QueueStore>,
        sink: Arc<dyn ReportSink>,
        server_id: Uuid,
    ) -> Arc<Self> {
        Arc::new(Self {
            swarm,
            queue,
            sink,
            server_id,
            sent_first: AtomicBool::new(false),
            idle_ticks: AtomicU32::new(0),
        })
    }

    /// Report until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(REPORT_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(err) = self.tick_once().await {
                        warn!(error = %err, "status report failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One reporter tick; returns whether a report was shipped.
    ///
    /// # Errors
    ///
    /// Returns an error when report assembly or delivery fails.
    pub async fn tick_once(&self) -> Result<bool> {
        // `has_active_downloads` is the cheap gate; while idle, five of
        // every six ticks are skipped so seeding-only nodes report ~30 s.
        if !self.swarm.has_active_downloads().await {
            let ticks = self.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if !ticks.is_multiple_of(IDLE_SKIP_TICKS) {
                debug!(ticks, "skipping idle status report tick");
                return Ok(false);
            }
        } else {
            self.idle_ticks.store(0, Ordering::Relaxed);
        }

        let report = self.build_report().await?;
        self.sink.ship(&report).await?;
        self.sent_first.store(true, Ordering::Relaxed);
        Ok(true)
    }

    /// Assemble the report without shipping it.
    ///
    /// # Errors
    ///
    /// Returns an error when queue entries cannot be loaded.
    pub async fn build_report(&self) -> Result<TorrentStatusReport> {
        let stats = self.swarm.get_all_stats_for_reporter().await;
        let torrents = stats
            .iter()
            .map(|stats| TorrentStatusEntry {
                info_hash: stats.info_hash,
                torrent_id: Some(stats.torrent_id),
                transfer_id: stats.transfer_id,
                status: classify_torrent(stats).to_string(),
                progress_percent: stats.progress_percent,
                download_speed_bps: i64::try_from(stats.download_speed_bps)
                    .unwrap_or(i64::MAX),
                upload_speed_bps: i64::try_from(stats.upload_speed_bps).unwrap_or(i64::MAX),
                peers_connected: i32::try_from(stats.peers_connected).unwrap_or(i32::MAX),
                eta_seconds: stats
                    .eta_seconds
                    .map(|eta| i64::try_from(eta).unwrap_or(i64::MAX)),
                error_message: stats.error_message.clone(),
            })
            .collect();
        let queue = self.queue.active_entries(self.server_id).await?;
        Ok(TorrentStatusReport {
            server_id: self.server_id,
            is_full_sync: !self.sent_first.load(Ordering::Relaxed),
            torrents,
            queue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelgrid_torrent_core::InfoHash;

    fn stats() -> TorrentStats {
        TorrentStats {
            info_hash: InfoHash::of_info_bytes(b"classify"),
            torrent_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            transfer_id: None,
            local_path: "/library/PKG".to_string(),
            progress_percent: 0.0,
            downloaded_bytes: 0,
            total_bytes: 100,
            download_speed_bps: 0,
            upload_speed_bps: 0,
            peers_connected: 0,
            eta_seconds: None,
            is_seeding: false,
            is_downloading: false,
            is_errored: false,
            error_message: None,
        }
    }

    #[test]
    fn errored_wins_over_everything() {
        let mut s = stats();
        s.is_errored = true;
        s.progress_percent = 100.0;
        s.transfer_id = Some(Uuid::new_v4());
        assert_eq!(classify_torrent(&s), "error");
    }

    #[test]
    fn transfer_classification_branches() {
        let mut s = stats();
        s.transfer_id = Some(Uuid::new_v4());

        s.progress_percent = 100.0;
        assert_eq!(classify_torrent(&s), "completed");

        s.progress_percent = 40.0;
        s.is_downloading = false;
        s.peers_connected = 0;
        assert_eq!(classify_torrent(&s), "paused");

        s.is_downloading = true;
        s.peers_connected = 3;
        assert_eq!(classify_torrent(&s), "downloading");

        s.peers_connected = 0;
        assert_eq!(classify_torrent(&s), "checking");
    }

    #[test]
    fn detached_classification_branches() {
        let mut s = stats();
        s.progress_percent = 10.0;
        s.is_downloading = true;
        assert_eq!(classify_torrent(&s), "downloading");

        s.is_downloading = false;
        assert_eq!(classify_torrent(&s), "verifying");

        s.progress_percent = 100.0;
        s.is_seeding = true;
        assert_eq!(classify_torrent(&s), "seeding");

        s.is_seeding = false;
        assert_eq!(classify_torrent(&s), "completed");
    }
}
