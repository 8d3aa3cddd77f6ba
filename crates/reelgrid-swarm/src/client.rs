//! The per-node swarm client.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reelgrid_bencode::{InfoDict, Metainfo};
use reelgrid_torrent_core::store::{
    CompletionStore, SeederStore, ServerStore, TorrentStore, TransferStore,
};
use reelgrid_torrent_core::{InfoHash, PeerId};
use reelgrid_tracker::Tracker;

use crate::diskerr::{DiskErrorKind, classify_write_error};
use crate::monitor::spawn_download_monitor;
use crate::session::{DEFAULT_CONNECTION_CAP, SessionStats, SessionTorrent, SwarmSession};
use crate::sinks::{ProgressSink, TransferErrorReporter};
use crate::stats::{ReporterSample, SpeedSample, TorrentStats, eta_seconds};
use crate::storage::StorageLayout;

/// Message recorded when a seeder's payload disappears from disk.
const MSG_DATA_DELETED: &str = "Data files deleted from disk";
/// Pause applied before re-enabling a torrent after a transient disk error.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(2);
/// File entries sampled by the integrity watcher's spot check.
const SPOT_CHECK_FILES: usize = 3;

/// Static wiring for the client.
pub struct SwarmClientConfig {
    /// This node's identifier.
    pub server_id: Uuid,
    /// BitTorrent engine listen port advertised to the tracker.
    pub data_port: u16,
    /// Download destination root.
    pub download_dir: PathBuf,
    /// Soft cap on concurrently seeded torrents; 0 disables the check.
    pub max_seeds: usize,
    /// Soft cap on concurrent downloads; 0 disables the check.
    pub max_downloads: usize,
}

#[allow(clippy::struct_excessive_bools)]
struct ActiveTorrent {
    info_hash: InfoHash,
    torrent_id: Uuid,
    package_id: Uuid,
    transfer_id: Option<Uuid>,
    local_path: PathBuf,
    layout: StorageLayout,
    info: Arc<InfoDict>,
    announce_url: String,
    peer_id: PeerId,
    is_seeding: bool,
    is_downloading: bool,
    is_errored: bool,
    error_message: Option<String>,
    integrity_reset: bool,
    write_errors: u32,
}

/// Read-only view of one active torrent for reporters.
#[derive(Debug, Clone)]
pub struct ActiveTorrentView {
    /// Swarm identifier.
    pub info_hash: InfoHash,
    /// Torrent row identifier.
    pub torrent_id: Uuid,
    /// Package identifier.
    pub package_id: Uuid,
    /// Attached transfer, when downloading.
    pub transfer_id: Option<Uuid>,
    /// Package path on this node.
    pub local_path: PathBuf,
    /// Role flag: seeding.
    pub is_seeding: bool,
    /// Role flag: downloading.
    pub is_downloading: bool,
    /// Role flag: fatally errored.
    pub is_errored: bool,
    /// Failure description for errored torrents.
    pub error_message: Option<String>,
}

impl ActiveTorrent {
    fn view(&self) -> ActiveTorrentView {
        ActiveTorrentView {
            info_hash: self.info_hash,
            torrent_id: self.torrent_id,
            package_id: self.package_id,
            transfer_id: self.transfer_id,
            local_path: self.local_path.clone(),
            is_seeding: self.is_seeding,
            is_downloading: self.is_downloading,
            is_errored: self.is_errored,
            error_message: self.error_message.clone(),
        }
    }
}

/// Owns the engine session and every `ActiveTorrent` on this node.
pub struct SwarmClient {
    config: SwarmClientConfig,
    session: Arc<dyn SwarmSession>,
    completion: Arc<dyn CompletionStore>,
    seeders: Arc<dyn SeederStore>,
    servers: Arc<dyn ServerStore>,
    torrent_store: Arc<dyn TorrentStore>,
    transfer_store: Arc<dyn TransferStore>,
    tracker: Option<Arc<Tracker>>,
    progress_sink: Arc<dyn ProgressSink>,
    error_reporter: Arc<dyn TransferErrorReporter>,
    torrents: RwLock<HashMap<InfoHash, ActiveTorrent>>,
    monitor_samples: StdMutex<HashMap<InfoHash, SpeedSample>>,
    reporter_samples: StdMutex<HashMap<InfoHash, ReporterSample>>,
    latest_stats: StdMutex<HashMap<InfoHash, TorrentStats>>,
}

/// External collaborators injected at construction.
pub struct SwarmClientDeps {
    /// Engine session implementation.
    pub session: Arc<dyn SwarmSession>,
    /// Shared piece-completion cache.
    pub completion: Arc<dyn CompletionStore>,
    /// Seeder registrations.
    pub seeders: Arc<dyn SeederStore>,
    /// Ingestion tracking and fleet registry.
    pub servers: Arc<dyn ServerStore>,
    /// Torrent rows and inventory.
    pub torrent_store: Arc<dyn TorrentStore>,
    /// Transfer rows for restart resume.
    pub transfer_store: Arc<dyn TransferStore>,
    /// In-process tracker for direct registration, when co-located.
    pub tracker: Option<Arc<Tracker>>,
    /// Progress callback for download monitors.
    pub progress_sink: Arc<dyn ProgressSink>,
    /// Fatal-error callback.
    pub error_reporter: Arc<dyn TransferErrorReporter>,
}

impl SwarmClient {
    /// Assemble the client.
    #[must_use]
    pub fn new(config: SwarmClientConfig, deps: SwarmClientDeps) -> Arc<Self> {
        Arc::new(Self {
            config,
            session: deps.session,
            completion: deps.completion,
            seeders: deps.seeders,
            servers: deps.servers,
            torrent_store: deps.torrent_store,
            transfer_store: deps.transfer_store,
            tracker: deps.tracker,
            progress_sink: deps.progress_sink,
            error_reporter: deps.error_reporter,
            torrents: RwLock::new(HashMap::new()),
            monitor_samples: StdMutex::new(HashMap::new()),
            reporter_samples: StdMutex::new(HashMap::new()),
            latest_stats: StdMutex::new(HashMap::new()),
        })
    }

    /// This node's identifier.
    #[must_use]
    pub const fn server_id(&self) -> Uuid {
        self.config.server_id
    }

    /// The configured download root, used for containment checks.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    /// Start seeding a package from `local_path`.
    ///
    /// A second call with the same bytes is a no-op. The torrent's top-level
    /// name equals the package directory basename, so storage roots at the
    /// parent of `local_path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the metadata cannot be parsed or the engine
    /// rejects the torrent.
    pub async fn start_seeding(
        &self,
        torrent_bytes: &[u8],
        local_path: &Path,
        package_id: Uuid,
        torrent_id: Uuid,
    ) -> Result<InfoHash> {
        let parent = local_path
            .parent()
            .ok_or_else(|| anyhow!("seed path {} has no parent", local_path.display()))?;
        let layout = StorageLayout::Plain {
            parent: parent.to_path_buf(),
        };
        self.start_seeding_with_layout(torrent_bytes, local_path, layout, package_id, torrent_id)
            .await
    }

    /// Start seeding with split storage: `.mxf` payloads under `mxf_dir`'s
    /// parent, everything else under the shadow directory's parent.
    ///
    /// # Errors
    ///
    /// Returns an error when the metadata cannot be parsed or the engine
    /// rejects the torrent.
    pub async fn start_seeding_split(
        &self,
        torrent_bytes: &[u8],
        mxf_dir: &Path,
        xml_shadow_dir: &Path,
        package_id: Uuid,
        torrent_id: Uuid,
    ) -> Result<InfoHash> {
        let mxf_parent = mxf_dir
            .parent()
            .ok_or_else(|| anyhow!("mxf path {} has no parent", mxf_dir.display()))?;
        let shadow_parent = xml_shadow_dir
            .parent()
            .ok_or_else(|| anyhow!("shadow path {} has no parent", xml_shadow_dir.display()))?;
        let layout = StorageLayout::Split {
            mxf_parent: mxf_parent.to_path_buf(),
            shadow_parent: shadow_parent.to_path_buf(),
        };
        self.start_seeding_with_layout(torrent_bytes, mxf_dir, layout, package_id, torrent_id)
            .await
    }

    async fn start_seeding_with_layout(
        &self,
        torrent_bytes: &[u8],
        local_path: &Path,
        layout: StorageLayout,
        package_id: Uuid,
        torrent_id: Uuid,
    ) -> Result<InfoHash> {
        let (meta, info, info_hash) = parse_torrent(torrent_bytes)?;
        {
            let torrents = self.torrents.read().await;
            if torrents.contains_key(&info_hash) {
                debug!(info_hash = %info_hash, "torrent already active, seeding start is a no-op");
                return Ok(info_hash);
            }
            let seeding = torrents.values().filter(|entry| entry.is_seeding).count();
            if self.config.max_seeds != 0 && seeding >= self.config.max_seeds {
                warn!(
                    seeding,
                    cap = self.config.max_seeds,
                    "soft seed cap exceeded, seeding anyway"
                );
            }
        }
        if local_path.file_name().and_then(|name| name.to_str()) != Some(info.name.as_str()) {
            warn!(
                info_hash = %info_hash,
                path = %local_path.display(),
                torrent_name = %info.name,
                "seed path basename differs from torrent name"
            );
        }

        let info = Arc::new(info);
        self.session
            .register(SessionTorrent {
                info_hash,
                info: (*info).clone(),
                layout: layout.clone(),
            })
            .await
            .context("failed to register seeding torrent")?;
        self.session
            .verify_all(&info_hash)
            .await
            .context("failed to verify seed data")?;

        let peer_id = PeerId::for_seeder(self.config.server_id, &info_hash);
        let entry = ActiveTorrent {
            info_hash,
            torrent_id,
            package_id,
            transfer_id: None,
            local_path: local_path.to_path_buf(),
            layout,
            info,
            announce_url: meta.announce.clone(),
            peer_id,
            is_seeding: true,
            is_downloading: false,
            is_errored: false,
            error_message: None,
            integrity_reset: false,
            write_errors: 0,
        };
        self.register_seeder_with_tracker(&entry).await;
        self.torrents.write().await.insert(info_hash, entry);

        let path_text = local_path.display().to_string();
        self.seeders
            .upsert_seeder(torrent_id, self.config.server_id, &path_text)
            .await
            .context("failed to register seeder row")?;
        info!(info_hash = %info_hash, path = %path_text, "seeding started");
        Ok(info_hash)
    }

    /// Start downloading into `dest_path`, spawning the download monitor.
    ///
    /// # Errors
    ///
    /// Returns an error when the metadata cannot be parsed or the engine
    /// rejects the torrent.
    pub async fn start_download(
        self: &Arc<Self>,
        torrent_bytes: &[u8],
        dest_path: &Path,
        package_id: Uuid,
        torrent_id: Uuid,
        transfer_id: Uuid,
    ) -> Result<InfoHash> {
        let (meta, info, info_hash) = parse_torrent(torrent_bytes)?;
        {
            let torrents = self.torrents.read().await;
            if torrents.contains_key(&info_hash) {
                debug!(info_hash = %info_hash, "torrent already active, download start is a no-op");
                return Ok(info_hash);
            }
            let downloading = torrents.values().filter(|entry| entry.is_downloading).count();
            if self.config.max_downloads != 0 && downloading >= self.config.max_downloads {
                warn!(
                    downloading,
                    cap = self.config.max_downloads,
                    "soft download cap exceeded, starting anyway"
                );
            }
        }
        let parent = dest_path
            .parent()
            .ok_or_else(|| anyhow!("download path {} has no parent", dest_path.display()))?;
        let layout = StorageLayout::Plain {
            parent: parent.to_path_buf(),
        };
        layout
            .create_directories(&info)
            .context("failed to pre-create download directories")?;

        let info = Arc::new(info);
        self.session
            .register(SessionTorrent {
                info_hash,
                info: (*info).clone(),
                layout: layout.clone(),
            })
            .await
            .context("failed to register download torrent")?;
        self.session
            .verify_all(&info_hash)
            .await
            .context("failed to start download verification")?;

        let entry = ActiveTorrent {
            info_hash,
            torrent_id,
            package_id,
            transfer_id: Some(transfer_id),
            local_path: dest_path.to_path_buf(),
            layout,
            info,
            announce_url: meta.announce.clone(),
            peer_id: PeerId::for_seeder(self.config.server_id, &info_hash),
            is_seeding: false,
            is_downloading: true,
            is_errored: false,
            error_message: None,
            integrity_reset: false,
            write_errors: 0,
        };
        self.torrents.write().await.insert(info_hash, entry);
        info!(
            info_hash = %info_hash,
            transfer_id = %transfer_id,
            path = %dest_path.display(),
            "download started"
        );
        let _monitor = spawn_download_monitor(
            Arc::clone(self),
            info_hash,
            transfer_id,
            Arc::clone(&self.progress_sink),
        );
        Ok(info_hash)
    }

    /// Drop and re-add a torrent at a new path; piece completion survives
    /// because it is keyed by `(info-hash, index)`.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown or re-registration fails.
    pub async fn switch_seeding_path(
        &self,
        info_hash: InfoHash,
        new_path: &Path,
        torrent_id: Uuid,
    ) -> Result<()> {
        let mut torrents = self.torrents.write().await;
        let entry = torrents
            .get_mut(&info_hash)
            .ok_or_else(|| anyhow!("torrent {info_hash} is not active"))?;
        let parent = new_path
            .parent()
            .ok_or_else(|| anyhow!("seed path {} has no parent", new_path.display()))?;
        let layout = StorageLayout::Plain {
            parent: parent.to_path_buf(),
        };

        self.session.deregister(&info_hash).await?;
        self.session
            .register(SessionTorrent {
                info_hash,
                info: (*entry.info).clone(),
                layout: layout.clone(),
            })
            .await
            .context("failed to re-register torrent at new path")?;
        self.session.verify_all(&info_hash).await?;

        entry.layout = layout;
        entry.local_path = new_path.to_path_buf();
        entry.torrent_id = torrent_id;
        let path_text = new_path.display().to_string();
        drop(torrents);
        self.seeders
            .upsert_seeder(torrent_id, self.config.server_id, &path_text)
            .await
            .context("failed to refresh seeder row after path switch")?;
        info!(info_hash = %info_hash, path = %path_text, "seeding path switched");
        Ok(())
    }

    /// Pause: cancel piece requests and drop the connection cap to zero.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown.
    pub async fn pause_torrent(&self, info_hash: InfoHash) -> Result<()> {
        self.session.cancel_requests(&info_hash).await?;
        self.session.set_connection_cap(&info_hash, 0).await?;
        if let Some(entry) = self.torrents.write().await.get_mut(&info_hash) {
            entry.is_downloading = false;
        }
        info!(info_hash = %info_hash, "torrent paused");
        Ok(())
    }

    /// Resume: restore the connection cap and re-issue the download.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown.
    pub async fn resume_torrent(&self, info_hash: InfoHash) -> Result<()> {
        self.session
            .set_connection_cap(&info_hash, DEFAULT_CONNECTION_CAP)
            .await?;
        self.session.verify_all(&info_hash).await?;
        if let Some(entry) = self.torrents.write().await.get_mut(&info_hash) {
            if entry.transfer_id.is_some() && !entry.is_errored {
                entry.is_downloading = true;
            }
        }
        info!(info_hash = %info_hash, "torrent resumed");
        Ok(())
    }

    /// Stop a torrent and forget its samples.
    ///
    /// # Errors
    ///
    /// Returns an error when deregistration fails.
    pub async fn stop_torrent(&self, info_hash: InfoHash) -> Result<()> {
        self.session.deregister(&info_hash).await?;
        let removed = self.torrents.write().await.remove(&info_hash);
        lock_clean(&self.monitor_samples, &info_hash);
        lock_clean_reporter(&self.reporter_samples, &info_hash);
        if let Ok(mut latest) = self.latest_stats.lock() {
            latest.remove(&info_hash);
        }
        if let Some(entry) = removed {
            self.seeders
                .remove_seeder(entry.torrent_id, self.config.server_id)
                .await
                .ok();
            info!(info_hash = %info_hash, "torrent stopped");
        }
        Ok(())
    }

    /// Stats for one torrent, sampled with the monitor's sampler.
    pub async fn get_stats(&self, info_hash: InfoHash) -> Option<TorrentStats> {
        let view = {
            let torrents = self.torrents.read().await;
            torrents.get(&info_hash).map(ActiveTorrent::view)
        }?;
        let session_stats = self.session.stats(&info_hash).await.ok()?;
        let stats = self.build_monitor_stats(&view, &session_stats);
        if let Ok(mut latest) = self.latest_stats.lock() {
            latest.insert(info_hash, stats.clone());
        }
        Some(stats)
    }

    /// Stats for every active torrent, monitor sampler semantics.
    pub async fn get_all_stats(&self) -> Vec<TorrentStats> {
        let views: Vec<ActiveTorrentView> = {
            let torrents = self.torrents.read().await;
            torrents.values().map(ActiveTorrent::view).collect()
        };
        let mut all = Vec::with_capacity(views.len());
        for view in views {
            if let Ok(session_stats) = self.session.stats(&view.info_hash).await {
                let stats = self.build_monitor_stats(&view, &session_stats);
                if let Ok(mut latest) = self.latest_stats.lock() {
                    latest.insert(view.info_hash, stats.clone());
                }
                all.push(stats);
            }
        }
        all
    }

    /// Stats for the status reporter: separate sampler, EMA-smoothed ETA.
    ///
    /// The reporter must never touch the monitor's sampler; sharing it would
    /// corrupt the monitor's rate readings.
    pub async fn get_all_stats_for_reporter(&self) -> Vec<TorrentStats> {
        let views: Vec<ActiveTorrentView> = {
            let torrents = self.torrents.read().await;
            torrents.values().map(ActiveTorrent::view).collect()
        };
        let mut all = Vec::with_capacity(views.len());
        for view in views {
            if let Ok(session_stats) = self.session.stats(&view.info_hash).await {
                all.push(self.build_reporter_stats(&view, &session_stats));
            }
        }
        all
    }

    /// Cheap gate the reporter consults before sampling anything.
    pub async fn has_active_downloads(&self) -> bool {
        self.torrents
            .read()
            .await
            .values()
            .any(|entry| entry.is_downloading && !entry.is_errored)
    }

    /// Last stats the monitor produced for a torrent, without sampling.
    #[must_use]
    pub fn latest_stats(&self, info_hash: &InfoHash) -> Option<TorrentStats> {
        self.latest_stats
            .lock()
            .ok()
            .and_then(|latest| latest.get(info_hash).cloned())
    }

    /// Read-only views of every active torrent.
    pub async fn active_views(&self) -> Vec<ActiveTorrentView> {
        self.torrents
            .read()
            .await
            .values()
            .map(ActiveTorrent::view)
            .collect()
    }

    /// Handle one engine write error per the disk-error policy.
    pub async fn handle_write_error(&self, info_hash: InfoHash, error_text: &str) {
        let (count, transfer_id) = {
            let mut torrents = self.torrents.write().await;
            let Some(entry) = torrents.get_mut(&info_hash) else {
                return;
            };
            entry.write_errors += 1;
            (entry.write_errors, entry.transfer_id)
        };

        match classify_write_error(error_text, count) {
            DiskErrorKind::MissingDirectory { path } => {
                if let Some(path) = path {
                    let dir = Path::new(&path);
                    let target = if path.ends_with('/') {
                        dir
                    } else {
                        dir.parent().unwrap_or(dir)
                    };
                    if let Err(err) = std::fs::create_dir_all(target) {
                        warn!(error = %err, path = %target.display(), "failed to repair missing directory");
                    }
                } else if let Some(entry) = self.torrents.read().await.get(&info_hash) {
                    let _ = entry.layout.create_directories(&entry.info);
                }
                self.reset_write_errors(info_hash).await;
                self.reenable(info_hash).await;
            }
            DiskErrorKind::Fatal { message } => {
                warn!(info_hash = %info_hash, message, "fatal disk error, stopping data flow");
                let _ = self.session.cancel_requests(&info_hash).await;
                let _ = self.session.set_connection_cap(&info_hash, 0).await;
                {
                    let mut torrents = self.torrents.write().await;
                    if let Some(entry) = torrents.get_mut(&info_hash) {
                        entry.is_errored = true;
                        entry.is_downloading = false;
                        entry.error_message = Some(message.to_string());
                    }
                }
                if let Some(transfer_id) = transfer_id {
                    if let Err(err) = self
                        .error_reporter
                        .report_error(transfer_id, "error", message)
                        .await
                    {
                        warn!(error = %err, transfer_id = %transfer_id, "failed to publish disk error");
                    }
                }
            }
            DiskErrorKind::Transient => {
                debug!(info_hash = %info_hash, count, error = %error_text, "transient write error");
                tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
                self.reenable(info_hash).await;
            }
        }
    }

    /// Start seeding every torrent whose package data is on this node.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory join fails; individual torrents
    /// failing to seed are logged and skipped.
    pub async fn seed_existing(&self) -> Result<usize> {
        let seedable = self
            .torrent_store
            .seedable_torrents(self.config.server_id)
            .await
            .context("failed to load seedable torrents")?;
        let mut started = 0usize;
        for candidate in seedable {
            let path = PathBuf::from(&candidate.local_path);
            if !path.exists() {
                debug!(path = %path.display(), "skipping seed restore, data missing");
                continue;
            }
            match self
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
                        "failed to restore seeding"
                    );
                    self.servers
                        .record_server_torrent_status(
                            self.config.server_id,
                            candidate.torrent.id,
                            "error",
                            Some(&err.to_string()),
                        )
                        .await
                        .ok();
                }
            }
        }
        info!(started, "seed restore pass finished");
        Ok(started)
    }

    /// Resume transfers left in `downloading` by a previous process.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer scan fails.
    pub async fn resume_downloads(self: &Arc<Self>) -> Result<usize> {
        let transfers = self
            .transfer_store
            .downloading_transfers(self.config.server_id)
            .await
            .context("failed to scan downloading transfers")?;
        let mut resumed = 0usize;
        for transfer in transfers {
            let Some(record) = self
                .torrent_store
                .torrent_by_info_hash(&transfer.info_hash)
                .await?
            else {
                warn!(info_hash = %transfer.info_hash, "transfer references unknown torrent");
                continue;
            };
            let name = match Metainfo::parse(&record.file_bytes)
                .and_then(|meta| meta.info().map(|info| info.name))
            {
                Ok(name) => name,
                Err(err) => {
                    warn!(error = %err, info_hash = %transfer.info_hash, "stored torrent unparsable");
                    continue;
                }
            };
            let dest = self.config.download_dir.join(name);
            match self
                .start_download(
                    &record.file_bytes,
                    &dest,
                    record.package_id,
                    record.id,
                    transfer.id,
                )
                .await
            {
                Ok(_) => resumed += 1,
                Err(err) => {
                    warn!(error = %err, transfer_id = %transfer.id, "failed to resume download");
                }
            }
        }
        info!(resumed, "download resume pass finished");
        Ok(resumed)
    }

    /// Delete `completed = false` completion rows left by a dead process.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge fails.
    pub async fn repair_piece_completion(&self) -> Result<u64> {
        let purged = self
            .completion
            .purge_incomplete_rows()
            .await
            .context("failed to repair piece completion")?;
        if purged > 0 {
            info!(purged, "purged stale incomplete piece rows");
        }
        Ok(purged)
    }

    /// Re-register every seeding torrent with the in-process tracker so the
    /// liveness timeout never expires a real seeder.
    pub async fn refresh_tracker_registrations(&self) {
        let entries: Vec<(InfoHash, PeerId, bool)> = {
            let torrents = self.torrents.read().await;
            torrents
                .values()
                .map(|entry| (entry.info_hash, entry.peer_id, entry.is_seeding))
                .collect()
        };
        let Some(tracker) = &self.tracker else {
            return;
        };
        for (info_hash, peer_id, is_seeding) in entries {
            if !is_seeding {
                continue;
            }
            tracker
                .register_seeder(
                    info_hash,
                    &peer_id,
                    std::net::IpAddr::from([127, 0, 0, 1]),
                    self.config.data_port,
                    0,
                )
                .await;
            self.update_peer_gauge(info_hash).await;
        }
    }

    /// Refresh seeder rows for every seeding torrent.
    pub async fn sync_seeders_to_store(&self) {
        let entries: Vec<(Uuid, String)> = {
            let torrents = self.torrents.read().await;
            torrents
                .values()
                .filter(|entry| entry.is_seeding)
                .map(|entry| (entry.torrent_id, entry.local_path.display().to_string()))
                .collect()
        };
        for (torrent_id, path) in entries {
            if let Err(err) = self
                .seeders
                .upsert_seeder(torrent_id, self.config.server_id, &path)
                .await
            {
                warn!(error = %err, torrent_id = %torrent_id, "failed to refresh seeder row");
            }
        }
    }

    /// One integrity pass: restore deleted downloads, flag deleted seeds.
    pub async fn integrity_check(&self) {
        let views: Vec<(InfoHash, bool, bool, bool)> = {
            let torrents = self.torrents.read().await;
            torrents
                .values()
                .map(|entry| {
                    let root = entry.layout.root_path(&entry.info.name);
                    let data_present = root.exists()
                        && (!entry.is_downloading
                            || entry.layout.spot_check_files(&entry.info, SPOT_CHECK_FILES)
                            || !entry.integrity_reset_candidate());
                    (
                        entry.info_hash,
                        data_present,
                        entry.is_seeding,
                        entry.integrity_reset,
                    )
                })
                .collect()
        };

        for (info_hash, data_present, is_seeding, already_reset) in views {
            if data_present {
                continue;
            }
            let known_complete = self
                .session
                .stats(&info_hash)
                .await
                .is_ok_and(|stats| stats.verified_pieces > 0);
            if !known_complete {
                continue;
            }
            if is_seeding {
                warn!(info_hash = %info_hash, "seed data deleted from disk");
                let _ = self.session.set_connection_cap(&info_hash, 0).await;
                let mut torrents = self.torrents.write().await;
                if let Some(entry) = torrents.get_mut(&info_hash) {
                    entry.is_errored = true;
                    entry.is_seeding = false;
                    entry.error_message = Some(MSG_DATA_DELETED.to_string());
                }
            } else if !already_reset {
                warn!(info_hash = %info_hash, "download data deleted, resetting torrent");
                self.reset_download(info_hash).await;
            }
        }
    }

    async fn reset_download(&self, info_hash: InfoHash) {
        let (info, layout, announce) = {
            let mut torrents = self.torrents.write().await;
            let Some(entry) = torrents.get_mut(&info_hash) else {
                return;
            };
            entry.integrity_reset = true;
            entry.is_downloading = true;
            (
                Arc::clone(&entry.info),
                entry.layout.clone(),
                entry.announce_url.clone(),
            )
        };
        if let Err(err) = self.completion.clear_pieces(&info_hash).await {
            warn!(error = %err, "failed to clear completion rows during reset");
        }
        if let Err(err) = layout.create_directories(&info) {
            warn!(error = %err, "failed to recreate directories during reset");
        }
        // Drop and re-add under the preserved announce URL; the parsed
        // metainfo may have lost it.
        let _ = self.session.deregister(&info_hash).await;
        if let Err(err) = self
            .session
            .register(SessionTorrent {
                info_hash,
                info: (*info).clone(),
                layout,
            })
            .await
        {
            warn!(error = %err, announce = %announce, "failed to re-register reset torrent");
            return;
        }
        let _ = self.session.verify_all(&info_hash).await;
    }

    /// Flip a finished download into a seeder and record the side effects.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown.
    pub async fn complete_download(&self, info_hash: InfoHash) -> Result<()> {
        let (torrent_id, package_id, path_text) = {
            let mut torrents = self.torrents.write().await;
            let entry = torrents
                .get_mut(&info_hash)
                .ok_or_else(|| anyhow!("torrent {info_hash} is not active"))?;
            entry.is_downloading = false;
            entry.is_seeding = true;
            (
                entry.torrent_id,
                entry.package_id,
                entry.local_path.display().to_string(),
            )
        };

        self.seeders
            .upsert_seeder(torrent_id, self.config.server_id, &path_text)
            .await
            .ok();
        self.torrent_store
            .upsert_inventory(package_id, self.config.server_id, &path_text)
            .await
            .ok();
        self.servers
            .create_ingestion_tracking(package_id, self.config.server_id, &path_text)
            .await
            .ok();
        if let Some(entry) = self.torrents.read().await.get(&info_hash) {
            self.register_seeder_with_tracker(entry).await;
        }
        info!(info_hash = %info_hash, "download complete, now seeding");
        Ok(())
    }

    async fn register_seeder_with_tracker(&self, entry: &ActiveTorrent) {
        if let Some(tracker) = &self.tracker {
            tracker
                .register_seeder(
                    entry.info_hash,
                    &entry.peer_id,
                    std::net::IpAddr::from([127, 0, 0, 1]),
                    self.config.data_port,
                    0,
                )
                .await;
        }
    }

    async fn update_peer_gauge(&self, info_hash: InfoHash) {
        if let Some(tracker) = &self.tracker {
            let size = tracker.swarm_size(info_hash).await;
            let peers = u32::try_from(size.saturating_sub(1)).unwrap_or(u32::MAX);
            let _ = self.session.set_peer_count(&info_hash, peers).await;
        }
    }

    async fn reenable(&self, info_hash: InfoHash) {
        let _ = self
            .session
            .set_connection_cap(&info_hash, DEFAULT_CONNECTION_CAP)
            .await;
        let _ = self.session.verify_all(&info_hash).await;
    }

    async fn reset_write_errors(&self, info_hash: InfoHash) {
        if let Some(entry) = self.torrents.write().await.get_mut(&info_hash) {
            entry.write_errors = 0;
        }
    }

    fn build_monitor_stats(
        &self,
        view: &ActiveTorrentView,
        session_stats: &SessionStats,
    ) -> TorrentStats {
        let current = SpeedSample::now(
            session_stats.bytes_read_data,
            session_stats.bytes_written_data,
        );
        let (download_bps, upload_bps) = {
            let mut samples = self
                .monitor_samples
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let rates = samples
                .get(&view.info_hash)
                .map_or((0, 0), |prev| prev.rates_to(&current));
            samples.insert(view.info_hash, current);
            rates
        };
        let remaining = session_stats
            .total_bytes
            .saturating_sub(session_stats.verified_bytes);
        let eta = eta_seconds(remaining, download_bps).map(|eta| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                eta.round() as u64
            }
        });
        assemble_stats(view, session_stats, download_bps, upload_bps, eta)
    }

    fn build_reporter_stats(
        &self,
        view: &ActiveTorrentView,
        session_stats: &SessionStats,
    ) -> TorrentStats {
        let current = SpeedSample::now(
            session_stats.bytes_read_data,
            session_stats.bytes_written_data,
        );
        let remaining = session_stats
            .total_bytes
            .saturating_sub(session_stats.verified_bytes);
        let (download_bps, upload_bps, eta) = {
            let mut samples = self
                .reporter_samples
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut sample = samples.get(&view.info_hash).copied().unwrap_or(
                ReporterSample {
                    prev: current,
                    eta_ema: None,
                },
            );
            let (download_bps, upload_bps) = sample.prev.rates_to(&current);
            let eta = sample.smooth_eta(eta_seconds(remaining, download_bps));
            sample.prev = current;
            samples.insert(view.info_hash, sample);
            (download_bps, upload_bps, eta)
        };
        assemble_stats(view, session_stats, download_bps, upload_bps, eta)
    }
}

impl ActiveTorrent {
    /// Whether a vanished payload counts as "deleted after known-complete".
    const fn integrity_reset_candidate(&self) -> bool {
        !self.integrity_reset
    }
}

fn assemble_stats(
    view: &ActiveTorrentView,
    session_stats: &SessionStats,
    download_bps: u64,
    upload_bps: u64,
    eta: Option<u64>,
) -> TorrentStats {
    TorrentStats {
        info_hash: view.info_hash,
        torrent_id: view.torrent_id,
        package_id: view.package_id,
        transfer_id: view.transfer_id,
        local_path: view.local_path.display().to_string(),
        progress_percent: session_stats.progress_percent(),
        downloaded_bytes: session_stats.verified_bytes,
        total_bytes: session_stats.total_bytes,
        download_speed_bps: download_bps,
        upload_speed_bps: upload_bps,
        peers_connected: session_stats.peers_connected,
        eta_seconds: eta,
        is_seeding: view.is_seeding,
        is_downloading: view.is_downloading,
        is_errored: view.is_errored,
        error_message: view.error_message.clone(),
    }
}

fn parse_torrent(torrent_bytes: &[u8]) -> Result<(Metainfo, InfoDict, InfoHash)> {
    let meta = Metainfo::parse(torrent_bytes).context("failed to parse torrent metadata")?;
    let info = meta.info().context("failed to parse info dictionary")?;
    let info_hash = InfoHash::of_info_bytes(&meta.info_bytes);
    Ok((meta, info, info_hash))
}

fn lock_clean(map: &StdMutex<HashMap<InfoHash, SpeedSample>>, info_hash: &InfoHash) {
    if let Ok(mut samples) = map.lock() {
        samples.remove(info_hash);
    }
}

fn lock_clean_reporter(map: &StdMutex<HashMap<InfoHash, ReporterSample>>, info_hash: &InfoHash) {
    if let Ok(mut samples) = map.lock() {
        samples.remove(info_hash);
    }
}
