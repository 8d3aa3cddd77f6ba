//! The per-node queue manager.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reelgrid_generator::{GenerateRequest, GenerationError, Generator, total_bytes};
use reelgrid_swarm::SwarmClient;
use reelgrid_torrent_core::store::{QueueStore, TorrentStore};
use reelgrid_torrent_core::{QueueItem, QueueStatus, TorrentRecord};

use crate::check::QueueCheckClient;

/// Scheduler tick cadence.
const SCHEDULE_INTERVAL: Duration = Duration::from_secs(10);
/// Default concurrent generator workers per node.
const DEFAULT_MAX_WORKERS: usize = 2;

/// Static queue wiring.
pub struct QueueManagerConfig {
    /// This node's identifier.
    pub server_id: Uuid,
    /// Concurrent generator workers; 0 means the default of 2.
    pub max_workers: usize,
    /// Announce URL baked into generated torrents.
    pub announce_url: String,
}

/// Schedules generation work and runs the worker bodies.
pub struct QueueManager {
    config: QueueManagerConfig,
    queue: Arc<dyn QueueStore>,
    torrents: Arc<dyn TorrentStore>,
    generator: Arc<Generator>,
    swarm: Arc<SwarmClient>,
    main_check: Option<Arc<dyn QueueCheckClient>>,
    workers: Mutex<usize>,
}

impl QueueManager {
    /// Assemble the manager.
    #[must_use]
    pub fn new(
        config: QueueManagerConfig,
        queue: Arc<dyn QueueStore>,
        torrents: Arc<dyn TorrentStore>,
        generator: Arc<Generator>,
        swarm: Arc<SwarmClient>,
        main_check: Option<Arc<dyn QueueCheckClient>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue,
            torrents,
            generator,
            swarm,
            main_check,
            workers: Mutex::new(0),
        })
    }

    fn max_workers(&self) -> usize {
        if self.config.max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            self.config.max_workers
        }
    }

    /// Startup recovery: cull transient rows and reclaim orphaned work.
    ///
    /// Idempotent; running it twice on clean rows changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error when any recovery statement fails.
    pub async fn recover(&self) -> Result<()> {
        let culled = self
            .queue
            .delete_completed_rows()
            .await
            .context("failed to cull completed rows")?;
        let reset = self
            .queue
            .reset_own_rows(self.config.server_id)
            .await
            .context("failed to reset own rows")?;
        let reclaimed = self
            .queue
            .reclaim_orphaned_rows(self.config.server_id)
            .await
            .context("failed to reclaim orphaned rows")?;
        info!(culled, reset, reclaimed, "queue recovery finished");
        Ok(())
    }

    /// Add a package to this node's queue.
    ///
    /// Refused when another node is already generating it or when main
    /// reports an existing torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the coordination checks or the insert fail.
    pub async fn add_to_queue(&self, package_id: Uuid) -> Result<bool> {
        if self
            .queue
            .other_node_generating(package_id, self.config.server_id)
            .await?
        {
            debug!(package_id = %package_id, "refusing enqueue, another node is generating");
            return Ok(false);
        }
        if let Some(check) = &self.main_check {
            let verdict = check.check(package_id).await?;
            if verdict.torrent_exists || verdict.already_in_progress {
                debug!(
                    package_id = %package_id,
                    torrent_exists = verdict.torrent_exists,
                    "refusing enqueue per main server"
                );
                return Ok(false);
            }
        }
        self.queue
            .enqueue(package_id, self.config.server_id)
            .await
            .context("failed to enqueue package")
    }

    /// Run the scheduler until `shutdown` flips.
    pub async fn run_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(SCHEDULE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(err) = self.schedule_once().await {
                        warn!(error = %err, "queue scheduling pass failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One scheduling pass; returns the spawned worker when one started.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable.
    pub async fn schedule_once(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>> {
        {
            let workers = self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *workers >= self.max_workers() {
                return Ok(None);
            }
        }
        let Some(item) = self.queue.next_queued(self.config.server_id).await? else {
            return Ok(None);
        };

        // Fleet rule: one generator per package at any instant.
        if self
            .queue
            .other_node_generating(item.package_id, self.config.server_id)
            .await?
        {
            debug!(package_id = %item.package_id, "skipping, another node is generating");
            return Ok(None);
        }
        if let Some(check) = &self.main_check {
            match check.check(item.package_id).await {
                Ok(verdict) if verdict.torrent_exists => {
                    info!(package_id = %item.package_id, "torrent already exists, dropping queue row");
                    self.queue.delete_item(item.id).await?;
                    return Ok(None);
                }
                Ok(verdict) if verdict.already_in_progress => {
                    debug!(package_id = %item.package_id, "main reports generation in progress");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "queue check failed, retrying next tick");
                    return Ok(None);
                }
            }
        }

        self.queue.mark_generating(item.id).await?;
        {
            let mut workers = self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *workers += 1;
        }
        let manager = Arc::clone(self);
        Ok(Some(tokio::spawn(async move {
            manager.run_worker(item).await;
        })))
    }

    async fn run_worker(self: Arc<Self>, item: QueueItem) {
        let outcome = self.generate_and_seed(&item).await;
        match outcome {
            Ok(info_hash) => {
                info!(package_id = %item.package_id, info_hash = %info_hash, "generation worker finished");
                if let Err(err) = self
                    .queue
                    .finish(item.id, QueueStatus::Completed, None)
                    .await
                {
                    warn!(error = %err, "failed to mark queue item completed");
                }
            }
            Err(WorkerError::Cancelled) => {
                info!(package_id = %item.package_id, "generation cancelled");
                if let Err(err) = self
                    .queue
                    .finish(item.id, QueueStatus::Cancelled, Some("cancelled by operator"))
                    .await
                {
                    warn!(error = %err, "failed to mark queue item cancelled");
                }
            }
            Err(WorkerError::Failed(message, err)) => {
                warn!(
                    package_id = %item.package_id,
                    error = %err,
                    "generation worker failed"
                );
                if let Err(err) = self
                    .queue
                    .finish(item.id, QueueStatus::Failed, Some(&message))
                    .await
                {
                    warn!(error = %err, "failed to mark queue item failed");
                }
            }
        }
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *workers = workers.saturating_sub(1);
    }

    async fn generate_and_seed(
        &self,
        item: &QueueItem,
    ) -> Result<reelgrid_torrent_core::InfoHash, WorkerError> {
        let local_path = self
            .torrents
            .inventory_path(item.package_id, self.config.server_id)
            .await
            .map_err(|err| WorkerError::failed("inventory lookup failed", err))?
            .ok_or_else(|| {
                WorkerError::failed(
                    "package has no local inventory",
                    anyhow!("missing inventory row"),
                )
            })?;
        let package_path = PathBuf::from(&local_path);

        let declared_bytes = total_bytes(&package_path)
            .map_err(|err| WorkerError::from_generation("pre-walk failed", err))?;
        debug!(
            package_id = %item.package_id,
            bytes = declared_bytes,
            "starting generation worker"
        );

        let generated = self
            .generator
            .generate(&GenerateRequest {
                package_path: package_path.clone(),
                package_id: item.package_id,
                server_id: self.config.server_id,
                announce_url: self.config.announce_url.clone(),
            })
            .await
            .map_err(|err| match err {
                GenerationError::Cancelled => WorkerError::Cancelled,
                other => WorkerError::from_generation("hashing failed", other),
            })?;

        // A package already covered by a torrent with a different info-hash
        // keeps its original metadata; the first row to land wins.
        match self.torrents.torrent_for_package(item.package_id).await {
            Ok(Some(existing)) if existing.info_hash != generated.info_hash => {
                return Err(WorkerError::failed(
                    "package already has a torrent with a different info-hash",
                    anyhow!(
                        "existing {} vs generated {}",
                        existing.info_hash,
                        generated.info_hash
                    ),
                ));
            }
            Ok(_) => {}
            Err(err) => return Err(WorkerError::failed("torrent lookup failed", err)),
        }

        let record = TorrentRecord {
            id: Uuid::new_v4(),
            package_id: item.package_id,
            info_hash: generated.info_hash,
            piece_size: i64::try_from(generated.piece_length).unwrap_or(i64::MAX),
            total_pieces: i32::try_from(generated.total_pieces).unwrap_or(i32::MAX),
            file_bytes: generated.torrent_bytes.clone(),
            created_by_server: self.config.server_id,
            created_at: Utc::now(),
        };
        let torrent_id = self
            .torrents
            .save_torrent(&record)
            .await
            .map_err(|err| WorkerError::failed("failed to save torrent row", err))?;

        // Seeding starts synchronously so the package serves the fleet the
        // moment its queue row completes.
        self.swarm
            .start_seeding(
                &generated.torrent_bytes,
                &package_path,
                item.package_id,
                torrent_id,
            )
            .await
            .map_err(|err| WorkerError::failed("failed to start seeding", err))?;

        Ok(generated.info_hash)
    }
}

enum WorkerError {
    Cancelled,
    Failed(String, anyhow::Error),
}

impl WorkerError {
    fn failed(message: &str, err: anyhow::Error) -> Self {
        Self::Failed(message.to_string(), err)
    }

    fn from_generation(prefix: &str, err: GenerationError) -> Self {
        match err {
            GenerationError::Cancelled => Self::Cancelled,
            other => Self::Failed(format!("{prefix}: {other}"), anyhow!("{other:?}")),
        }
    }
}
