//! Boot sequence for a Reelgrid node.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use reelgrid_config::Settings;
use reelgrid_data::MetaStore;
use reelgrid_generator::Generator;
use reelgrid_orchestrator::{
    ClientSink, CommandPoller, HttpMainApi, HttpReportSink, MainApi, MainService, MainSink,
    StatusReporter, TransferPoller, control_router, spawn_ensure_seeding, spawn_seeder_sync,
};
use reelgrid_queue::{HttpQueueCheck, QueueCheckClient, QueueManager, QueueManagerConfig};
use reelgrid_swarm::{
    DiskSession, ProgressSink, SwarmClient, SwarmClientConfig, SwarmClientDeps,
    TransferErrorReporter, spawn_integrity_watcher, spawn_seeder_maintenance,
};
use reelgrid_torrent_core::store::{AnnounceLog, ServerStore};
use reelgrid_torrent_core::{ServerMode, ServerRow};
use reelgrid_tracker::{Tracker, TrackerServer};

use crate::error::AppError;

/// Load settings, connect the store, and run the node until interrupted.
///
/// # Errors
///
/// Returns [`AppError`] on fatal configuration, store, or startup failures.
pub async fn run() -> Result<(), AppError> {
    let settings = reelgrid_config::load()?;
    init_logging();
    let store = MetaStore::connect(&settings.database.url())
        .await
        .map_err(|err| AppError::store("connect", err))?;
    run_with(settings, store).await
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Stable node identity derived from the configured (or host) name.
fn node_identity(settings: &Settings) -> (Uuid, String) {
    let name = settings.node.name.clone().unwrap_or_else(|| {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "reelgrid-node".to_string())
    });
    let id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes());
    (id, name)
}

fn announce_url(settings: &Settings) -> String {
    settings
        .torrent
        .public_tracker_url
        .clone()
        .unwrap_or_else(|| {
            let host = settings
                .torrent
                .public_ip
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string());
            format!("http://{host}:{}/announce", settings.torrent.tracker_port)
        })
}

/// Boot with injected settings and store; used by tests and the binary.
///
/// # Errors
///
/// Returns [`AppError`] on fatal startup failures.
#[allow(clippy::too_many_lines)]
pub(crate) async fn run_with(settings: Settings, store: MetaStore) -> Result<(), AppError> {
    let (server_id, server_name) = node_identity(&settings);
    let mode = settings.node.server_mode;
    info!(
        server_id = %server_id,
        name = %server_name,
        mode = mode.as_str(),
        "reelgrid node starting"
    );

    let store = Arc::new(store);
    store
        .upsert_server(&ServerRow {
            id: server_id,
            name: server_name,
            mode,
            base_url: settings.node.main_server_url.clone(),
            last_seen: Utc::now(),
        })
        .await
        .map_err(|err| AppError::store("server registration", err))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Tracker first; everything downstream may register against it.
    let tracker = if mode == ServerMode::Main && settings.torrent.tracker_port != 0 {
        let announce_ip = settings
            .torrent
            .public_ip
            .as_deref()
            .and_then(|ip| ip.parse::<IpAddr>().ok());
        if settings.torrent.public_ip.is_some() && announce_ip.is_none() {
            warn!("public_ip did not parse as an address, loopback rewriting disabled");
        }
        let tracker = Arc::new(Tracker::new(announce_ip));
        let announce_log: Arc<dyn AnnounceLog> = store.clone();
        let server = TrackerServer::new(Arc::clone(&tracker), Some(announce_log));
        let port = settings.torrent.tracker_port;
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = server.serve(port, rx).await {
                warn!(error = %err, "tracker server exited with error");
            }
        }));
        Some(tracker)
    } else {
        None
    };

    // Swarm client over the disk session.
    let session = Arc::new(DiskSession::new(store.clone()));
    let main_api: Option<Arc<dyn MainApi>> = match (mode, &settings.node.main_server_url) {
        (ServerMode::Client, Some(url)) => Some(Arc::new(
            HttpMainApi::new(url.clone())
                .map_err(|err| AppError::subsystem("main api client", err))?,
        )),
        _ => None,
    };
    let (progress_sink, error_reporter): (Arc<dyn ProgressSink>, Arc<dyn TransferErrorReporter>) =
        match &main_api {
            Some(api) => {
                let sink = Arc::new(ClientSink::new(Arc::clone(api), server_id));
                (sink.clone(), sink)
            }
            None => {
                let sink = Arc::new(MainSink::new(store.clone()));
                (sink.clone(), sink)
            }
        };
    let swarm = SwarmClient::new(
        SwarmClientConfig {
            server_id,
            data_port: settings.torrent.torrent_data_port,
            download_dir: PathBuf::from(&settings.torrent.torrent_data_dir),
            max_seeds: settings.torrent.max_concurrent_seeds,
            max_downloads: settings.torrent.max_concurrent_downloads,
        },
        SwarmClientDeps {
            session,
            completion: store.clone(),
            seeders: store.clone(),
            servers: store.clone(),
            torrent_store: store.clone(),
            transfer_store: store.clone(),
            tracker: tracker.clone(),
            progress_sink,
            error_reporter,
        },
    );

    // Startup restoration before any scheduling begins.
    if let Err(err) = swarm.repair_piece_completion().await {
        warn!(error = %err, "piece completion repair failed");
    }
    if let Err(err) = swarm.seed_existing().await {
        warn!(error = %err, "seed restore failed");
    }
    if let Err(err) = swarm.resume_downloads().await {
        warn!(error = %err, "download resume failed");
    }
    tasks.push(spawn_integrity_watcher(
        Arc::clone(&swarm),
        shutdown_rx.clone(),
    ));
    if tracker.is_some() {
        tasks.push(spawn_seeder_maintenance(
            Arc::clone(&swarm),
            shutdown_rx.clone(),
        ));
    }

    // Generator and queue.
    let generator = Arc::new(Generator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        settings.torrent.piece_hash_workers,
    ));
    let queue_check: Option<Arc<dyn QueueCheckClient>> =
        match (mode, &settings.node.main_server_url) {
            (ServerMode::Client, Some(url)) => Some(Arc::new(
                HttpQueueCheck::new(url.clone())
                    .map_err(|err| AppError::subsystem("queue check client", err))?,
            )),
            _ => None,
        };
    let queue = QueueManager::new(
        QueueManagerConfig {
            server_id,
            max_workers: 0,
            announce_url: announce_url(&settings),
        },
        store.clone(),
        store.clone(),
        generator,
        Arc::clone(&swarm),
        queue_check,
    );
    queue
        .recover()
        .await
        .map_err(|err| AppError::store("queue recovery", err))?;
    tasks.push(tokio::spawn(
        Arc::clone(&queue).run_scheduler(shutdown_rx.clone()),
    ));

    // Orchestration per role.
    let service = MainService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    match mode {
        ServerMode::Main => {
            let app = control_router(service);
            let addr = SocketAddr::from(([0, 0, 0, 0], settings.node.control_port));
            let mut rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let listener = match tokio::net::TcpListener::bind(addr).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        warn!(error = %err, addr = %addr, "control api failed to bind");
                        return;
                    }
                };
                info!(addr = %addr, "control api listening");
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                });
                if let Err(err) = serve.await {
                    warn!(error = %err, "control api exited with error");
                }
            }));
        }
        ServerMode::Client => {
            let api = main_api
                .clone()
                .ok_or_else(|| AppError::subsystem("client role", anyhow!("missing main api")))?;
            let transfer_poller = Arc::new(TransferPoller::new(
                Arc::clone(&api),
                Arc::clone(&swarm),
                server_id,
                PathBuf::from(&settings.torrent.torrent_data_dir),
            ));
            tasks.push(tokio::spawn(transfer_poller.run(shutdown_rx.clone())));

            let command_poller = Arc::new(CommandPoller::new(
                Arc::clone(&api),
                Arc::clone(&swarm),
                store.clone(),
                store.clone(),
                server_id,
                PathBuf::from(&settings.torrent.torrent_data_dir),
            ));
            tasks.push(tokio::spawn(command_poller.run(shutdown_rx.clone())));

            let reporter = StatusReporter::new(
                Arc::clone(&swarm),
                store.clone(),
                Arc::new(HttpReportSink::new(api)),
                server_id,
            );
            tasks.push(tokio::spawn(reporter.run(shutdown_rx.clone())));
        }
    }

    // Both roles restore seeding and refresh seeder rows.
    tasks.push(spawn_ensure_seeding(
        Arc::clone(&swarm),
        store.clone(),
        store.clone(),
        shutdown_rx.clone(),
    ));
    tasks.push(spawn_seeder_sync(Arc::clone(&swarm), shutdown_rx.clone()));

    info!("reelgrid node running, waiting for interrupt");
    tokio::signal::ctrl_c().await.map_err(AppError::Signal)?;
    info!("interrupt received, shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(err) = task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "background task join failed");
            }
        }
    }
    info!("shutdown complete");
    Ok(())
}
