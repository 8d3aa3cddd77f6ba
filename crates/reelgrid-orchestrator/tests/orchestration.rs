//! Transfer lifecycle, command channel, reporter, and restore flows over the
//! shared in-memory store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use reelgrid_bencode::Metainfo;
use reelgrid_orchestrator::{
    ClientSink, CommandPoller, HttpReportSink, MainApi, MainService, StatusReporter,
    TransferPoller, ensure_seeding_once,
};
use reelgrid_swarm::{
    DiskSession, NullSink, ProgressSink, SwarmClient, SwarmClientConfig, SwarmClientDeps,
    SwarmSession,
};
use reelgrid_test_support::MemStore;
use reelgrid_test_support::fixtures::{build_torrent, package_dir};
use reelgrid_torrent_core::store::{ServerStore, TorrentStore, TransferStore};
use reelgrid_torrent_core::{
    CommandAck, ContentCommand, InfoHash, PendingTransfer, SeederRegistration,
    TorrentStatusReport, TorrentRecord, TransferCommand, TransferCommandAction,
    TransferProgressUpdate, TransferStatus,
};
use reelgrid_tracker::Tracker;

const PIECE_LENGTH: u64 = 4096;
const ANNOUNCE: &str = "http://tracker.local/announce";

/// In-process control plane: the client pollers exercise the same service
/// the HTTP routes delegate to.
struct LocalApi {
    service: MainService,
}

#[async_trait]
impl MainApi for LocalApi {
    async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>> {
        self.service.pending_transfers(server_id).await
    }

    async fn torrent_file(&self, info_hash: &InfoHash) -> Result<Vec<u8>> {
        self.service.torrent_file(info_hash).await
    }

    async fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()> {
        self.service.update_transfer(transfer_id, update).await
    }

    async fn register_seeder(
        &self,
        info_hash: &InfoHash,
        registration: &SeederRegistration,
    ) -> Result<()> {
        self.service.register_seeder(info_hash, registration).await
    }

    async fn post_status_report(
        &self,
        _server_id: Uuid,
        report: &TorrentStatusReport,
    ) -> Result<()> {
        self.service.ingest_status_report(report).await
    }

    async fn transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>> {
        self.service.transfer_commands(server_id).await
    }

    async fn content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>> {
        self.service.content_commands(server_id).await
    }

    async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        self.service.ack_transfer_command(server_id, ack).await
    }

    async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        self.service.ack_content_command(server_id, ack).await
    }
}

struct Fleet {
    store: Arc<MemStore>,
    service: MainService,
    api: Arc<dyn MainApi>,
    main_swarm: Arc<SwarmClient>,
    client_swarm: Arc<SwarmClient>,
    client_session: Arc<DiskSession>,
    main_id: Uuid,
    client_id: Uuid,
    client_download_dir: PathBuf,
}

fn fleet(root: &std::path::Path) -> Fleet {
    let store = Arc::new(MemStore::new());
    let tracker = Arc::new(Tracker::new(None));
    let main_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();
    let client_download_dir = root.join("client/incoming");
    fs::create_dir_all(&client_download_dir).expect("client download dir");

    let service = MainService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    let api: Arc<dyn MainApi> = Arc::new(LocalApi {
        service: service.clone(),
    });

    let main_session = Arc::new(DiskSession::new(store.clone()));
    let main_swarm = SwarmClient::new(
        SwarmClientConfig {
            server_id: main_id,
            data_port: 42069,
            download_dir: root.join("main/incoming"),
            max_seeds: 64,
            max_downloads: 4,
        },
        SwarmClientDeps {
            session: main_session,
            completion: store.clone(),
            seeders: store.clone(),
            servers: store.clone(),
            torrent_store: store.clone(),
            transfer_store: store.clone(),
            tracker: Some(tracker.clone()),
            progress_sink: Arc::new(NullSink),
            error_reporter: Arc::new(NullSink),
        },
    );

    let client_session = Arc::new(DiskSession::new(store.clone()));
    let client_sink = Arc::new(ClientSink::new(api.clone(), client_id));
    let client_swarm = SwarmClient::new(
        SwarmClientConfig {
            server_id: client_id,
            data_port: 42070,
            download_dir: client_download_dir.clone(),
            max_seeds: 64,
            max_downloads: 4,
        },
        SwarmClientDeps {
            session: client_session.clone(),
            completion: store.clone(),
            seeders: store.clone(),
            servers: store.clone(),
            torrent_store: store.clone(),
            transfer_store: store.clone(),
            tracker: Some(tracker),
            progress_sink: client_sink.clone(),
            error_reporter: client_sink,
        },
    );

    Fleet {
        store,
        service,
        api,
        main_swarm,
        client_swarm,
        client_session,
        main_id,
        client_id,
        client_download_dir,
    }
}

/// Seed a package on main and return its torrent row.
async fn seed_on_main(fleet: &Fleet, root: &std::path::Path, name: &str) -> TorrentRecord {
    let package = package_dir(
        root.join("main/library").as_path(),
        name,
        &[("reel_01.mxf", 12_000), ("ASSETMAP.xml", 700)],
    );
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let meta = Metainfo::parse(&payload).expect("parse");
    let info = meta.info().expect("info");
    let package_row = reelgrid_torrent_core::Package {
        id: Uuid::new_v4(),
        asset_map_uuid: Uuid::new_v4(),
        name: name.to_string(),
        title: None,
        total_size_bytes: i64::try_from(info.total_bytes()).expect("total"),
        file_count: i32::try_from(info.files.len()).expect("count"),
    };
    fleet.store.upsert_package(&package_row).await.expect("package");
    let record = TorrentRecord {
        id: Uuid::new_v4(),
        package_id: package_row.id,
        info_hash: InfoHash::of_info_bytes(&meta.info_bytes),
        piece_size: i64::try_from(PIECE_LENGTH).expect("piece size"),
        total_pieces: i32::try_from(info.piece_count()).expect("pieces"),
        file_bytes: payload,
        created_by_server: fleet.main_id,
        created_at: chrono::Utc::now(),
    };
    fleet.store.save_torrent(&record).await.expect("torrent row");
    fleet
        .store
        .upsert_inventory(package_row.id, fleet.main_id, package.to_str().expect("utf8"))
        .await
        .expect("inventory");
    fleet
        .main_swarm
        .start_seeding(&record.file_bytes, &package, package_row.id, record.id)
        .await
        .expect("seed on main");
    record
}

/// Copy the main copy of a package into the client's download tree,
/// standing in for the wire transfer.
fn deliver_payload(root: &std::path::Path, fleet: &Fleet, name: &str) {
    let src = root.join("main/library").join(name);
    let dst = fleet.client_download_dir.join(name);
    copy_tree(&src, &dst);
}

fn copy_tree(src: &std::path::Path, dst: &std::path::Path) {
    fs::create_dir_all(dst).expect("copy root");
    for entry in fs::read_dir(src).expect("read src").flatten() {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to);
        } else {
            fs::copy(&from, &to).expect("copy file");
        }
    }
}

#[tokio::test]
async fn transfer_lifecycle_completes_and_registers_second_seeder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fleet = fleet(dir.path());
    let record = seed_on_main(&fleet, dir.path(), "PKG_B").await;

    // UI creates the replication intent; the client claims it on its poll.
    let transfer_id = fleet
        .service
        .create_transfer(record.id, fleet.client_id, Some("operator"))
        .await
        .expect("create transfer");

    let poller = TransferPoller::new(
        fleet.api.clone(),
        fleet.client_swarm.clone(),
        fleet.client_id,
        fleet.client_download_dir.clone(),
    );
    assert_eq!(poller.poll_once().await.expect("poll"), 1);

    let row = fleet.store.transfer_row(transfer_id).expect("row");
    assert_eq!(row.status, TransferStatus::Downloading);

    // Data lands (the engine's wire transfer), the client verifies it, and
    // the monitor path completes the transfer.
    deliver_payload(dir.path(), &fleet, "PKG_B");
    fleet
        .client_session
        .verify_all(&record.info_hash)
        .await
        .expect("verify");
    let stats = fleet
        .client_swarm
        .get_stats(record.info_hash)
        .await
        .expect("stats");
    assert!((stats.progress_percent - 100.0).abs() < f64::EPSILON);

    fleet
        .client_swarm
        .complete_download(record.info_hash)
        .await
        .expect("complete");
    let sink = ClientSink::new(fleet.api.clone(), fleet.client_id);
    sink.transfer_completed(transfer_id, &stats)
        .await
        .expect("report completion");

    let row = fleet.store.transfer_row(transfer_id).expect("row");
    assert_eq!(row.status, TransferStatus::Completed);
    assert!((row.progress_percent - 100.0).abs() < f64::EPSILON);

    // Main plus the freshly completed client.
    let seeders = fleet
        .service
        .seeder_count(record.id)
        .await
        .expect("seeder count");
    assert!(seeders >= 2, "expected both nodes as seeders, got {seeders}");

    // The mirror rows make restart-time restoration possible.
    let inventory = fleet
        .store
        .inventory_path(record.package_id, fleet.client_id)
        .await
        .expect("query");
    assert!(inventory.is_some());
    assert_eq!(fleet.store.ingestion_rows().len(), 1);
}

#[tokio::test]
async fn pause_resume_cancel_flow_acks_every_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fleet = fleet(dir.path());
    let record = seed_on_main(&fleet, dir.path(), "PKG_C").await;
    let transfer_id = fleet
        .service
        .create_transfer(record.id, fleet.client_id, None)
        .await
        .expect("create transfer");

    let poller = TransferPoller::new(
        fleet.api.clone(),
        fleet.client_swarm.clone(),
        fleet.client_id,
        fleet.client_download_dir.clone(),
    );
    poller.poll_once().await.expect("claim");

    let commands = CommandPoller::new(
        fleet.api.clone(),
        fleet.client_swarm.clone(),
        fleet.store.clone(),
        fleet.store.clone(),
        fleet.client_id,
        fleet.client_download_dir.clone(),
    );

    // Pause.
    fleet
        .service
        .queue_transfer_command(transfer_id, TransferCommandAction::Pause)
        .await
        .expect("queue pause");
    assert_eq!(commands.poll_once().await.expect("poll"), 1);
    let views = fleet.client_swarm.active_views().await;
    assert!(!views[0].is_downloading);

    // Resume.
    fleet
        .service
        .queue_transfer_command(transfer_id, TransferCommandAction::Resume)
        .await
        .expect("queue resume");
    assert_eq!(commands.poll_once().await.expect("poll"), 1);
    let views = fleet.client_swarm.active_views().await;
    assert!(views[0].is_downloading);

    // Cancel with data deletion.
    let local_path = views[0].local_path.clone();
    fleet
        .service
        .queue_transfer_command(
            transfer_id,
            TransferCommandAction::Cancel { delete_data: true },
        )
        .await
        .expect("queue cancel");
    assert_eq!(commands.poll_once().await.expect("poll"), 1);

    assert!(fleet.client_swarm.active_views().await.is_empty());
    assert!(!local_path.exists(), "cancelled data must be removed");
    assert!(fleet.store.completion_rows(&record.info_hash).is_empty());

    let acks = fleet.store.transfer_command_acks();
    assert_eq!(acks.len(), 3);
    assert!(acks.iter().any(|(_, result)| result == "deleted"));
}

#[tokio::test]
async fn content_delete_respects_containment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fleet = fleet(dir.path());
    let record = seed_on_main(&fleet, dir.path(), "PKG_D").await;

    // The main node's library copy lives outside the client download dir;
    // a content delete against the main-seeded path must keep the data.
    let commands = CommandPoller::new(
        fleet.api.clone(),
        fleet.main_swarm.clone(),
        fleet.store.clone(),
        fleet.store.clone(),
        fleet.main_id,
        dir.path().join("main/incoming"),
    );
    fleet
        .service
        .queue_content_command(fleet.main_id, record.id, None)
        .await
        .expect("queue delete");
    commands.poll_once().await.expect("poll");

    let library_copy = dir.path().join("main/library/PKG_D");
    assert!(library_copy.exists(), "out-of-root data must be kept");
}

#[tokio::test]
async fn reporter_ships_full_sync_first_and_skips_idle_ticks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fleet = fleet(dir.path());
    let record = seed_on_main(&fleet, dir.path(), "PKG_E").await;
    let transfer_id = fleet
        .service
        .create_transfer(record.id, fleet.client_id, None)
        .await
        .expect("create transfer");
    let poller = TransferPoller::new(
        fleet.api.clone(),
        fleet.client_swarm.clone(),
        fleet.client_id,
        fleet.client_download_dir.clone(),
    );
    poller.poll_once().await.expect("claim");
    let _ = transfer_id;

    let reporter = StatusReporter::new(
        fleet.client_swarm.clone(),
        fleet.store.clone(),
        Arc::new(HttpReportSink::new(fleet.api.clone())),
        fleet.client_id,
    );

    assert!(reporter.tick_once().await.expect("tick"), "active download reports");
    assert!(reporter.tick_once().await.expect("tick"));

    let reports = fleet.store.reports();
    assert!(reports.len() >= 2);
    assert!(reports[0].is_full_sync);
    assert!(!reports[1].is_full_sync);
    assert_eq!(reports[0].server_id, fleet.client_id);
    assert_eq!(reports[0].torrents.len(), 1);

    // Idle node: stop the download; five of six ticks are skipped.
    fleet
        .client_swarm
        .stop_torrent(record.info_hash)
        .await
        .expect("stop");
    let mut shipped = 0;
    for _ in 0..6 {
        if reporter.tick_once().await.expect("tick") {
            shipped += 1;
        }
    }
    assert_eq!(shipped, 1, "idle reporter ships once per six ticks");
}

#[tokio::test]
async fn ensure_seeding_restores_only_missing_torrents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fleet = fleet(dir.path());
    let record = seed_on_main(&fleet, dir.path(), "PKG_F").await;

    // The main swarm already seeds PKG_F; a restore pass on main is a no-op.
    let torrents: Arc<dyn TorrentStore> = fleet.store.clone();
    let servers: Arc<dyn ServerStore> = fleet.store.clone();
    let restored = ensure_seeding_once(&fleet.main_swarm, &torrents, &servers)
        .await
        .expect("restore");
    assert_eq!(restored, 0);

    // After the process forgets the torrent, restore brings it back.
    fleet
        .main_swarm
        .stop_torrent(record.info_hash)
        .await
        .expect("stop");
    let restored = ensure_seeding_once(&fleet.main_swarm, &torrents, &servers)
        .await
        .expect("restore");
    assert_eq!(restored, 1);
    assert_eq!(fleet.main_swarm.active_views().await.len(), 1);
}

#[tokio::test]
async fn resume_downloads_picks_up_interrupted_transfers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fleet = fleet(dir.path());
    let record = seed_on_main(&fleet, dir.path(), "PKG_G").await;
    let transfer_id = fleet
        .service
        .create_transfer(record.id, fleet.client_id, None)
        .await
        .expect("create transfer");
    fleet
        .store
        .apply_transfer_update(
            transfer_id,
            &TransferProgressUpdate {
                status: Some(TransferStatus::Downloading.as_str().to_string()),
                ..TransferProgressUpdate::default()
            },
        )
        .await
        .expect("mark downloading");

    // Fresh process: nothing active, but the transfer row says downloading.
    let resumed = fleet.client_swarm.resume_downloads().await.expect("resume");
    assert_eq!(resumed, 1);
    let views = fleet.client_swarm.active_views().await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].transfer_id, Some(transfer_id));
}
