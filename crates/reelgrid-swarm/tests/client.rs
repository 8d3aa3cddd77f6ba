//! End-to-end swarm client behaviour against the disk session and the
//! in-memory store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use reelgrid_bencode::Metainfo;
use reelgrid_swarm::{
    DiskSession, NullSink, SwarmClient, SwarmClientConfig, SwarmClientDeps, SwarmSession,
    TorrentStats, TransferErrorReporter,
};
use reelgrid_test_support::MemStore;
use reelgrid_test_support::fixtures::{build_torrent, package_dir};
use reelgrid_torrent_core::store::{CompletionStore, TorrentStore};
use reelgrid_torrent_core::{InfoHash, TorrentRecord};
use reelgrid_tracker::Tracker;

const PIECE_LENGTH: u64 = 4096;
const ANNOUNCE: &str = "http://tracker.local/announce";

#[derive(Default)]
struct RecordingReporter {
    errors: Mutex<Vec<(Uuid, String, String)>>,
}

#[async_trait]
impl TransferErrorReporter for RecordingReporter {
    async fn report_error(&self, transfer_id: Uuid, status: &str, message: &str) -> Result<()> {
        self.errors
            .lock()
            .expect("reporter lock")
            .push((transfer_id, status.to_string(), message.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<MemStore>,
    client: Arc<SwarmClient>,
    session: Arc<DiskSession>,
    tracker: Arc<Tracker>,
    reporter: Arc<RecordingReporter>,
    server_id: Uuid,
}

fn harness(download_dir: PathBuf) -> Harness {
    let store = Arc::new(MemStore::new());
    let session = Arc::new(DiskSession::new(store.clone()));
    let tracker = Arc::new(Tracker::new(None));
    let reporter = Arc::new(RecordingReporter::default());
    let server_id = Uuid::new_v4();
    let client = SwarmClient::new(
        SwarmClientConfig {
            server_id,
            data_port: 42069,
            download_dir,
            max_seeds: 64,
            max_downloads: 4,
        },
        SwarmClientDeps {
            session: session.clone(),
            completion: store.clone(),
            seeders: store.clone(),
            servers: store.clone(),
            torrent_store: store.clone(),
            transfer_store: store.clone(),
            tracker: Some(tracker.clone()),
            progress_sink: Arc::new(NullSink),
            error_reporter: reporter.clone(),
        },
    );
    Harness {
        store,
        client,
        session,
        tracker,
        reporter,
        server_id,
    }
}

fn torrent_record(payload: &[u8], package_id: Uuid) -> (TorrentRecord, InfoHash) {
    let meta = Metainfo::parse(payload).expect("parse torrent");
    let info = meta.info().expect("info dict");
    let info_hash = InfoHash::of_info_bytes(&meta.info_bytes);
    let record = TorrentRecord {
        id: Uuid::new_v4(),
        package_id,
        info_hash,
        piece_size: i64::try_from(info.piece_length).expect("piece size"),
        total_pieces: i32::try_from(info.piece_count()).expect("piece count"),
        file_bytes: payload.to_vec(),
        created_by_server: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
    };
    (record, info_hash)
}

async fn stats_for(harness: &Harness, info_hash: InfoHash) -> TorrentStats {
    harness
        .client
        .get_stats(info_hash)
        .await
        .expect("stats available")
}

#[tokio::test]
async fn seeding_verifies_data_and_registers_everywhere() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(
        dir.path(),
        "PKG_A",
        &[("video_01.mxf", 9000), ("meta/ASSETMAP.xml", 500)],
    );
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));
    let package_id = Uuid::new_v4();
    let torrent_id = Uuid::new_v4();

    let info_hash = harness
        .client
        .start_seeding(&payload, &package, package_id, torrent_id)
        .await
        .expect("seed");

    let stats = stats_for(&harness, info_hash).await;
    assert!(stats.is_seeding);
    assert!((stats.progress_percent - 100.0).abs() < f64::EPSILON);
    assert_eq!(stats.downloaded_bytes, 9500);

    // Direct registration inserts the public peer and its loopback twin.
    assert_eq!(harness.tracker.swarm_size(info_hash).await, 2);
    assert_eq!(harness.store.seeder_rows(), vec![(torrent_id, harness.server_id)]);

    // Every piece verified lands in the shared completion cache.
    let rows = harness.store.completion_rows(&info_hash);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(_, completed)| *completed));
}

#[tokio::test]
async fn second_seeding_start_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path(), "PKG_B", &[("payload.mxf", 2000)]);
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));

    let first = harness
        .client
        .start_seeding(&payload, &package, Uuid::new_v4(), Uuid::new_v4())
        .await
        .expect("seed");
    let second = harness
        .client
        .start_seeding(&payload, &package, Uuid::new_v4(), Uuid::new_v4())
        .await
        .expect("seed again");
    assert_eq!(first, second);
    assert_eq!(harness.client.active_views().await.len(), 1);
}

#[tokio::test]
async fn split_storage_seeds_from_two_roots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let staged = package_dir(
        dir.path().join("staging").as_path(),
        "PKG_S",
        &[("reel_01.mxf", 6000), ("ASSETMAP.xml", 300), ("CPL.xml", 200)],
    );
    let payload = build_torrent(&staged, PIECE_LENGTH, ANNOUNCE);

    // Scatter the payload: media under /media, metadata under /shadow.
    let media_pkg = dir.path().join("media/PKG_S");
    let shadow_pkg = dir.path().join("shadow/PKG_S");
    fs::create_dir_all(&media_pkg).expect("media dir");
    fs::create_dir_all(&shadow_pkg).expect("shadow dir");
    fs::rename(staged.join("reel_01.mxf"), media_pkg.join("reel_01.mxf")).expect("move mxf");
    fs::rename(staged.join("ASSETMAP.xml"), shadow_pkg.join("ASSETMAP.xml")).expect("move xml");
    fs::rename(staged.join("CPL.xml"), shadow_pkg.join("CPL.xml")).expect("move xml");

    let harness = harness(dir.path().join("incoming"));
    let info_hash = harness
        .client
        .start_seeding_split(&payload, &media_pkg, &shadow_pkg, Uuid::new_v4(), Uuid::new_v4())
        .await
        .expect("split seed");

    let stats = stats_for(&harness, info_hash).await;
    assert!((stats.progress_percent - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn download_starts_empty_and_completes_after_data_lands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = package_dir(dir.path().join("lib").as_path(), "PKG_D", &[("a.mxf", 8192)]);
    let payload = build_torrent(&source, PIECE_LENGTH, ANNOUNCE);
    let download_root = dir.path().join("incoming");
    let harness = harness(download_root.clone());
    let package_id = Uuid::new_v4();
    let torrent_id = Uuid::new_v4();
    let transfer_id = Uuid::new_v4();

    let dest = download_root.join("PKG_D");
    let info_hash = harness
        .client
        .start_download(&payload, &dest, package_id, torrent_id, transfer_id)
        .await
        .expect("download");

    let stats = stats_for(&harness, info_hash).await;
    assert!(stats.is_downloading);
    assert!(stats.progress_percent.abs() < f64::EPSILON);
    assert!(dest.exists(), "destination directories are pre-created");

    // Simulate arriving blocks through the engine write path, then verify.
    let data = fs::read(source.join("a.mxf")).expect("source bytes");
    harness
        .session
        .write_block(&info_hash, 0, &data)
        .await
        .expect("write");
    harness.session.verify_all(&info_hash).await.expect("verify");

    let stats = stats_for(&harness, info_hash).await;
    assert!((stats.progress_percent - 100.0).abs() < f64::EPSILON);

    harness
        .client
        .complete_download(info_hash)
        .await
        .expect("complete");
    let views = harness.client.active_views().await;
    assert!(views[0].is_seeding && !views[0].is_downloading);
    assert_eq!(harness.store.ingestion_rows().len(), 1);
    assert_eq!(harness.tracker.swarm_size(info_hash).await, 2);
}

#[tokio::test]
async fn pause_and_resume_flip_roles_and_caps() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = package_dir(dir.path().join("lib").as_path(), "PKG_P", &[("a.mxf", 4096)]);
    let payload = build_torrent(&source, PIECE_LENGTH, ANNOUNCE);
    let download_root = dir.path().join("incoming");
    let harness = harness(download_root.clone());

    let info_hash = harness
        .client
        .start_download(
            &payload,
            &download_root.join("PKG_P"),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .await
        .expect("download");

    harness.client.pause_torrent(info_hash).await.expect("pause");
    let stats = stats_for(&harness, info_hash).await;
    assert!(!stats.is_downloading);

    harness.client.resume_torrent(info_hash).await.expect("resume");
    let stats = stats_for(&harness, info_hash).await;
    assert!(stats.is_downloading);
}

#[tokio::test]
async fn stop_torrent_forgets_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path(), "PKG_X", &[("a.mxf", 1000)]);
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));

    let info_hash = harness
        .client
        .start_seeding(&payload, &package, Uuid::new_v4(), Uuid::new_v4())
        .await
        .expect("seed");
    harness.client.stop_torrent(info_hash).await.expect("stop");
    assert!(harness.client.active_views().await.is_empty());
    assert!(harness.client.get_stats(info_hash).await.is_none());
    assert!(harness.store.seeder_rows().is_empty());
}

#[tokio::test]
async fn fatal_disk_error_marks_transfer_and_stops_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = package_dir(dir.path().join("lib").as_path(), "PKG_E", &[("a.mxf", 4096)]);
    let payload = build_torrent(&source, PIECE_LENGTH, ANNOUNCE);
    let download_root = dir.path().join("incoming");
    let harness = harness(download_root.clone());
    let transfer_id = Uuid::new_v4();

    let info_hash = harness
        .client
        .start_download(
            &payload,
            &download_root.join("PKG_E"),
            Uuid::new_v4(),
            Uuid::new_v4(),
            transfer_id,
        )
        .await
        .expect("download");

    harness
        .client
        .handle_write_error(info_hash, "write /incoming/PKG_E/a.mxf: read-only file system")
        .await;

    let stats = stats_for(&harness, info_hash).await;
    assert!(stats.is_errored);
    assert!(!stats.is_downloading);
    assert_eq!(
        stats.error_message.as_deref(),
        Some("Disk is read-only — cannot write downloaded data")
    );
    let errors = harness.reporter.errors.lock().expect("errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, transfer_id);
    assert_eq!(errors[0].1, "error");
}

#[tokio::test]
async fn integrity_watcher_flags_deleted_seed_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path(), "PKG_I", &[("a.mxf", 2048)]);
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));

    let info_hash = harness
        .client
        .start_seeding(&payload, &package, Uuid::new_v4(), Uuid::new_v4())
        .await
        .expect("seed");

    fs::remove_dir_all(&package).expect("delete data");
    harness.client.integrity_check().await;

    let stats = stats_for(&harness, info_hash).await;
    assert!(stats.is_errored);
    assert_eq!(
        stats.error_message.as_deref(),
        Some("Data files deleted from disk")
    );
}

#[tokio::test]
async fn startup_restoration_seeds_inventory_and_repairs_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path(), "PKG_R", &[("a.mxf", 3000)]);
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));
    let package_id = Uuid::new_v4();

    let (record, info_hash) = torrent_record(&payload, package_id);
    harness.store.save_torrent(&record).await.expect("save torrent");
    harness
        .store
        .upsert_inventory(package_id, harness.server_id, package.to_str().expect("utf8"))
        .await
        .expect("inventory");

    // A dead process left a false completion row behind.
    harness
        .store
        .set_piece_complete(&info_hash, 0, false)
        .await
        .expect("seed stale row");
    let purged = harness
        .client
        .repair_piece_completion()
        .await
        .expect("repair");
    assert_eq!(purged, 1);

    let started = harness.client.seed_existing().await.expect("restore");
    assert_eq!(started, 1);
    let stats = stats_for(&harness, info_hash).await;
    assert!(stats.is_seeding);
    assert!((stats.progress_percent - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn reporter_sampler_is_independent_from_monitor_sampler() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path(), "PKG_M", &[("a.mxf", 4096)]);
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));

    let info_hash = harness
        .client
        .start_seeding(&payload, &package, Uuid::new_v4(), Uuid::new_v4())
        .await
        .expect("seed");

    // Both samplers observe the same counters without disturbing each other.
    let monitor_first = stats_for(&harness, info_hash).await;
    let reporter_stats = harness.client.get_all_stats_for_reporter().await;
    let monitor_second = stats_for(&harness, info_hash).await;
    assert_eq!(reporter_stats.len(), 1);
    assert_eq!(monitor_first.downloaded_bytes, monitor_second.downloaded_bytes);
    assert!(!harness.client.has_active_downloads().await);
}

#[tokio::test]
async fn switch_seeding_path_survives_move() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path().join("old").as_path(), "PKG_W", &[("a.mxf", 2048)]);
    let payload = build_torrent(&package, PIECE_LENGTH, ANNOUNCE);
    let harness = harness(dir.path().join("incoming"));
    let torrent_id = Uuid::new_v4();

    let info_hash = harness
        .client
        .start_seeding(&payload, &package, Uuid::new_v4(), torrent_id)
        .await
        .expect("seed");

    // Relocate the package, then re-bind storage at the new path.
    let new_root = dir.path().join("new");
    fs::create_dir_all(&new_root).expect("new root");
    let new_path = new_root.join("PKG_W");
    fs::rename(&package, &new_path).expect("move package");

    harness
        .client
        .switch_seeding_path(info_hash, Path::new(&new_path), torrent_id)
        .await
        .expect("switch");
    let stats = stats_for(&harness, info_hash).await;
    assert!((stats.progress_percent - 100.0).abs() < f64::EPSILON);
}
