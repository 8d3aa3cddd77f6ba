//! Queue manager behaviour: the hash-and-seed flow, fleet coordination, and
//! startup recovery.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use reelgrid_bencode::Metainfo;
use reelgrid_generator::Generator;
use reelgrid_queue::{QueueCheckClient, QueueManager, QueueManagerConfig};
use reelgrid_swarm::{DiskSession, NullSink, SwarmClient, SwarmClientConfig, SwarmClientDeps};
use reelgrid_test_support::MemStore;
use reelgrid_test_support::fixtures::package_dir;
use reelgrid_torrent_core::store::{QueueStore, TorrentStore};
use reelgrid_torrent_core::{InfoHash, QueueCheck, QueueStatus};
use reelgrid_tracker::Tracker;

const ANNOUNCE: &str = "http://tracker.local/announce";

struct Fixture {
    store: Arc<MemStore>,
    manager: Arc<QueueManager>,
    tracker: Arc<Tracker>,
    server_id: Uuid,
}

fn fixture(
    download_dir: std::path::PathBuf,
    check: Option<Arc<dyn QueueCheckClient>>,
) -> Fixture {
    let store = Arc::new(MemStore::new());
    let server_id = Uuid::new_v4();
    let tracker = Arc::new(Tracker::new(None));
    let session = Arc::new(DiskSession::new(store.clone()));
    let swarm = SwarmClient::new(
        SwarmClientConfig {
            server_id,
            data_port: 42069,
            download_dir,
            max_seeds: 64,
            max_downloads: 4,
        },
        SwarmClientDeps {
            session,
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
    let generator = Arc::new(Generator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        4,
    ));
    let manager = QueueManager::new(
        QueueManagerConfig {
            server_id,
            max_workers: 2,
            announce_url: ANNOUNCE.to_string(),
        },
        store.clone(),
        store.clone(),
        generator,
        swarm,
        check,
    );
    Fixture {
        store,
        manager,
        tracker,
        server_id,
    }
}

#[tokio::test]
async fn hash_and_seed_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(
        dir.path().join("lib").as_path(),
        "PKG_A",
        &[("reel_01.mxf", 150_000), ("reel_02.mxf", 80_000), ("ASSETMAP.xml", 1_500)],
    );
    let fixture = fixture(dir.path().join("incoming"), None);
    let package_id = Uuid::new_v4();

    fixture
        .store
        .upsert_inventory(package_id, fixture.server_id, package.to_str().expect("utf8"))
        .await
        .expect("inventory");
    assert!(fixture.manager.add_to_queue(package_id).await.expect("enqueue"));

    let worker = fixture
        .manager
        .schedule_once()
        .await
        .expect("schedule")
        .expect("worker spawned");
    worker.await.expect("worker ran");

    // The queue row reached its transient completed state.
    let rows = fixture.store.queue_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, QueueStatus::Completed);

    // A torrent row exists and its stored bytes re-hash to the same id.
    let record = fixture
        .store
        .torrent_for_package(package_id)
        .await
        .expect("query")
        .expect("torrent row");
    assert_eq!(record.piece_size, 16 * 1024 * 1024);
    assert_eq!(record.total_pieces, 1);
    let reparsed = Metainfo::parse(&record.file_bytes).expect("stored bytes parse");
    assert_eq!(InfoHash::of_info_bytes(&reparsed.info_bytes), record.info_hash);

    // The package is live in the tracker swarm with a seeder (plus twin).
    assert_eq!(fixture.tracker.swarm_size(record.info_hash).await, 2);

    // Re-running generation against the same input is idempotent.
    let second = fixture
        .store
        .save_torrent(&record)
        .await
        .expect("idempotent save");
    assert_eq!(second, record.id);
}

#[tokio::test]
async fn scheduler_skips_when_another_node_is_generating() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path().join("lib").as_path(), "PKG_B", &[("a.mxf", 10_000)]);
    let fixture = fixture(dir.path().join("incoming"), None);
    let package_id = Uuid::new_v4();

    fixture
        .store
        .upsert_inventory(package_id, fixture.server_id, package.to_str().expect("utf8"))
        .await
        .expect("inventory");
    fixture
        .store
        .enqueue(package_id, fixture.server_id)
        .await
        .expect("enqueue");
    // A peer is mid-generation on the same package.
    fixture
        .store
        .insert_queue_row(package_id, Uuid::new_v4(), QueueStatus::Generating, Utc::now());

    let spawned = fixture.manager.schedule_once().await.expect("schedule");
    assert!(spawned.is_none(), "fleet rule must skip the package");
    let own_row = fixture
        .store
        .queue_rows()
        .into_iter()
        .find(|row| row.server_id == fixture.server_id)
        .expect("own row");
    assert_eq!(own_row.status, QueueStatus::Queued);
}

#[tokio::test]
async fn add_to_queue_refuses_duplicates_and_fleet_conflicts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = fixture(dir.path().join("incoming"), None);
    let package_id = Uuid::new_v4();

    assert!(fixture.manager.add_to_queue(package_id).await.expect("first"));
    assert!(
        !fixture.manager.add_to_queue(package_id).await.expect("second"),
        "conflict insert must be a no-op"
    );

    let contested = Uuid::new_v4();
    fixture
        .store
        .insert_queue_row(contested, Uuid::new_v4(), QueueStatus::Generating, Utc::now());
    assert!(
        !fixture.manager.add_to_queue(contested).await.expect("refused"),
        "another node generating must refuse the enqueue"
    );
}

struct StaticCheck(QueueCheck);

#[async_trait]
impl QueueCheckClient for StaticCheck {
    async fn check(&self, _package_id: Uuid) -> Result<QueueCheck> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn main_server_check_deletes_row_when_torrent_exists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path().join("lib").as_path(), "PKG_C", &[("a.mxf", 5_000)]);
    let check: Arc<dyn QueueCheckClient> = Arc::new(StaticCheck(QueueCheck {
        already_in_progress: false,
        torrent_exists: true,
    }));
    let fixture = fixture(dir.path().join("incoming"), Some(check));
    let package_id = Uuid::new_v4();

    fixture
        .store
        .upsert_inventory(package_id, fixture.server_id, package.to_str().expect("utf8"))
        .await
        .expect("inventory");
    fixture
        .store
        .enqueue(package_id, fixture.server_id)
        .await
        .expect("enqueue");

    let spawned = fixture.manager.schedule_once().await.expect("schedule");
    assert!(spawned.is_none());
    assert!(fixture.store.queue_rows().is_empty(), "row must be deleted locally");
}

#[tokio::test]
async fn recovery_is_idempotent_and_reclaims_orphans() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = fixture(dir.path().join("incoming"), None);
    let dead_node = Uuid::new_v4();
    let package_a = Uuid::new_v4();
    let package_b = Uuid::new_v4();

    // Leftovers: a completed row, our own crashed generating row, and two
    // duplicate foreign generating claims for the same package.
    fixture
        .store
        .insert_queue_row(package_a, fixture.server_id, QueueStatus::Completed, Utc::now());
    fixture
        .store
        .insert_queue_row(package_b, fixture.server_id, QueueStatus::Generating, Utc::now());
    let older = Utc::now() - chrono::Duration::minutes(5);
    fixture
        .store
        .insert_queue_row(package_a, dead_node, QueueStatus::Generating, older);
    fixture
        .store
        .insert_queue_row(package_a, Uuid::new_v4(), QueueStatus::Generating, Utc::now());

    fixture.manager.recover().await.expect("recover");

    let rows = fixture.store.queue_rows();
    assert_eq!(rows.len(), 2, "completed culled, duplicates collapsed");
    assert!(rows.iter().all(|row| row.status == QueueStatus::Queued));
    assert!(rows.iter().all(|row| row.server_id == fixture.server_id));

    // Running recovery again on clean rows changes nothing.
    let before = fixture.store.queue_rows();
    fixture.manager.recover().await.expect("recover again");
    let after = fixture.store.queue_rows();
    assert_eq!(before.len(), after.len());
    assert!(
        before
            .iter()
            .zip(after.iter())
            .all(|(a, b)| a.id == b.id && a.status == b.status && a.server_id == b.server_id)
    );
}
