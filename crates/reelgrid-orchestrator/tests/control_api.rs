//! JSON contract of the control routes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use reelgrid_orchestrator::{MainService, control_router};
use reelgrid_test_support::MemStore;
use reelgrid_test_support::fixtures::{build_torrent, package_dir};
use reelgrid_torrent_core::store::TorrentStore;
use reelgrid_torrent_core::{InfoHash, Package, TorrentRecord};

async fn seeded_service() -> (MainService, Arc<MemStore>, TorrentRecord) {
    let store = Arc::new(MemStore::new());
    let service = MainService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let package = package_dir(dir.path(), "PKG_API", &[("a.mxf", 5_000)]);
    let payload = build_torrent(&package, 4096, "http://tracker.local/announce");
    let meta = reelgrid_bencode::Metainfo::parse(&payload).expect("parse");
    let package_row = Package {
        id: Uuid::new_v4(),
        asset_map_uuid: Uuid::new_v4(),
        name: "PKG_API".into(),
        title: None,
        total_size_bytes: 5_000,
        file_count: 1,
    };
    store.upsert_package(&package_row).await.expect("package");
    let record = TorrentRecord {
        id: Uuid::new_v4(),
        package_id: package_row.id,
        info_hash: InfoHash::of_info_bytes(&meta.info_bytes),
        piece_size: 4096,
        total_pieces: 2,
        file_bytes: payload,
        created_by_server: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
    };
    store.save_torrent(&record).await.expect("torrent");
    (service, store, record)
}

#[tokio::test]
async fn pending_transfers_serialise_with_contract_fields() {
    let (service, _store, record) = seeded_service().await;
    let destination = Uuid::new_v4();
    service
        .create_transfer(record.id, destination, Some("ui"))
        .await
        .expect("create");

    let app = control_router(service);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/servers/{destination}/pending-transfers"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    let entry = &json.as_array().expect("array")[0];
    for field in [
        "id",
        "torrent_id",
        "info_hash",
        "package_id",
        "package_name",
        "status",
        "total_size_bytes",
        "priority",
    ] {
        assert!(entry.get(field).is_some(), "missing field {field}");
    }
    assert_eq!(entry["package_name"], "PKG_API");
    assert_eq!(entry["status"], "queued");
}

#[tokio::test]
async fn torrent_file_round_trips_raw_bytes() {
    let (service, _store, record) = seeded_service().await;
    let app = control_router(service);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/torrents/{}/file", record.info_hash))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(body.to_vec(), record.file_bytes);

    let meta = reelgrid_bencode::Metainfo::parse(&body).expect("parse");
    assert_eq!(InfoHash::of_info_bytes(&meta.info_bytes), record.info_hash);
}

#[tokio::test]
async fn transfer_put_patches_progress_fields() {
    let (service, store, record) = seeded_service().await;
    let destination = Uuid::new_v4();
    let transfer_id = service
        .create_transfer(record.id, destination, None)
        .await
        .expect("create");

    let app = control_router(service);
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/transfers/{transfer_id}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"status":"downloading","progress_percent":25.0,"downloaded_bytes":1250}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let row = store.transfer_row(transfer_id).expect("row");
    assert_eq!(row.status.as_str(), "downloading");
    assert!((row.progress_percent - 25.0).abs() < f64::EPSILON);
    assert_eq!(row.downloaded_bytes, 1250);
}

#[tokio::test]
async fn queue_check_reports_existing_torrents() {
    let (service, _store, record) = seeded_service().await;
    let app = control_router(service);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/torrent-queue/check?package_id={}", record.package_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["torrent_exists"], true);
    assert_eq!(json["already_in_progress"], false);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/torrent-queue/check?package_id={}", Uuid::new_v4()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["torrent_exists"], false);
}

#[tokio::test]
async fn malformed_info_hash_is_rejected() {
    let (service, _store, _record) = seeded_service().await;
    let app = control_router(service);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/torrents/not-a-hash/file")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
