//! Axum routes for the control surface consumed by client nodes.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use reelgrid_torrent_core::{
    CommandAck, InfoHash, SeederRegistration, TorrentStatusReport, TransferProgressUpdate,
};

use crate::service::MainService;

/// Build the control router over the main service.
#[must_use]
pub fn control_router(service: MainService) -> Router {
    Router::new()
        .route(
            "/servers/{id}/pending-transfers",
            get(get_pending_transfers),
        )
        .route("/torrents/{info_hash}/file", get(get_torrent_file))
        .route("/transfers/{id}", put(put_transfer))
        .route("/torrents/{info_hash}/seeders", post(post_seeder))
        .route("/servers/{id}/torrent-status", post(post_status))
        .route(
            "/servers/{id}/transfer-commands",
            get(get_transfer_commands),
        )
        .route("/servers/{id}/content-commands", get(get_content_commands))
        .route(
            "/servers/{id}/transfer-command-ack",
            post(post_transfer_ack),
        )
        .route("/servers/{id}/content-command-ack", post(post_content_ack))
        .route("/torrent-queue/check", get(get_queue_check))
        .with_state(service)
}

fn internal_error(err: &anyhow::Error) -> Response {
    warn!(error = %err, "control api request failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn get_pending_transfers(
    State(service): State<MainService>,
    Path(server_id): Path<Uuid>,
) -> Response {
    match service.pending_transfers(server_id).await {
        Ok(transfers) => Json(transfers).into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn get_torrent_file(
    State(service): State<MainService>,
    Path(info_hash): Path<String>,
) -> Response {
    let Ok(info_hash) = info_hash.parse::<InfoHash>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match service.torrent_file(&info_hash).await {
        Ok(bytes) => bytes.into_response(),
        Err(err) => {
            warn!(error = %err, info_hash = %info_hash, "torrent file lookup failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn put_transfer(
    State(service): State<MainService>,
    Path(transfer_id): Path<Uuid>,
    Json(update): Json<TransferProgressUpdate>,
) -> Response {
    match service.update_transfer(transfer_id, &update).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn post_seeder(
    State(service): State<MainService>,
    Path(info_hash): Path<String>,
    Json(registration): Json<SeederRegistration>,
) -> Response {
    let Ok(info_hash) = info_hash.parse::<InfoHash>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match service.register_seeder(&info_hash, &registration).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn post_status(
    State(service): State<MainService>,
    Path(server_id): Path<Uuid>,
    Json(report): Json<TorrentStatusReport>,
) -> Response {
    if report.server_id != server_id {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match service.ingest_status_report(&report).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn get_transfer_commands(
    State(service): State<MainService>,
    Path(server_id): Path<Uuid>,
) -> Response {
    match service.transfer_commands(server_id).await {
        Ok(commands) => Json(commands).into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn get_content_commands(
    State(service): State<MainService>,
    Path(server_id): Path<Uuid>,
) -> Response {
    match service.content_commands(server_id).await {
        Ok(commands) => Json(commands).into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn post_transfer_ack(
    State(service): State<MainService>,
    Path(server_id): Path<Uuid>,
    Json(ack): Json<CommandAck>,
) -> Response {
    match service.ack_transfer_command(server_id, &ack).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn post_content_ack(
    State(service): State<MainService>,
    Path(server_id): Path<Uuid>,
    Json(ack): Json<CommandAck>,
) -> Response {
    match service.ack_content_command(server_id, &ack).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(&err),
    }
}

#[derive(Debug, Deserialize)]
struct QueueCheckParams {
    package_id: Uuid,
}

async fn get_queue_check(
    State(service): State<MainService>,
    Query(params): Query<QueueCheckParams>,
) -> Response {
    match service.queue_check(params.package_id).await {
        Ok(check) => Json(check).into_response(),
        Err(err) => internal_error(&err),
    }
}
