//! Axum wiring for the announce and snapshot routes.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{ConnectInfo, Extension, RawQuery, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use reelgrid_torrent_core::store::{AnnounceAttempt, AnnounceLog};

use crate::announce::{AnnounceRequest, encode_failure, encode_response};
use crate::swarm::{CLEANUP_INTERVAL, Tracker};

/// Shared route state.
#[derive(Clone)]
struct TrackerState {
    tracker: Arc<Tracker>,
    log: Option<Arc<dyn AnnounceLog>>,
}

/// The tracker HTTP server plus its liveness sweep.
pub struct TrackerServer {
    tracker: Arc<Tracker>,
    log: Option<Arc<dyn AnnounceLog>>,
}

impl TrackerServer {
    /// Bundle a tracker with its optional audit log.
    #[must_use]
    pub fn new(tracker: Arc<Tracker>, log: Option<Arc<dyn AnnounceLog>>) -> Self {
        Self { tracker, log }
    }

    /// Serve announces until `shutdown` flips, sweeping stale peers on the
    /// side.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let app = router(Arc::clone(&self.tracker), self.log.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind tracker listener on {addr}"))?;
        info!(addr = %addr, "tracker listening");

        let sweep_tracker = Arc::clone(&self.tracker);
        let mut sweep_shutdown = shutdown.clone();
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => sweep_tracker.cleanup().await,
                    _ = sweep_shutdown.changed() => break,
                }
            }
        });

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("tracker server failed");

        sweeper.abort();
        result
    }
}

/// Build the tracker router; exposed for in-process tests.
#[must_use]
pub fn router(tracker: Arc<Tracker>, log: Option<Arc<dyn AnnounceLog>>) -> Router {
    Router::new()
        .route("/announce", get(handle_announce))
        .route("/snapshot", get(handle_snapshot))
        .with_state(TrackerState { tracker, log })
}

async fn handle_announce(
    State(state): State<TrackerState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    RawQuery(query): RawQuery,
) -> Response {
    let remote_ip = connect_info
        .map_or_else(|| IpAddr::from([127, 0, 0, 1]), |info| info.0.0.ip());
    let source = source_ip(&headers, remote_ip);

    let query = query.unwrap_or_default();
    match AnnounceRequest::from_query(&query) {
        Ok(request) => {
            let ip = state.tracker.effective_ip(source);
            let outcome = state.tracker.announce(&request, ip).await;
            debug!(
                info_hash = %request.info_hash,
                ip = %ip,
                port = request.port,
                event = %request.event,
                complete = outcome.complete,
                incomplete = outcome.incomplete,
                "announce processed"
            );
            record_attempt(&state, Some(&request), source, true, None).await;
            bencoded(encode_response(&outcome, request.compact))
        }
        Err(err) => {
            warn!(error = %err, source = %source, "rejected announce");
            let reason = err.to_string();
            record_attempt(&state, None, source, false, Some(&reason)).await;
            bencoded(encode_failure(&reason))
        }
    }
}

async fn handle_snapshot(State(state): State<TrackerState>) -> Response {
    Json(state.tracker.snapshot().await).into_response()
}

fn bencoded(payload: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], payload).into_response()
}

/// Prefer the first `X-Forwarded-For` token, then `X-Real-IP`, then the TCP
/// remote address.
fn source_ip(headers: &HeaderMap, remote: IpAddr) -> IpAddr {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(real) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
    {
        if let Ok(ip) = real.trim().parse() {
            return ip;
        }
    }
    remote
}

async fn record_attempt(
    state: &TrackerState,
    request: Option<&AnnounceRequest>,
    source: IpAddr,
    accepted: bool,
    failure_reason: Option<&str>,
) {
    let Some(log) = &state.log else {
        return;
    };
    let attempt = AnnounceAttempt {
        info_hash: request.map(|r| r.info_hash.to_hex()),
        peer_id: request.map(|r| String::from_utf8_lossy(&r.peer_id).into_owned()),
        source_ip: source.to_string(),
        port: request.map(|r| r.port),
        event: request.map(|r| r.event.clone()).unwrap_or_default(),
        accepted,
        failure_reason: failure_reason.map(str::to_string),
        received_at: Utc::now(),
    };
    let _ = log.record_announce(&attempt).await;
}
