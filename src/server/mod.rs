//! HTTP transport: MJPEG live view, snapshots, status and capture control.
//!
//! - `GET /live.mjpeg`: multipart live preview
//! - `GET /photo.jpg`: latest preview frame
//! - `GET /status`: session status
//! - `POST /capture`: full-resolution capture
//! - `WS /ws`: JSON control channel

pub mod control;
pub mod mjpeg;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::CaptureError;
use crate::pipeline::PoolStats;
use crate::session::{CameraSession, SessionState};
use crate::ServerConfig;

/// Shared state for the handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<CameraSession>,
    pub frame_poll: Duration,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: &'static str,
    pub connected: bool,
    pub streaming: bool,
    pub viewers: usize,
    pub latest_sequence: Option<u64>,
    pub frame_age_ms: Option<u64>,
    pub pool: PoolStats,
}

impl StatusReport {
    pub fn collect(session: &CameraSession) -> Self {
        let latest = session.latest_frame();
        let state = session.state();
        Self {
            state: state.as_str(),
            connected: matches!(state, SessionState::Connected { .. }),
            streaming: state.is_streaming(),
            viewers: session.viewer_count(),
            latest_sequence: latest.as_ref().map(|frame| frame.sequence()),
            frame_age_ms: latest.as_ref().map(|frame| frame.age().as_millis() as u64),
            pool: session.pool_stats(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/live.mjpeg", get(mjpeg::live))
        .route("/photo.jpg", get(photo))
        .route("/status", get(status))
        .route("/capture", post(capture))
        .route("/ws", get(control::ws_upgrade))
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(
    session: Arc<CameraSession>,
    config: ServerConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind).await?;
    serve_on(listener, session, config.frame_poll(), shutdown).await
}

pub async fn serve_on<F>(
    listener: TcpListener,
    session: Arc<CameraSession>,
    frame_poll: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("HTTP server listening on {}", listener.local_addr()?);

    let app = router(AppState {
        session,
        frame_poll,
    });
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

fn unavailable(message: &'static str) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
}

/// GET /photo.jpg: latest preview frame as a single JPEG
async fn photo(State(state): State<AppState>) -> Response {
    if !state.session.is_connected() {
        return unavailable("Camera not connected");
    }
    let Some(frame) = state.session.latest_frame() else {
        return unavailable("No frame available");
    };

    (
        [(header::CONTENT_TYPE, "image/jpeg")],
        bytes::Bytes::copy_from_slice(frame.data()),
    )
        .into_response()
}

/// GET /status
async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport::collect(&state.session))
}

/// POST /capture
async fn capture(State(state): State<AppState>) -> Response {
    match run_capture(Arc::clone(&state.session)).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
        Err(CaptureError::NotConnected) => unavailable("Camera not connected"),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Run a capture on the blocking pool; the device call can take seconds.
pub(crate) async fn run_capture(session: Arc<CameraSession>) -> Result<(), CaptureError> {
    match tokio::task::spawn_blocking(move || session.capture_image()).await {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "capture task failed");
            Err(CaptureError::Device(crate::error::DeviceError::Driver(
                "capture task aborted".into(),
            )))
        }
    }
}
