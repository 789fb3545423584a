//! Multipart MJPEG live stream

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream;
use tracing::info;

use super::{unavailable, AppState};
use crate::capture::Frame;
use crate::session::{CameraSession, DisconnectSignal};

const BOUNDARY: &str = "frame";

/// Registration of one live-stream client; removes the viewer when dropped
pub struct ViewerGuard {
    session: Arc<CameraSession>,
    id: String,
}

impl ViewerGuard {
    pub fn join(session: Arc<CameraSession>, id: String) -> Self {
        session.add_viewer(&id);
        Self { session, id }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        info!(viewer = %self.id, "MJPEG client disconnected");
        self.session.remove_viewer(&self.id);
    }
}

/// Encode one frame as a multipart part.
pub fn encode_part(frame: &Frame) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(frame.data());
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Wait for a frame newer than `last_sequence`. `None` once this connection is lost,
/// even if the camera has come back since.
async fn next_frame(
    session: &CameraSession,
    signal: &mut DisconnectSignal,
    last_sequence: u64,
    poll: Duration,
) -> Option<Arc<Frame>> {
    loop {
        if signal.is_fired() {
            return None;
        }
        match session.latest_frame() {
            Some(frame) if frame.sequence() != last_sequence => return Some(frame),
            _ => {
                tokio::select! {
                    _ = signal.wait() => return None,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }
    }
}

/// GET /live.mjpeg
pub async fn live(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    // Taken before the connected check so a stale signal is caught below
    let signal = state.session.disconnect_signal();
    if !state.session.is_connected() || signal.is_fired() {
        return unavailable("Camera not connected");
    }

    info!(viewer = %remote, "New MJPEG client connected");
    let viewer = ViewerGuard::join(Arc::clone(&state.session), remote.to_string());
    let poll = state.frame_poll;

    let parts = stream::unfold(
        (viewer, signal, 0u64),
        move |(viewer, mut signal, last_sequence)| async move {
            let frame = next_frame(&viewer.session, &mut signal, last_sequence, poll).await?;
            let part = encode_part(&frame);
            Some((Ok::<_, Infallible>(part), (viewer, signal, frame.sequence())))
        },
    );

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )],
        Body::from_stream(parts),
    )
        .into_response()
}
