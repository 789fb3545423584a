//! WebSocket control channel

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{run_capture, AppState, StatusReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlRequest {
    Capture,
    Focus,
    Status,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusReport>,
}

impl ControlResponse {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            status: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            status: None,
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(%err, "control socket read error");
                break;
            }
        };

        let response = match serde_json::from_str::<ControlRequest>(&text) {
            Ok(request) => dispatch(request, &state).await,
            Err(err) => ControlResponse::error(format!("invalid control message: {err}")),
        };

        let reply = match serde_json::to_string(&response) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, "failed to encode control response");
                continue;
            }
        };
        if socket.send(Message::Text(reply)).await.is_err() {
            break;
        }
    }
}

async fn dispatch(request: ControlRequest, state: &AppState) -> ControlResponse {
    match request {
        ControlRequest::Capture => {
            info!("Capture command received");
            match run_capture(state.session.clone()).await {
                Ok(()) => ControlResponse::ok(),
                Err(err) => ControlResponse::error(err.to_string()),
            }
        }
        ControlRequest::Focus => {
            info!("Focus command received");
            ControlResponse::ok()
        }
        ControlRequest::Status => ControlResponse {
            status: Some(StatusReport::collect(&state.session)),
            ..ControlResponse::ok()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let request: ControlRequest = serde_json::from_str(r#"{"type":"capture"}"#).unwrap();
        assert_eq!(request, ControlRequest::Capture);

        let request: ControlRequest = serde_json::from_str(r#"{"type":"focus"}"#).unwrap();
        assert_eq!(request, ControlRequest::Focus);

        assert!(serde_json::from_str::<ControlRequest>(r#"{"type":"zoom"}"#).is_err());
    }

    #[test]
    fn error_response_omits_status() {
        let json = serde_json::to_string(&ControlResponse::error("camera is not connected")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"camera is not connected"}"#);
    }
}
