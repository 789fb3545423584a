//! Reconnect loop keeping the session attached to the camera

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::session::CameraSession;

/// Connect, wait for the disconnect notification, and connect again, forever.
///
/// Failed attempts are retried after `backoff`.
pub async fn supervise(session: Arc<CameraSession>, backoff: Duration) {
    loop {
        let attempt = Arc::clone(&session);
        match tokio::task::spawn_blocking(move || attempt.connect()).await {
            Ok(Ok(())) => {
                let mut signal = session.disconnect_signal();
                signal.wait().await;
                warn!("Camera disconnected");
            }
            Ok(Err(err)) => {
                info!(%err, "USB init error, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                error!(%err, "connect task failed");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
