//! Tether: live preview and remote capture for a USB-tethered camera

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::capture::{CameraDriver, MockDriver, Payload};
use tether::{server, supervisor, CameraSession, Config, DeviceConfig, DriverKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Tether launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    tether::CONFIG.store(Arc::new(config.clone()));

    let driver = build_driver(&config.device)?;
    let session = Arc::new(CameraSession::new(driver, config.session.clone()));

    // Keep the camera connected in the background
    tokio::spawn(supervisor::supervise(
        Arc::clone(&session),
        config.session.reconnect_backoff(),
    ));

    server::serve(Arc::clone(&session), config.server.clone(), shutdown_signal()).await?;

    info!("Tether shutting down");
    tokio::task::spawn_blocking(move || session.shutdown()).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=debug"));

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
}

fn build_driver(config: &DeviceConfig) -> Result<Box<dyn CameraDriver>> {
    match config.driver {
        DriverKind::Mock => {
            info!("Using mock camera");
            let frame_interval = Duration::from_secs(1) / config.fps.max(1);
            Ok(Box::new(
                MockDriver::new(Payload::TestPattern {
                    width: config.width,
                    height: config.height,
                })
                .with_fetch_delay(frame_interval),
            ))
        }
        #[cfg(feature = "v4l2")]
        DriverKind::V4l2 => {
            let mut config = config.clone();
            if config.path.is_empty() {
                config.path = tether::utils::auto_detect_device()
                    .ok_or_else(|| eyre!("No suitable capture device found"))?;
            }
            info!("Using capture device: {}", config.path);
            Ok(Box::new(tether::capture::V4l2Driver::new(config)))
        }
        #[cfg(not(feature = "v4l2"))]
        DriverKind::V4l2 => Err(eyre!("built without V4L2 support")),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}
