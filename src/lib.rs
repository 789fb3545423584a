pub mod capture;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod utils;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::{CaptureError, ConnectError, DeviceError};
pub use session::{CameraSession, DisconnectSignal, SessionState};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    V4l2,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub driver: DriverKind,
    /// Empty means auto-detect
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
    /// Storage target for full-resolution captures
    pub capture_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub retry_delay_ms: u64,
    pub throughput_window_secs: u64,
    pub pool_capacity: usize,
    pub reconnect_backoff_secs: u64,
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// How often a live stream checks the slot for a newer frame
    pub frame_poll_ms: u64,
}

impl ServerConfig {
    pub fn frame_poll(&self) -> Duration {
        Duration::from_millis(self.frame_poll_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::V4l2,
            path: "/dev/video0".into(),
            width: 1024,
            height: 680,
            fps: 30,
            buffer_count: 4,
            capture_dir: PathBuf::from("captures"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
            throughput_window_secs: 3,
            pool_capacity: 4,
            reconnect_backoff_secs: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            frame_poll_ms: 1,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file, and `TETHER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = path.unwrap_or_else(|| Path::new("tether.toml"));

        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix("TETHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
