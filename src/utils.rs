use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Auto-detect the first capture device that streams MJPEG
#[cfg(feature = "v4l2")]
pub fn auto_detect_device() -> Option<String> {
    use std::path::Path;

    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        // Viewers receive the device's bytes untouched, so only MJPEG will do
        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"MJPG")) {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Some(path);
            }
        }
    }

    None
}
