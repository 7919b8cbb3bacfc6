use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use candle_core::Device;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Result;

/// Sets up logging to stderr and, when given, appends to `log_file` as well.
/// `RUST_LOG` overrides the default `info` level. Calling it twice is a no-op.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file: File = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

/// Seeds the device RNG where the backend supports it and returns the host RNG.
pub fn seed_everything(seed: u64, device: &Device) -> StdRng {
    if let Err(err) = device.set_seed(seed) {
        tracing::debug!("device does not take a seed: {err}");
    }
    StdRng::seed_from_u64(seed)
}

/// CUDA when compiled in and present, CPU otherwise.
pub fn select_device() -> Result<Device> {
    Ok(Device::cuda_if_available(0)?)
}

pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// `<root>/logs/<unix-time>` for one training run.
pub fn run_dir(root: impl AsRef<Path>, unix_time: u64) -> PathBuf {
    root.as_ref().join("logs").join(unix_time.to_string())
}
