//! Live reload of the `[noise]` section into a running estimator.
//!
//! [`ConfigWatcher`] polls the config file's modification time and size.
//! When either changes, the file is parsed again and the noise values are
//! written into the shared [`NoiseParameterStore`]; the estimator picks them
//! up on its next tick.  A file that fails to parse leaves the store as it
//! was.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use posest_filter::NoiseParameterStore;
use posest_types::PosestError;
use tracing::{info, warn};

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

pub struct ConfigWatcher {
    path: PathBuf,
    params: Arc<NoiseParameterStore>,
    seen: Option<Fingerprint>,
}

impl ConfigWatcher {
    /// Watch `path`.  The first [`poll`][Self::poll] applies the file if it
    /// exists.
    pub fn new(path: PathBuf, params: Arc<NoiseParameterStore>) -> Self {
        Self {
            path,
            params,
            seen: None,
        }
    }

    /// Treat the file's current state as already applied.
    pub fn mark_current(mut self) -> Self {
        self.seen = self.fingerprint();
        self
    }

    /// Check the file once.  Returns `Ok(true)` when new values were
    /// written into the store.
    pub fn poll(&mut self) -> Result<bool, PosestError> {
        let current = self.fingerprint();
        if current.is_none() || current == self.seen {
            return Ok(false);
        }
        self.seen = current;

        let cfg = config::load_from(&self.path)?.ok_or_else(|| {
            PosestError::Config(format!("{} disappeared", self.path.display()))
        })?;
        self.params.apply(&cfg.noise);
        info!(
            path = %self.path.display(),
            process_noise = cfg.noise.process_noise,
            gps_noise = cfg.noise.gps_noise,
            baro_noise = cfg.noise.baro_noise,
            ultra_noise = cfg.noise.ultra_noise,
            use_gps_speed = cfg.noise.use_gps_speed,
            "noise parameters reloaded"
        );
        Ok(true)
    }

    /// Poll every `period` until `shutdown` is set.
    pub async fn watch(mut self, period: Duration, shutdown: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(period);
        while !shutdown.load(Ordering::Acquire) {
            ticker.tick().await;
            if let Err(e) = self.poll() {
                warn!(error = %e, "config reload failed; keeping previous parameters");
            }
        }
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        let meta = fs::metadata(&self.path).ok()?;
        Some(Fingerprint {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}
