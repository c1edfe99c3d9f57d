//! Process-wide engine state
//!
//! An [`Engine`] owns the media backend, the configuration and the current
//! log level. It is cheap to clone; every indexer and source keeps one.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::media::{LogLevel, MediaBackend};

struct EngineInner {
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    log_level: RwLock<LogLevel>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        debug!("Engine with {} backend shut down", self.backend.name());
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Engine on the FFmpeg backend.
    #[cfg(feature = "ffmpeg")]
    pub fn new(config: EngineConfig) -> crate::error::Result<Self> {
        let backend = crate::ffmpeg::FfmpegBackend::new()?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    pub fn with_backend(backend: Arc<dyn MediaBackend>, config: EngineConfig) -> Self {
        let level = config.logging.level;
        backend.set_log_level(level);
        info!(
            "Engine {} initialized with {} backend ({})",
            crate::VERSION,
            backend.name(),
            backend.version()
        );
        Self {
            inner: Arc::new(EngineInner {
                backend,
                config,
                log_level: RwLock::new(level),
            }),
        }
    }

    pub fn backend(&self) -> &dyn MediaBackend {
        self.inner.backend.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn log_level(&self) -> LogLevel {
        *self.inner.log_level.read()
    }

    /// Change the level the backend logs at.
    pub fn set_log_level(&self, level: LogLevel) {
        *self.inner.log_level.write() = level;
        self.inner.backend.set_log_level(level);
    }

    /// Engine version followed by the backend's library versions.
    pub fn version(&self) -> String {
        format!("{} ({})", crate::VERSION, self.inner.backend.version())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.inner.backend.name())
            .field("log_level", &self.log_level())
            .finish()
    }
}
