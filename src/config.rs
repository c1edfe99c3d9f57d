//! Engine configuration
//!
//! Defaults for indexing and source behaviour, loadable from TOML files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::media::{DelayMode, ErrorHandling, LogLevel, SeekMode};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub indexing: IndexingConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Initial log level, overridden by `RUST_LOG`
    pub level: LogLevel,

    /// Output format (json, pretty)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Policy used by `load_or_index` helpers
    pub error_handling: ErrorHandling,

    /// Index video tracks unless told otherwise
    pub index_video: bool,

    /// Index audio tracks unless told otherwise
    pub index_audio: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            error_handling: ErrorHandling::Abort,
            index_video: true,
            index_audio: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Decoder threads, 0 picks one per core
    pub threads: usize,

    pub seek_mode: SeekMode,

    /// Decode forward instead of seeking when the target is at most this
    /// many frames ahead
    pub seek_threshold: usize,

    /// Earlier keyframes tried before a seek is given up
    pub max_seek_retries: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            seek_mode: SeekMode::Normal,
            seek_threshold: 10,
            max_seek_retries: 10,
        }
    }
}

impl VideoConfig {
    /// Thread count with 0 resolved to the number of cores.
    pub fn effective_threads(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub delay_mode: DelayMode,

    /// Decoded packets kept per audio source
    pub cache_blocks: usize,

    /// Packets decoded before the target after a seek
    pub preroll_packets: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            delay_mode: DelayMode::FirstVideoTrack,
            cache_blocks: 50,
            preroll_packets: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.video.seek_mode, SeekMode::Normal);
        assert_eq!(config.audio.delay_mode, DelayMode::FirstVideoTrack);
        assert!(config.indexing.index_video && config.indexing.index_audio);
        assert!(config.video.effective_threads() >= 1);
    }

    #[test]
    fn test_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [video]
            seek_mode = "aggressive"
            threads = 4

            [audio]
            delay_mode = { track = 2 }

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.video.seek_mode, SeekMode::Aggressive);
        assert_eq!(config.video.threads, 4);
        assert_eq!(config.video.seek_threshold, 10);
        assert_eq!(config.audio.delay_mode, DelayMode::Track(2));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.indexing, IndexingConfig::default());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avindex.toml");
        let mut config = EngineConfig::default();
        config.indexing.error_handling = ErrorHandling::Ignore;
        config.audio.cache_blocks = 8;
        config.to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }
}
