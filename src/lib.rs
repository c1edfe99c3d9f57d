//! Frame-accurate media indexing and random access.
//!
//! Scan a container once with an [`Indexer`], keep the resulting [`Index`]
//! (in memory or on disk), then open [`VideoSource`]s and [`AudioSource`]s
//! on it to fetch exact frames and samples.

pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod index;
pub mod logging;
pub mod media;
pub mod source;

#[cfg(test)]
pub(crate) mod tests;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, ErrorInfo, ErrorKind, ErrorSubkind, Result};
pub use index::{FrameEntry, Index, IndexCache, Indexer, Track, TrackTimeBase};
pub use media::{
    ChromaLocation, ColorRange, DelayMode, ErrorHandling, LogLevel, PixelFormat, Resizer,
    SampleFormat, SeekMode, TrackType,
};
pub use source::{AudioProperties, AudioSource, Frame, ResampleOptions, VideoProperties, VideoSource};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
