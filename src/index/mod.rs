//! Frame index
//!
//! An [`Index`] is built once by the [`Indexer`], persisted with
//! [`Index::write_file`] and shared read-only between sources.

pub mod cache;
pub mod fingerprint;
pub mod indexer;
pub mod serialize;
pub mod track;

use std::path::Path;

use tracing::debug;

use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{ErrorHandling, TrackType};

pub use cache::IndexCache;
pub use fingerprint::FileFingerprint;
pub use indexer::{Indexer, ProgressCallback};
pub use serialize::{EngineVersion, INDEX_FORMAT_VERSION, INDEX_MAGIC};
pub use track::{FrameEntry, Track, TrackTimeBase};

/// Immutable result of indexing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub(crate) tracks: Vec<Track>,
    pub(crate) fingerprint: FileFingerprint,
    pub(crate) error_handling: ErrorHandling,
    pub(crate) format_name: String,
    pub(crate) engine_version: EngineVersion,
}

impl Index {
    pub(crate) fn new(
        tracks: Vec<Track>,
        fingerprint: FileFingerprint,
        error_handling: ErrorHandling,
        format_name: String,
    ) -> Self {
        Self {
            tracks,
            fingerprint,
            error_handling,
            format_name,
            engine_version: EngineVersion::current(),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, n: usize) -> Result<&Track> {
        self.tracks.get(n).ok_or_else(|| {
            Error::new(
                ErrorKind::Index,
                ErrorSubkind::InvalidArgument,
                format!("Track {} is out of range (0..{})", n, self.tracks.len()),
            )
        })
    }

    /// First track of `track_type`, indexed or not.
    pub fn first_track_of_type(&self, track_type: TrackType) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.track_type == track_type)
            .ok_or_else(|| no_track(track_type, ""))
    }

    /// First track of `track_type` that has entries.
    pub fn first_indexed_track_of_type(&self, track_type: TrackType) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.track_type == track_type && !t.is_empty())
            .ok_or_else(|| no_track(track_type, "indexed "))
    }

    /// Policy the index was built with.
    pub fn error_handling(&self) -> ErrorHandling {
        self.error_handling
    }

    /// Container format name reported by the demuxer.
    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    pub fn fingerprint(&self) -> &FileFingerprint {
        &self.fingerprint
    }

    /// Version of the engine that built the index.
    pub fn engine_version(&self) -> EngineVersion {
        self.engine_version
    }

    /// True when `path` still is the file this index was built from.
    pub fn matches<P: AsRef<Path>>(&self, path: P) -> bool {
        self.belongs_to(path).is_ok()
    }

    /// Like [`Index::matches`], but reports why a file doesn't match.
    pub fn belongs_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let actual = FileFingerprint::compute(path)?;
        if actual != self.fingerprint {
            debug!(
                "Fingerprint mismatch for {:?}: index {} ({} bytes), file {} ({} bytes)",
                path,
                self.fingerprint.hex(),
                self.fingerprint.file_size,
                actual.hex(),
                actual.file_size
            );
            return Err(Error::new(
                ErrorKind::Index,
                ErrorSubkind::FileMismatch,
                format!("The index does not match the file {:?}", path),
            ));
        }
        Ok(())
    }
}

fn no_track(track_type: TrackType, what: &str) -> Error {
    Error::new(
        ErrorKind::Index,
        ErrorSubkind::NotAvailable,
        format!("No {}{} tracks found", what, track_type.name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> Index {
        let mut video = Track::new(TrackType::Video, "h264", TrackTimeBase::new(1, 25).unwrap());
        video.push(FrameEntry {
            pts: Some(0),
            keyframe: true,
            ..Default::default()
        });
        video.finalize();
        let audio = Track::new(TrackType::Audio, "aac", TrackTimeBase::new(1, 48000).unwrap());
        let audio2 = {
            let mut t = Track::new(TrackType::Audio, "opus", TrackTimeBase::new(1, 48000).unwrap());
            t.push(FrameEntry {
                sample_count: 960,
                ..Default::default()
            });
            t.finalize();
            t
        };
        Index::new(
            vec![video, audio, audio2],
            FileFingerprint::default(),
            ErrorHandling::Abort,
            "matroska".to_string(),
        )
    }

    #[test]
    fn test_track_queries() {
        let index = sample_index();
        assert_eq!(index.track_count(), 3);
        assert_eq!(index.first_track_of_type(TrackType::Audio).unwrap(), 1);
        assert_eq!(index.first_indexed_track_of_type(TrackType::Audio).unwrap(), 2);
        assert_eq!(index.format_name(), "matroska");
        assert!(index.track(3).is_err());
    }

    #[test]
    fn test_missing_type_not_available() {
        let index = sample_index();
        let err = index.first_track_of_type(TrackType::Subtitle).unwrap_err();
        assert!(err.is(ErrorKind::Index, ErrorSubkind::NotAvailable));
        let err = index.first_indexed_track_of_type(TrackType::Data).unwrap_err();
        assert!(err.is(ErrorKind::Index, ErrorSubkind::NotAvailable));
    }
}
