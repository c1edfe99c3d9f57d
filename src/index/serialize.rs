//! Binary index format
//!
//! ```text
//! magic "AVIX" | u16 format version | u16 x3 engine version
//! u64 file size | [u8; 32] digest | u8 error handling | str format name
//! u32 track count, then per track:
//!   i32 type | str codec | i64 tb num | i64 tb den | u8 flags
//!   i64 last duration | u32 entry count | entries
//! ```
//! All integers are little-endian, strings are u16-length-prefixed UTF-8.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::info;

use super::{FileFingerprint, FrameEntry, Index, Track, TrackTimeBase};
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{ErrorHandling, TrackType};

pub const INDEX_MAGIC: [u8; 4] = *b"AVIX";

/// Bumped whenever the layout changes.
pub const INDEX_FORMAT_VERSION: u16 = 1;

/// Serialized size of one [`FrameEntry`].
const ENTRY_SIZE: usize = 1 + 8 * 3 + 4 + 8 + 4 + 8 + 4 + 4;

const ENTRY_KEYFRAME: u8 = 0x01;
const ENTRY_HAS_PTS: u8 = 0x02;
const ENTRY_HAS_DTS: u8 = 0x04;
const ENTRY_HAS_ORIGINAL_PTS: u8 = 0x08;

const TRACK_USE_DTS: u8 = 0x01;
const TRACK_HAS_TS: u8 = 0x02;

/// Version of the engine that wrote an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl EngineVersion {
    pub fn current() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn read_err(e: std::io::Error) -> Error {
    Error::new(
        ErrorKind::Serialization,
        ErrorSubkind::FileRead,
        format!("Truncated or unreadable index: {}", e),
    )
}

fn write_err(e: std::io::Error) -> Error {
    Error::new(
        ErrorKind::Serialization,
        ErrorSubkind::FileWrite,
        format!("Failed to write index: {}", e),
    )
}

fn corrupt(what: impl fmt::Display) -> Error {
    Error::new(
        ErrorKind::Serialization,
        ErrorSubkind::FileRead,
        format!("Corrupt index: {}", what),
    )
}

fn write_str<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    let mut len = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    w.write_u16::<LittleEndian>(len as u16)?;
    w.write_all(&s.as_bytes()[..len])
}

fn read_str(r: &mut Cursor<&[u8]>) -> Result<String> {
    let len = r.read_u16::<LittleEndian>().map_err(read_err)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(read_err)?;
    String::from_utf8(buf).map_err(|_| corrupt("string is not UTF-8"))
}

fn remaining(r: &Cursor<&[u8]>) -> usize {
    r.get_ref().len().saturating_sub(r.position() as usize)
}

impl Index {
    /// Serialize into an in-memory buffer.
    pub fn serialize(&self) -> Bytes {
        let entries: usize = self.tracks.iter().map(|t| t.entries.len()).sum();
        let mut writer = BytesMut::with_capacity(64 + entries * ENTRY_SIZE).writer();
        // Writing into memory can't fail
        let _ = self.write_to(&mut writer);
        writer.into_inner().freeze()
    }

    /// Serialize into `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.write_inner(writer).map_err(write_err)
    }

    /// Serialize into a file, replacing it.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            Error::new(
                ErrorKind::Serialization,
                ErrorSubkind::FileWrite,
                format!("Can't create index file {:?}: {}", path, e),
            )
        })?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush().map_err(write_err)?;
        info!("Wrote index for {} tracks to {:?}", self.tracks.len(), path);
        Ok(())
    }

    fn write_inner<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&INDEX_MAGIC)?;
        w.write_u16::<LittleEndian>(INDEX_FORMAT_VERSION)?;
        w.write_u16::<LittleEndian>(self.engine_version.major)?;
        w.write_u16::<LittleEndian>(self.engine_version.minor)?;
        w.write_u16::<LittleEndian>(self.engine_version.patch)?;

        w.write_u64::<LittleEndian>(self.fingerprint.file_size)?;
        w.write_all(&self.fingerprint.digest)?;
        w.write_u8(self.error_handling.code() as u8)?;
        write_str(w, &self.format_name)?;

        w.write_u32::<LittleEndian>(self.tracks.len() as u32)?;
        for track in &self.tracks {
            w.write_i32::<LittleEndian>(track.track_type.code())?;
            write_str(w, &track.codec_name)?;
            w.write_i64::<LittleEndian>(track.time_base.num)?;
            w.write_i64::<LittleEndian>(track.time_base.den)?;
            let mut flags = 0;
            if track.use_dts {
                flags |= TRACK_USE_DTS;
            }
            if track.has_ts {
                flags |= TRACK_HAS_TS;
            }
            w.write_u8(flags)?;
            w.write_i64::<LittleEndian>(track.last_duration)?;

            w.write_u32::<LittleEndian>(track.entries.len() as u32)?;
            for e in &track.entries {
                write_entry(w, e)?;
            }
        }
        Ok(())
    }

    /// Parse an index from a buffer produced by [`Index::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Index> {
        let mut r = Cursor::new(data);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(read_err)?;
        if magic != INDEX_MAGIC {
            return Err(corrupt("not an index file"));
        }

        let format_version = r.read_u16::<LittleEndian>().map_err(read_err)?;
        let engine_version = EngineVersion {
            major: r.read_u16::<LittleEndian>().map_err(read_err)?,
            minor: r.read_u16::<LittleEndian>().map_err(read_err)?,
            patch: r.read_u16::<LittleEndian>().map_err(read_err)?,
        };
        let current = EngineVersion::current();
        if format_version != INDEX_FORMAT_VERSION || engine_version.major != current.major {
            return Err(Error::new(
                ErrorKind::Serialization,
                ErrorSubkind::Version,
                format!(
                    "Index format {} from engine {} is not supported (expected format {}, engine {}.x)",
                    format_version, engine_version, INDEX_FORMAT_VERSION, current.major
                ),
            ));
        }

        let file_size = r.read_u64::<LittleEndian>().map_err(read_err)?;
        let mut digest = [0u8; 32];
        r.read_exact(&mut digest).map_err(read_err)?;
        let code = r.read_u8().map_err(read_err)?;
        let error_handling = ErrorHandling::from_code(code as i32)
            .ok_or_else(|| corrupt(format_args!("unknown error handling mode {}", code)))?;
        let format_name = read_str(&mut r)?;

        let track_count = r.read_u32::<LittleEndian>().map_err(read_err)? as usize;
        let mut tracks = Vec::new();
        for _ in 0..track_count {
            tracks.push(read_track(&mut r)?);
        }

        if remaining(&r) != 0 {
            return Err(corrupt(format_args!("{} trailing bytes", remaining(&r))));
        }

        Ok(Index {
            tracks,
            fingerprint: FileFingerprint { file_size, digest },
            error_handling,
            format_name,
            engine_version,
        })
    }

    /// Parse an index from `reader`, consuming it to the end.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Index> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(read_err)?;
        Self::deserialize(&data)
    }

    /// Read an index file written by [`Index::write_file`].
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Index> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            Error::open_failed(ErrorKind::Serialization, &path.display().to_string(), &e)
        })?;
        let index = Self::deserialize(&data)?;
        info!("Loaded index for {} tracks from {:?}", index.tracks.len(), path);
        Ok(index)
    }
}

fn write_entry<W: Write>(w: &mut W, e: &FrameEntry) -> std::io::Result<()> {
    let mut flags = 0;
    if e.keyframe {
        flags |= ENTRY_KEYFRAME;
    }
    if e.pts.is_some() {
        flags |= ENTRY_HAS_PTS;
    }
    if e.dts.is_some() {
        flags |= ENTRY_HAS_DTS;
    }
    if e.original_pts.is_some() {
        flags |= ENTRY_HAS_ORIGINAL_PTS;
    }
    w.write_u8(flags)?;
    w.write_i64::<LittleEndian>(e.pts.unwrap_or(0))?;
    w.write_i64::<LittleEndian>(e.dts.unwrap_or(0))?;
    w.write_i64::<LittleEndian>(e.original_pts.unwrap_or(0))?;
    w.write_i32::<LittleEndian>(e.repeat_pict)?;
    w.write_u64::<LittleEndian>(e.file_pos)?;
    w.write_u32::<LittleEndian>(e.size)?;
    w.write_u64::<LittleEndian>(e.sample_start)?;
    w.write_u32::<LittleEndian>(e.sample_count)?;
    w.write_u32::<LittleEndian>(e.original_pos)?;
    Ok(())
}

fn read_track(r: &mut Cursor<&[u8]>) -> Result<Track> {
    let code = r.read_i32::<LittleEndian>().map_err(read_err)?;
    let track_type =
        TrackType::from_code(code).ok_or_else(|| corrupt(format_args!("unknown track type {}", code)))?;
    let codec_name = read_str(r)?;
    let num = r.read_i64::<LittleEndian>().map_err(read_err)?;
    let den = r.read_i64::<LittleEndian>().map_err(read_err)?;
    let time_base = TrackTimeBase::new(num, den)
        .ok_or_else(|| corrupt(format_args!("invalid time base {}/{}", num, den)))?;
    let flags = r.read_u8().map_err(read_err)?;
    let last_duration = r.read_i64::<LittleEndian>().map_err(read_err)?;

    let count = r.read_u32::<LittleEndian>().map_err(read_err)? as usize;
    if count.saturating_mul(ENTRY_SIZE) > remaining(r) {
        return Err(Error::new(
            ErrorKind::Serialization,
            ErrorSubkind::AllocationFailed,
            format!(
                "Track claims {} entries but only {} bytes remain",
                count,
                remaining(r)
            ),
        ));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let flags = r.read_u8().map_err(read_err)?;
        let pts = r.read_i64::<LittleEndian>().map_err(read_err)?;
        let dts = r.read_i64::<LittleEndian>().map_err(read_err)?;
        let original_pts = r.read_i64::<LittleEndian>().map_err(read_err)?;
        entries.push(FrameEntry {
            keyframe: flags & ENTRY_KEYFRAME != 0,
            pts: (flags & ENTRY_HAS_PTS != 0).then_some(pts),
            dts: (flags & ENTRY_HAS_DTS != 0).then_some(dts),
            original_pts: (flags & ENTRY_HAS_ORIGINAL_PTS != 0).then_some(original_pts),
            repeat_pict: r.read_i32::<LittleEndian>().map_err(read_err)?,
            file_pos: r.read_u64::<LittleEndian>().map_err(read_err)?,
            size: r.read_u32::<LittleEndian>().map_err(read_err)?,
            sample_start: r.read_u64::<LittleEndian>().map_err(read_err)?,
            sample_count: r.read_u32::<LittleEndian>().map_err(read_err)?,
            original_pos: r.read_u32::<LittleEndian>().map_err(read_err)?,
        });
    }

    Ok(Track {
        track_type,
        codec_name,
        time_base,
        entries,
        use_dts: flags & TRACK_USE_DTS != 0,
        has_ts: flags & TRACK_HAS_TS != 0,
        last_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> Index {
        let mut video = Track::new(TrackType::Video, "h264", TrackTimeBase::new(1, 90000).unwrap());
        for (i, pts) in [0i64, 10800, 3600, 7200].iter().enumerate() {
            video.push(FrameEntry {
                pts: Some(*pts),
                original_pts: Some(*pts),
                dts: Some(i as i64 * 3600 - 3600),
                keyframe: i == 0,
                file_pos: 100 + i as u64 * 1000,
                size: 900,
                original_pos: i as u32,
                ..Default::default()
            });
        }
        video.last_duration = 3600;
        video.finalize();

        let mut audio = Track::new(TrackType::Audio, "aac", TrackTimeBase::new(1, 48000).unwrap());
        for i in 0..3 {
            audio.push(FrameEntry {
                pts: if i == 0 { None } else { Some(i * 1024) },
                keyframe: true,
                sample_count: 1024,
                original_pos: i as u32,
                ..Default::default()
            });
        }
        audio.finalize();

        let subs = Track::new(TrackType::Subtitle, "ass", TrackTimeBase::default());
        let mut index = Index::new(
            vec![video, audio, subs],
            FileFingerprint {
                file_size: 123456,
                digest: [0xab; 32],
            },
            ErrorHandling::StopTrack,
            "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
        );
        index.engine_version.minor = 7;
        index
    }

    #[test]
    fn test_roundtrip_is_identity() {
        let index = sample_index();
        let bytes = index.serialize();
        assert_eq!(&bytes[..4], b"AVIX");
        let parsed = Index::deserialize(&bytes).unwrap();
        assert_eq!(parsed, index);
        assert_eq!(parsed.serialize(), bytes);
    }

    #[test]
    fn test_writer_and_buffer_agree() {
        let index = sample_index();
        let mut out = Vec::new();
        index.write_to(&mut out).unwrap();
        assert_eq!(out, index.serialize().to_vec());
        let parsed = Index::read_from(&mut out.as_slice()).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_file_roundtrip() {
        let index = sample_index();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.avix");
        index.write_file(&path).unwrap();
        assert_eq!(Index::read_file(&path).unwrap(), index);
    }

    #[test]
    fn test_missing_file() {
        let err = Index::read_file("/nonexistent/dir/x.avix").unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::NoFile));
        let err = sample_index()
            .write_file("/nonexistent/dir/x.avix")
            .unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::FileWrite));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = sample_index().serialize().to_vec();
        bytes[4] = 0xff;
        let err = Index::deserialize(&bytes).unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::Version));

        let mut bytes = sample_index().serialize().to_vec();
        // engine major
        bytes[6] = bytes[6].wrapping_add(1);
        let err = Index::deserialize(&bytes).unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::Version));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        let err = Index::deserialize(b"NOPE and some more bytes").unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::FileRead));

        let bytes = sample_index().serialize();
        let err = Index::deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::FileRead));
    }

    #[test]
    fn test_oversized_entry_count() {
        let index = Index::new(
            vec![Track::new(TrackType::Video, "vp9", TrackTimeBase::default())],
            FileFingerprint::default(),
            ErrorHandling::Abort,
            "webm".to_string(),
        );
        let mut bytes = index.serialize().to_vec();
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Index::deserialize(&bytes).unwrap_err();
        assert!(err.is(ErrorKind::Serialization, ErrorSubkind::AllocationFailed));
    }

    #[test]
    fn test_long_names_are_cut_between_characters() {
        let index = Index::new(
            vec![Track::new(TrackType::Audio, "é".repeat(40_000), TrackTimeBase::default())],
            FileFingerprint::default(),
            ErrorHandling::Abort,
            "matroska,webm".to_string(),
        );
        let parsed = Index::deserialize(&index.serialize()).unwrap();
        let name = parsed.tracks()[0].codec_name();
        assert_eq!(name.len(), 65534);
        assert!(name.chars().all(|c| c == 'é'));
    }
}
