//! Single-pass container scanner that builds an [`Index`].

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{FileFingerprint, FrameEntry, Index, Track};
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{AudioDecoder, Demuxer, ErrorHandling, Packet, TrackType};

/// Called once per packet with (bytes read, file size). A negative return
/// cancels indexing.
pub type ProgressCallback = Box<dyn FnMut(u64, u64) -> i32 + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    Disabled,
    Active,
    Stopped,
}

/// Per-audio-track sample counter.
struct SampleCounter {
    decoder: Box<dyn AudioDecoder>,
    last_count: u32,
}

impl SampleCounter {
    fn count(&mut self, packet: &Packet) -> Result<u32> {
        if packet.corrupt {
            return Err(Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                "corrupt packet",
            ));
        }
        self.decoder.send_packet(packet)?;
        let mut samples = 0usize;
        while let Some(block) = self.decoder.receive_block()? {
            samples += block.samples;
        }
        Ok(samples as u32)
    }

    fn drain(&mut self) -> Result<u32> {
        self.decoder.send_eof()?;
        let mut samples = 0usize;
        while let Some(block) = self.decoder.receive_block()? {
            samples += block.samples;
        }
        Ok(samples as u32)
    }
}

pub struct Indexer {
    engine: Engine,
    path: PathBuf,
    demuxer: Box<dyn Demuxer>,
    enabled: Vec<bool>,
    progress: Option<ProgressCallback>,
}

impl Indexer {
    /// Open `path` for indexing.
    pub fn open<P: AsRef<Path>>(engine: &Engine, path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::metadata(&path)
            .map_err(|e| Error::open_failed(ErrorKind::Parser, &path.display().to_string(), &e))?;

        let demuxer = engine.backend().open(&path)?;
        let config = &engine.config().indexing;
        let enabled = demuxer
            .streams()
            .iter()
            .map(|s| match s.track_type {
                TrackType::Video => config.index_video,
                TrackType::Audio => config.index_audio,
                _ => false,
            })
            .collect();

        debug!(
            "Opened {:?} for indexing: format={}, {} tracks",
            path,
            demuxer.format_name(),
            demuxer.streams().len()
        );

        Ok(Self {
            engine: engine.clone(),
            path,
            demuxer,
            enabled,
            progress: None,
        })
    }

    pub fn track_count(&self) -> usize {
        self.demuxer.streams().len()
    }

    pub fn track_type(&self, track: usize) -> Result<TrackType> {
        self.check_track(track)?;
        Ok(self.demuxer.streams()[track].track_type)
    }

    pub fn codec_name(&self, track: usize) -> Result<&str> {
        self.check_track(track)?;
        Ok(&self.demuxer.streams()[track].codec_name)
    }

    pub fn format_name(&self) -> &str {
        self.demuxer.format_name()
    }

    /// Enable or disable indexing of one track.
    pub fn track_index_settings(&mut self, track: usize, enabled: bool) -> Result<()> {
        self.check_track(track)?;
        self.enabled[track] = enabled;
        Ok(())
    }

    /// Enable or disable indexing of every track of `track_type`.
    pub fn track_type_index_settings(&mut self, track_type: TrackType, enabled: bool) {
        for (i, stream) in self.demuxer.streams().iter().enumerate() {
            if stream.track_type == track_type {
                self.enabled[i] = enabled;
            }
        }
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u64, u64) -> i32 + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    fn check_track(&self, track: usize) -> Result<()> {
        if track >= self.enabled.len() {
            return Err(Error::new(
                ErrorKind::Indexing,
                ErrorSubkind::InvalidArgument,
                format!("Track {} is out of range (0..{})", track, self.enabled.len()),
            ));
        }
        Ok(())
    }

    /// Scan the whole file. Consumes the indexer.
    pub fn index(mut self, error_handling: ErrorHandling) -> Result<Index> {
        let fingerprint = FileFingerprint::compute(&self.path)?;
        let streams = self.demuxer.streams().to_vec();
        let total = self.demuxer.file_size();

        info!(
            "Indexing {:?} ({} bytes, {} tracks, policy {:?})",
            self.path,
            total,
            streams.len(),
            error_handling
        );

        let mut tracks: Vec<Track> = streams
            .iter()
            .map(|s| Track::new(s.track_type, s.codec_name.clone(), s.time_base))
            .collect();
        let mut states = vec![TrackState::Disabled; streams.len()];
        let mut counters: Vec<Option<SampleCounter>> = Vec::with_capacity(streams.len());

        for (i, stream) in streams.iter().enumerate() {
            let mut counter = None;
            if self.enabled[i] {
                match stream.track_type {
                    TrackType::Video => {
                        self.demuxer.set_parsing(i, true);
                        states[i] = TrackState::Active;
                    }
                    TrackType::Audio => {
                        let decoder = self.demuxer.audio_decoder(i).map_err(|e| {
                            Error::new(
                                ErrorKind::Indexing,
                                ErrorSubkind::Codec,
                                format!("Can't open audio decoder for track {}: {}", i, e.message),
                            )
                        })?;
                        counter = Some(SampleCounter {
                            decoder,
                            last_count: 0,
                        });
                        states[i] = TrackState::Active;
                    }
                    _ => debug!("Track {} ({}) is not indexable", i, stream.track_type.name()),
                }
            }
            counters.push(counter);
        }

        let mut current = 0u64;
        loop {
            let packet = match self.demuxer.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    warn!("Read error at byte {}, treating as end of file: {}", current, e);
                    break;
                }
            };

            if let Some(pos) = packet.pos {
                current = pos;
            }
            if let Some(progress) = self.progress.as_mut() {
                if progress(current, total) < 0 {
                    info!("Indexing of {:?} cancelled at byte {}", self.path, current);
                    return Err(Error::cancelled());
                }
            }

            let i = packet.stream;
            if i >= tracks.len() || states[i] != TrackState::Active {
                continue;
            }

            let track = &mut tracks[i];
            let mut entry = FrameEntry {
                pts: packet.pts,
                original_pts: packet.pts,
                dts: packet.dts,
                keyframe: packet.keyframe,
                repeat_pict: packet.repeat_pict,
                file_pos: packet.pos.unwrap_or(current),
                size: packet.size() as u32,
                original_pos: track.entries.len() as u32,
                ..Default::default()
            };

            match counters[i].as_mut() {
                Some(counter) => match counter.count(&packet) {
                    Ok(samples) => {
                        counter.last_count = samples;
                        entry.sample_count = samples;
                    }
                    Err(e) => {
                        if !unit_failed(error_handling, i, track, &mut states[i], &e)? {
                            counters[i] = None;
                            continue;
                        }
                        entry.sample_count = counter.last_count;
                    }
                },
                None if packet.corrupt => {
                    let e = Error::new(ErrorKind::Decoding, ErrorSubkind::Codec, "corrupt packet");
                    if !unit_failed(error_handling, i, track, &mut states[i], &e)? {
                        continue;
                    }
                }
                None => {}
            }

            // Audio decoders may hold the first packets back
            entry.keyframe |= track.track_type == TrackType::Audio;
            track.last_duration = packet.duration;
            track.push(entry);
        }

        for (i, counter) in counters.iter_mut().enumerate() {
            let Some(counter) = counter else { continue };
            if states[i] != TrackState::Active {
                continue;
            }
            match counter.drain() {
                Ok(0) => {}
                Ok(samples) => {
                    if let Some(last) = tracks[i].entries.last_mut() {
                        last.sample_count += samples;
                    }
                }
                Err(e) => warn!("Track {}: failed to drain audio decoder: {}", i, e),
            }
        }

        for track in &mut tracks {
            track.finalize();
        }

        for (i, track) in tracks.iter().enumerate() {
            if states[i] != TrackState::Disabled {
                debug!(
                    "Track {} ({} {}): {} packets, {} frames",
                    i,
                    track.track_type.name(),
                    track.codec_name,
                    track.packet_count(),
                    track.frame_count()
                );
            }
        }
        info!(
            "Indexed {:?}: format={}, tracks={}, backend={}",
            self.path,
            self.demuxer.format_name(),
            tracks.len(),
            self.engine.backend().name()
        );

        Ok(Index::new(
            tracks,
            fingerprint,
            error_handling,
            self.demuxer.format_name().to_string(),
        ))
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("path", &self.path)
            .field("format", &self.demuxer.format_name())
            .field("enabled", &self.enabled)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Apply the error policy to a failed unit. `Ok(true)` means record the unit
/// anyway.
fn unit_failed(
    policy: ErrorHandling,
    index: usize,
    track: &mut Track,
    state: &mut TrackState,
    err: &Error,
) -> Result<bool> {
    match policy {
        ErrorHandling::Abort => Err(Error::new(
            ErrorKind::Indexing,
            ErrorSubkind::Codec,
            format!(
                "Track {} packet {}: {}",
                index,
                track.entries.len(),
                err.message
            ),
        )),
        ErrorHandling::ClearTrack => {
            warn!("Track {}: {}; clearing track", index, err.message);
            track.clear();
            *state = TrackState::Stopped;
            Ok(false)
        }
        ErrorHandling::StopTrack => {
            warn!(
                "Track {}: {}; keeping the first {} packets",
                index,
                err.message,
                track.entries.len()
            );
            *state = TrackState::Stopped;
            Ok(false)
        }
        ErrorHandling::Ignore => {
            warn!("Track {}: {}; ignored", index, err.message);
            Ok(true)
        }
    }
}
