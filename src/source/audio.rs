//! Sample-accurate audio access
//!
//! Samples are addressed in the output sample space: sample 0 is the first
//! sample after the delay shift. Each index entry's decoded output is
//! converted once and kept in an LRU cache keyed by packet number.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, trace, warn};

use super::resample::{AudioProperties, ResampleOptions};
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::index::{Index, Track};
use crate::media::{
    channel, AudioBlock, AudioDecoder, AudioFormat, DelayMode, Demuxer, Packet, Resampler,
    SeekTarget, StreamInfo, TrackType,
};

pub struct AudioSource {
    engine: Engine,
    path: PathBuf,
    index: Arc<Index>,
    track: usize,
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn AudioDecoder>,
    /// Format the decoder produces
    native: AudioFormat,
    options: ResampleOptions,
    output: AudioFormat,
    resampler: Option<Box<dyn Resampler>>,
    /// Converted samples past the end of the last decoded packet
    carry: Vec<u8>,
    /// Converted output of each packet
    cache: LruCache<usize, Arc<Vec<u8>>>,
    /// Leading silence in samples; negative values trim the track start
    delay: i64,
    /// Packet whose output the decoder produces next
    next_packet: usize,
    /// First packet whose output can be trusted after the last seek
    trusted_from: usize,
    /// Packet read while resynchronizing after a seek
    pending: Option<Packet>,
    eof_sent: bool,
    preroll_packets: usize,
    properties: AudioProperties,
}

impl AudioSource {
    pub fn open<P: AsRef<Path>>(
        engine: &Engine,
        path: P,
        track: usize,
        index: Arc<Index>,
        delay_mode: DelayMode,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        index.belongs_to(&path)?;

        let entry = index.track(track).map_err(|e| {
            Error::new(ErrorKind::Track, ErrorSubkind::InvalidArgument, e.message)
        })?;
        if entry.track_type() != TrackType::Audio {
            return Err(Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("Track {} is not an audio track", track),
            ));
        }
        if entry.sample_count() == 0 {
            return Err(Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("Audio track {} contains no samples", track),
            ));
        }

        let demuxer = engine.backend().open(&path)?;
        let stream = demuxer.streams().get(track).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("Track {} not found in {:?}", track, path),
            )
        })?;
        let decoder = demuxer.audio_decoder(track)?;

        let mut native = decoder.format();
        if native.channel_layout == 0 {
            native.channel_layout = channel::default_layout(native.channels);
        }
        let delay = compute_delay(&index, entry, native.sample_rate, delay_mode)?;

        let config = &engine.config().audio;
        let capacity = NonZeroUsize::new(config.cache_blocks.max(1)).unwrap_or(NonZeroUsize::MIN);
        let options = ResampleOptions::for_format(&native);
        let output = options.output_format();
        let properties = build_properties(entry, &stream, &output, delay);

        debug!(
            "Opened audio track {} of {:?}: {} Hz, {} channels, {} samples, delay {} ({:?})",
            track,
            path,
            native.sample_rate,
            native.channels,
            properties.num_samples,
            delay,
            delay_mode
        );

        Ok(Self {
            engine: engine.clone(),
            path,
            index,
            track,
            demuxer,
            decoder,
            native,
            options,
            output,
            resampler: None,
            carry: Vec::new(),
            cache: LruCache::new(capacity),
            delay,
            next_packet: 0,
            trusted_from: 0,
            pending: None,
            eof_sent: false,
            preroll_packets: config.preroll_packets,
            properties,
        })
    }

    /// [`AudioSource::open`] with the configured delay mode.
    pub fn open_with_defaults<P: AsRef<Path>>(
        engine: &Engine,
        path: P,
        track: usize,
        index: Arc<Index>,
    ) -> Result<Self> {
        let delay_mode = engine.config().audio.delay_mode;
        Self::open(engine, path, track, index, delay_mode)
    }

    pub fn properties(&self) -> &AudioProperties {
        &self.properties
    }

    pub fn track(&self) -> &Track {
        &self.index.tracks()[self.track]
    }

    /// Delay applied to the track, in samples.
    pub fn delay(&self) -> i64 {
        self.delay
    }

    /// The current output settings; at open these describe the native format.
    pub fn resample_options(&self) -> ResampleOptions {
        self.options.clone()
    }

    /// Convert all further output according to `options`.
    pub fn set_output_format(&mut self, options: &ResampleOptions) -> Result<()> {
        if options.sample_rate != self.native.sample_rate {
            return Err(Error::new(
                ErrorKind::Resampling,
                ErrorSubkind::Unsupported,
                format!(
                    "Changing the sample rate ({} -> {}) is not supported",
                    self.native.sample_rate, options.sample_rate
                ),
            ));
        }
        if channel::count(options.channel_layout) == 0 {
            return Err(Error::new(
                ErrorKind::Resampling,
                ErrorSubkind::InvalidArgument,
                "Empty channel layout",
            ));
        }

        let resampler = if options.is_passthrough(&self.native) {
            None
        } else {
            Some(self.engine.backend().resampler(&self.native, options)?)
        };

        self.resampler = resampler;
        self.options = options.clone();
        self.output = options.output_format();
        self.cache.clear();
        self.carry.clear();
        self.properties.sample_format = self.output.sample_format;
        self.properties.bits_per_sample = self.output.sample_format.bits_per_sample();
        self.properties.channels = self.output.channels;
        self.properties.channel_layout = self.output.channel_layout;
        debug!(
            "Audio output set to {:?}, {} channels",
            self.output.sample_format, self.output.channels
        );
        Ok(())
    }

    /// Fill `buf` with `count` interleaved samples starting at `start`.
    pub fn get_audio(&mut self, buf: &mut [u8], start: i64, count: i64) -> Result<()> {
        let num_samples = self.properties.num_samples as i64;
        if start < 0 || count < 0 || start.saturating_add(count) > num_samples {
            return Err(Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::InvalidArgument,
                format!(
                    "Samples {}..{} are out of range (0..{})",
                    start,
                    start.saturating_add(count),
                    num_samples
                ),
            ));
        }
        let frame_bytes = self.output.frame_bytes();
        let needed = count as usize * frame_bytes;
        if buf.len() < needed {
            return Err(Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::InvalidArgument,
                format!("Buffer of {} bytes can't hold {} bytes", buf.len(), needed),
            ));
        }

        let mut out = &mut buf[..needed];
        let mut pos = start;
        let mut remaining = count;

        if pos < self.delay {
            let silent = remaining.min(self.delay - pos);
            let (head, tail) = std::mem::take(&mut out).split_at_mut(silent as usize * frame_bytes);
            head.fill(0);
            out = tail;
            pos += silent;
            remaining -= silent;
        }

        while remaining > 0 {
            let sample = (pos - self.delay) as u64;
            let packet = self.track().packet_for_sample(sample).ok_or_else(|| {
                Error::new(
                    ErrorKind::Decoding,
                    ErrorSubkind::Unknown,
                    format!("No packet holds sample {}", sample),
                )
            })?;
            let entry = self.track().entries()[packet];
            let block = self.block(packet)?;

            let offset = (sample - entry.sample_start) as usize;
            let take = (remaining as usize).min(entry.sample_count as usize - offset);
            let src = &block[offset * frame_bytes..(offset + take) * frame_bytes];
            let (head, tail) = std::mem::take(&mut out).split_at_mut(take * frame_bytes);
            head.copy_from_slice(src);
            out = tail;
            pos += take as i64;
            remaining -= take as i64;
        }
        Ok(())
    }

    /// Converted output of packet `k`, decoding it if needed.
    fn block(&mut self, k: usize) -> Result<Arc<Vec<u8>>> {
        if let Some(block) = self.cache.get(&k) {
            return Ok(block.clone());
        }

        if k < self.next_packet || k > self.next_packet + self.preroll_packets {
            self.seek_to(k)?;
        }

        loop {
            let current = self.next_packet;
            let data = Arc::new(self.decode_packet(current)?);
            self.next_packet += 1;
            if current >= self.trusted_from {
                self.cache.put(current, data.clone());
            }
            if current == k {
                return Ok(data);
            }
        }
    }

    fn seek_to(&mut self, k: usize) -> Result<()> {
        let start = k.saturating_sub(self.preroll_packets);
        self.decoder.flush();
        self.eof_sent = false;
        self.pending = None;
        self.carry.clear();
        if self.resampler.is_some() {
            self.resampler = Some(self.engine.backend().resampler(&self.native, &self.options)?);
        }

        if start > 0 {
            let entry = self.track().entries()[start];
            let target = match entry.pts {
                Some(pts) => SeekTarget::Timestamp(pts),
                None => SeekTarget::Byte(entry.file_pos),
            };
            debug!("Audio seek for packet {} to packet {} ({:?})", k, start, target);
            match self.demuxer.seek(self.track, target) {
                Ok(()) => {
                    if let Some((landed, packet)) = self.resync()? {
                        if landed <= k {
                            self.next_packet = landed;
                            self.trusted_from = if landed == 0 { 0 } else { k };
                            self.pending = Some(packet);
                            return Ok(());
                        }
                    }
                    debug!("Audio seek for packet {} missed, decoding from the start", k);
                }
                Err(e) => warn!("Audio seek failed, decoding from the start: {}", e),
            }
            self.decoder.flush();
        }

        self.demuxer.seek(self.track, SeekTarget::Start)?;
        self.next_packet = 0;
        self.trusted_from = 0;
        self.pending = None;
        Ok(())
    }

    /// Find the index position of the first packet read after a seek.
    fn resync(&mut self) -> Result<Option<(usize, Packet)>> {
        let Some(packet) = self.read_track_packet()? else {
            return Ok(None);
        };
        let entries = self.track().entries();
        let landed = entries.iter().position(|e| match (packet.pos, packet.pts) {
            (Some(pos), _) if pos > 0 && e.file_pos == pos => true,
            (_, Some(pts)) => e.original_pts == Some(pts),
            _ => false,
        });
        Ok(landed.map(|i| (i, packet)))
    }

    fn read_track_packet(&mut self) -> Result<Option<Packet>> {
        if let Some(packet) = self.pending.take() {
            return Ok(Some(packet));
        }
        while let Some(packet) = self.demuxer.read_packet()? {
            if packet.stream == self.track {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    /// Feed packet `k` and return exactly its share of converted samples.
    fn decode_packet(&mut self, k: usize) -> Result<Vec<u8>> {
        let track = &self.index.tracks()[self.track];
        let expected = track.entries()[k].sample_count as usize;
        let is_last = k + 1 == track.packet_count();
        let mut blocks = Vec::new();

        match self.read_track_packet()? {
            Some(packet) if !self.eof_sent => {
                if let Err(e) = self.decoder.send_packet(&packet) {
                    warn!("Audio packet {} failed to decode, using silence: {}", k, e);
                }
                self.receive_all(&mut blocks)?;
                if is_last {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                    self.receive_all(&mut blocks)?;
                }
            }
            _ => {
                if !self.eof_sent {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                    self.receive_all(&mut blocks)?;
                }
            }
        }

        let frame_bytes = self.output.frame_bytes();
        let wanted = expected * frame_bytes;
        let mut data = std::mem::take(&mut self.carry);
        data.reserve(wanted.saturating_sub(data.len()));
        for block in &blocks {
            let converted = match self.resampler.as_mut() {
                Some(resampler) => resampler.convert(block)?,
                None => block.interleaved(),
            };
            append_block(&mut data, &converted, frame_bytes);
        }
        if let Some(resampler) = self.resampler.as_mut() {
            while data.len() < wanted {
                match resampler.drain()? {
                    Some(block) => append_block(&mut data, &block, frame_bytes),
                    None => break,
                }
            }
        }

        let decoded = data.len() / frame_bytes;
        if decoded != expected {
            trace!(
                "Packet {} decoded to {} samples, index says {}",
                k,
                decoded,
                expected
            );
        }
        if data.len() > wanted && !is_last {
            self.carry = data.split_off(wanted);
        }
        data.resize(wanted, 0);
        Ok(data)
    }

    fn receive_all(&mut self, blocks: &mut Vec<AudioBlock>) -> Result<()> {
        loop {
            match self.decoder.receive_block() {
                Ok(Some(block)) => blocks.push(block),
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("Audio decoder error on {:?}: {}", self.path, e);
                    return Ok(());
                }
            }
        }
    }
}

fn append_block(data: &mut Vec<u8>, block: &AudioBlock, frame_bytes: usize) {
    if let Some(plane) = block.planes.first() {
        let len = (block.samples * frame_bytes).min(plane.len());
        data.extend_from_slice(&plane[..len]);
    }
}

/// Samples of silence to put before the first decoded sample.
fn compute_delay(index: &Index, track: &Track, sample_rate: u32, mode: DelayMode) -> Result<i64> {
    if mode == DelayMode::NoShift {
        return Ok(0);
    }
    let rate = sample_rate as f64;
    let Some((first, pts)) = track
        .entries()
        .iter()
        .enumerate()
        .find_map(|(i, e)| e.pts.map(|pts| (i, pts)))
    else {
        return Ok(0);
    };

    let mut delay = (track.time_base().to_seconds(pts) * rate).round() as i64
        - track.entries()[first].sample_start as i64;

    let reference = match mode {
        DelayMode::FirstVideoTrack => index.first_indexed_track_of_type(TrackType::Video).ok(),
        DelayMode::Track(n) => {
            let valid = index
                .track(n)
                .map(|t| t.track_type() == TrackType::Video && !t.is_empty())
                .unwrap_or(false);
            if !valid {
                return Err(Error::new(
                    ErrorKind::Track,
                    ErrorSubkind::InvalidArgument,
                    format!("Delay track {} is not an indexed video track", n),
                ));
            }
            Some(n)
        }
        _ => None,
    };
    if let Some(n) = reference {
        let video = &index.tracks()[n];
        delay -= (video.first_time() * rate).round() as i64;
    }
    Ok(delay)
}

fn build_properties(
    track: &Track,
    stream: &StreamInfo,
    output: &AudioFormat,
    delay: i64,
) -> AudioProperties {
    let num_samples = (track.sample_count() as i64 + delay).max(0) as u64;
    let last_samples = track.entries().last().map(|e| e.sample_count).unwrap_or(0);
    let last_time = track.last_time();
    let bits_per_sample = stream
        .audio
        .as_ref()
        .map(|a| a.bits_per_sample)
        .filter(|&b| b > 0)
        .unwrap_or_else(|| output.sample_format.bits_per_sample());

    AudioProperties {
        sample_format: output.sample_format,
        sample_rate: output.sample_rate,
        bits_per_sample,
        channels: output.channels,
        channel_layout: output.channel_layout,
        num_samples,
        first_time: track.first_time(),
        last_time,
        last_end_time: last_time + last_samples as f64 / output.sample_rate.max(1) as f64,
    }
}
