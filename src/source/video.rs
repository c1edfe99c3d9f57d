//! Frame-accurate video access
//!
//! A [`VideoSource`] owns its own demuxer and decoder. Frames are addressed
//! by presentation-order frame number; how the decoder is repositioned for a
//! request depends on the [`SeekMode`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use super::frame::{Frame, VideoProperties};
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::index::{Index, Track};
use crate::media::{
    ColorRange, DecodedPicture, Demuxer, Picture, PixelFormat, Resizer, ScaleRequest, Scaler,
    SeekMode, SeekTarget, StreamInfo, TrackType, VideoDecoder,
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputSettings {
    format: PixelFormat,
    width: u32,
    height: u32,
    resizer: Resizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct InputOverride {
    color_space: Option<i32>,
    color_range: Option<ColorRange>,
    pixel_format: Option<PixelFormat>,
}

pub struct VideoSource {
    engine: Engine,
    path: PathBuf,
    index: Arc<Index>,
    track: usize,
    stream: StreamInfo,
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn VideoDecoder>,
    seek_mode: SeekMode,
    seek_threshold: usize,
    max_seek_retries: usize,
    /// Frame number expected from the next decoded picture
    next_frame: usize,
    eof_sent: bool,
    /// Last picture handed out and its frame number
    last: Option<(usize, DecodedPicture)>,
    /// `last` after output conversion
    frame: Option<Frame>,
    output: Option<OutputSettings>,
    input: InputOverride,
    scaler: Option<(ScaleRequest, Box<dyn Scaler>)>,
    properties: VideoProperties,
}

impl VideoSource {
    /// Open video track `track` of `path`. `threads` of 0 uses the configured
    /// default.
    pub fn open<P: AsRef<Path>>(
        engine: &Engine,
        path: P,
        track: usize,
        index: Arc<Index>,
        threads: usize,
        seek_mode: SeekMode,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        index.belongs_to(&path)?;

        let entry = index.track(track).map_err(|e| {
            Error::new(ErrorKind::Track, ErrorSubkind::InvalidArgument, e.message)
        })?;
        if entry.track_type() != TrackType::Video {
            return Err(Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("Track {} is not a video track", track),
            ));
        }
        if entry.is_empty() {
            return Err(Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("Video track {} contains no frames", track),
            ));
        }

        let config = &engine.config().video;
        let threads = if threads > 0 {
            threads
        } else {
            config.effective_threads()
        };

        let demuxer = engine.backend().open(&path)?;
        let stream = demuxer
            .streams()
            .get(track)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Track,
                    ErrorSubkind::InvalidArgument,
                    format!("Track {} not found in {:?}", track, path),
                )
            })?;
        let decoder = demuxer.video_decoder(track, threads)?;

        let mut source = Self {
            engine: engine.clone(),
            path,
            index,
            track,
            stream,
            demuxer,
            decoder,
            seek_mode,
            seek_threshold: config.seek_threshold,
            max_seek_retries: config.max_seek_retries,
            next_frame: 0,
            eof_sent: false,
            last: None,
            frame: None,
            output: None,
            input: InputOverride::default(),
            scaler: None,
            properties: VideoProperties::default(),
        };

        // Streams cut mid-GOP drop their leading frames, so the first
        // picture out of the decoder is not necessarily frame 0
        let first = source.decode_next()?.ok_or_else(|| {
            Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                "The first frame could not be decoded",
            )
        })?;
        let f = source.identify(&first).unwrap_or(0);
        if f > 0 {
            debug!("Frames before {} of track {} are not decodable", f, track);
        }
        source.next_frame = f + 1;
        source.properties = source.build_properties(&first);
        source.last = Some((f, first));

        debug!(
            "Opened video track {} of {:?}: {} frames, {}x{}, seek mode {:?}, {} threads",
            track,
            source.path,
            source.properties.num_frames,
            source.stream.video.as_ref().map(|v| v.width).unwrap_or(0),
            source.stream.video.as_ref().map(|v| v.height).unwrap_or(0),
            seek_mode,
            threads
        );
        Ok(source)
    }

    /// [`VideoSource::open`] with the configured seek mode and thread count.
    pub fn open_with_defaults<P: AsRef<Path>>(
        engine: &Engine,
        path: P,
        track: usize,
        index: Arc<Index>,
    ) -> Result<Self> {
        let seek_mode = engine.config().video.seek_mode;
        Self::open(engine, path, track, index, 0, seek_mode)
    }

    pub fn properties(&self) -> &VideoProperties {
        &self.properties
    }

    pub fn track(&self) -> &Track {
        &self.index.tracks()[self.track]
    }

    pub fn seek_mode(&self) -> SeekMode {
        self.seek_mode
    }

    /// Decode frame `n` (presentation order).
    pub fn get_frame(&mut self, n: usize) -> Result<&Frame> {
        let count = self.track().frame_count() as usize;
        if n >= count {
            return Err(Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::InvalidArgument,
                format!("Frame {} is out of range (0..{})", n, count),
            ));
        }

        if !matches!(self.last, Some((last, _)) if last == n) {
            let picture = match self.seek_mode {
                SeekMode::LinearNoRewrite => {
                    if n < self.next_frame {
                        return Err(Error::new(
                            ErrorKind::Seeking,
                            ErrorSubkind::InvalidArgument,
                            format!(
                                "Frame {} is behind the decoder (at {}) and rewinding is disabled",
                                n, self.next_frame
                            ),
                        ));
                    }
                    self.decode_linear(n)?
                }
                SeekMode::Linear => {
                    if n < self.next_frame {
                        debug!("Restarting decode from the start for frame {}", n);
                        self.reposition(0)?;
                    }
                    self.decode_linear(n)?
                }
                _ => self.seek_and_decode(n)?,
            };
            self.last = Some((n, picture));
            self.frame = None;
        }

        self.current_frame()
    }

    /// Decode the frame whose presentation time is closest to `seconds`.
    pub fn get_frame_by_time(&mut self, seconds: f64) -> Result<&Frame> {
        let track = self.track();
        let pts = track.time_base().from_seconds(seconds);
        let n = track.closest_frame_from_pts(pts);
        self.get_frame(n)
    }

    /// Convert output to the first of `formats` the backend supports, scaled
    /// to `width` x `height`.
    pub fn set_output_format(
        &mut self,
        formats: &[PixelFormat],
        width: u32,
        height: u32,
        resizer: Resizer,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::new(
                ErrorKind::Scaling,
                ErrorSubkind::InvalidArgument,
                format!("Invalid output dimensions {}x{}", width, height),
            ));
        }
        let backend = self.engine.backend();
        let format = formats
            .iter()
            .copied()
            .find(|f| backend.supports_pixel_format(*f))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Scaling,
                    ErrorSubkind::InvalidArgument,
                    "No suitable output format found",
                )
            })?;

        let settings = OutputSettings {
            format,
            width,
            height,
            resizer,
        };
        if self.output == Some(settings) {
            return Ok(());
        }
        debug!(
            "Output format set to {} {}x{} ({:?})",
            format.name(),
            width,
            height,
            resizer
        );
        self.apply_conversion(Some(settings), self.input)
    }

    /// Hand out frames in the decoder's own format and size.
    pub fn reset_output_format(&mut self) {
        self.output = None;
        self.scaler = None;
        self.frame = None;
    }

    /// Override the colour description (and optionally the pixel format) the
    /// decoder reports for its pictures.
    pub fn set_input_format(
        &mut self,
        color_space: i32,
        color_range: ColorRange,
        pixel_format: Option<PixelFormat>,
    ) -> Result<()> {
        if let Some(format) = pixel_format {
            if !self.engine.backend().supports_pixel_format(format) {
                return Err(Error::new(
                    ErrorKind::Scaling,
                    ErrorSubkind::InvalidArgument,
                    format!("Unsupported input format {}", format.name()),
                ));
            }
        }
        let input = InputOverride {
            color_space: Some(color_space),
            color_range: Some(color_range),
            pixel_format,
        };
        self.apply_conversion(self.output, input)
    }

    pub fn reset_input_format(&mut self) {
        self.input = InputOverride::default();
        self.scaler = None;
        self.frame = None;
    }

    fn current_frame(&mut self) -> Result<&Frame> {
        if let Some(frame) = self.frame.take() {
            return Ok(&*self.frame.insert(frame));
        }
        let Some((n, picture)) = self.last.take() else {
            return Err(Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::Unknown,
                "No frame has been decoded",
            ));
        };
        let pts = self.track().entries()[n].pts;
        let converted = self
            .convert(&picture)
            .map(|output| Frame::new(&picture, pts, output));
        self.last = Some((n, picture));

        let mut frame = converted?;
        if let Some(space) = self.input.color_space {
            frame.color.color_space = space;
        }
        if let Some(range) = self.input.color_range {
            frame.color.color_range = range;
        }
        Ok(&*self.frame.insert(frame))
    }

    /// Re-run conversion of the current frame, restoring the previous
    /// settings if it fails.
    fn apply_conversion(&mut self, output: Option<OutputSettings>, input: InputOverride) -> Result<()> {
        let previous = (self.output, self.input);
        self.output = output;
        self.input = input;
        self.scaler = None;
        self.frame = None;
        if self.last.is_none() {
            return Ok(());
        }
        let converted = self.current_frame().map(|_| ());
        if let Err(e) = converted {
            (self.output, self.input) = previous;
            self.scaler = None;
            self.frame = None;
            return Err(e);
        }
        Ok(())
    }

    fn convert(&mut self, decoded: &DecodedPicture) -> Result<Picture> {
        let mut source = decoded.picture.clone();
        if let Some(format) = self.input.pixel_format {
            if format.plane_count() != source.format.plane_count() {
                return Err(Error::new(
                    ErrorKind::Scaling,
                    ErrorSubkind::InvalidArgument,
                    format!(
                        "Can't reinterpret {} as {}",
                        source.format.name(),
                        format.name()
                    ),
                ));
            }
            source.format = format;
        }

        let Some(out) = self.output else {
            return Ok(source);
        };
        if out.format == source.format && out.width == source.width && out.height == source.height {
            return Ok(source);
        }

        let request = ScaleRequest {
            source_format: source.format,
            source_width: source.width,
            source_height: source.height,
            target_format: out.format,
            target_width: out.width,
            target_height: out.height,
            resizer: out.resizer,
            color_space: self.input.color_space.unwrap_or(decoded.color.color_space),
            color_range: self.input.color_range.unwrap_or(decoded.color.color_range),
        };
        let rebuild = match &self.scaler {
            Some((current, _)) => current != &request,
            None => true,
        };
        if rebuild {
            let scaler = self.engine.backend().scaler(&request)?;
            self.scaler = Some((request, scaler));
        }
        match self.scaler.as_mut() {
            Some((_, scaler)) => scaler.scale(&source),
            None => Ok(source),
        }
    }

    /// Next picture out of the decoder, feeding packets as needed.
    fn decode_next(&mut self) -> Result<Option<DecodedPicture>> {
        loop {
            if let Some(picture) = self.decoder.receive_picture()? {
                return Ok(Some(picture));
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.demuxer.read_packet()? {
                Some(packet) if packet.stream == self.track => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        debug!("Skipping undecodable packet at {:?}: {}", packet.pos, e);
                    }
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
            }
        }
    }

    /// Frame number of a decoded picture, by PTS when the index knows it.
    fn identify(&self, picture: &DecodedPicture) -> Option<usize> {
        picture
            .pts
            .and_then(|pts| self.track().frame_from_pts(pts))
    }

    /// Decode forward until frame `n`. `Ok(None)` means the decoder
    /// produced a later frame without producing `n`.
    fn decode_until(&mut self, n: usize) -> Result<Option<DecodedPicture>> {
        loop {
            let picture = self.decode_next()?.ok_or_else(|| {
                Error::new(
                    ErrorKind::Decoding,
                    ErrorSubkind::Unknown,
                    format!("Reached end of stream before frame {}", n),
                )
            })?;
            let f = self.identify(&picture).unwrap_or(self.next_frame);
            self.next_frame = f + 1;
            trace!("Decoded frame {} while looking for {}", f, n);
            match f.cmp(&n) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(picture)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
    }

    fn decode_linear(&mut self, n: usize) -> Result<DecodedPicture> {
        self.decode_until(n)?.ok_or_else(|| {
            Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::Unknown,
                format!("Frame {} was skipped by the decoder", n),
            )
        })
    }

    /// Point the demuxer at the timestamp of `frame` and reset the decoder.
    fn reposition(&mut self, frame: usize) -> Result<()> {
        let target = match self.track().entries()[frame].pts {
            Some(pts) if frame > 0 => SeekTarget::Timestamp(pts),
            _ => SeekTarget::Start,
        };
        self.demuxer.seek(self.track, target)?;
        self.decoder.flush();
        self.eof_sent = false;
        self.next_frame = frame;
        self.last = None;
        self.frame = None;
        Ok(())
    }

    fn seek_and_decode(&mut self, n: usize) -> Result<DecodedPicture> {
        let keyframe = self.track().find_closest_keyframe(n);
        let far_ahead = n > self.next_frame + self.seek_threshold;
        let needs_seek = n < self.next_frame
            || (far_ahead && keyframe > self.next_frame)
            || (far_ahead && self.seek_mode == SeekMode::Aggressive);

        if !needs_seek {
            if let Some(picture) = self.decode_until(n)? {
                return Ok(picture);
            }
            debug!("Frame {} was skipped while decoding forward, seeking", n);
        }

        let mut seek_frame = keyframe;
        let mut direct = self.seek_mode == SeekMode::Aggressive;
        for attempt in 0..=self.max_seek_retries {
            let target = if direct { n } else { seek_frame };
            direct = false;
            debug!(
                "Seek attempt {} for frame {}: seeking to frame {}",
                attempt, n, target
            );
            self.reposition(target)?;

            let Some(picture) = self.decode_next()? else {
                seek_frame = self.earlier_keyframe(seek_frame);
                continue;
            };
            let landed = match self.identify(&picture) {
                Some(f) => f,
                None if target == 0 => 0,
                None if self.seek_mode != SeekMode::Normal => {
                    let guess = self.track().find_closest_keyframe(target);
                    debug!("Unidentified frame after seek, assuming frame {}", guess);
                    guess
                }
                None => {
                    debug!("Unidentified frame after seek to frame {}, retrying", target);
                    seek_frame = self.earlier_keyframe(seek_frame);
                    continue;
                }
            };
            if landed > n {
                debug!("Seek landed on frame {} past {}, retrying", landed, n);
                seek_frame = self.earlier_keyframe(seek_frame);
                continue;
            }

            self.next_frame = landed + 1;
            if landed == n {
                return Ok(picture);
            }
            match self.decode_until(n)? {
                Some(picture) => return Ok(picture),
                None => seek_frame = self.earlier_keyframe(seek_frame),
            }
        }

        Err(Error::new(
            ErrorKind::Seeking,
            ErrorSubkind::Unknown,
            format!(
                "Frame {} could not be reached after {} seek attempts",
                n,
                self.max_seek_retries + 1
            ),
        ))
    }

    fn earlier_keyframe(&self, frame: usize) -> usize {
        self.track().previous_keyframe(frame).unwrap_or(0)
    }

    fn build_properties(&self, first: &DecodedPicture) -> VideoProperties {
        let track = self.track();
        let frames = track.frame_count() as usize;
        let tb = track.time_base();

        let (fps_numerator, fps_denominator) = match self.stream.frame_rate {
            Some((num, den)) if num > 0 && den > 0 => (num as i64, den as i64),
            _ => {
                let entries = track.entries();
                let first_pts = entries.first().and_then(|e| e.pts).unwrap_or(0);
                let last_pts = entries.last().and_then(|e| e.pts).unwrap_or(0);
                if frames > 1 && last_pts > first_pts {
                    (tb.den * (frames as i64 - 1), tb.num * (last_pts - first_pts))
                } else {
                    (30, 1)
                }
            }
        };
        let (fps_numerator, fps_denominator) = reduce(fps_numerator, fps_denominator);

        let fields: i64 = track
            .entries()
            .iter()
            .map(|e| 2 + e.repeat_pict.max(0) as i64)
            .sum();
        let (rff_numerator, rff_denominator) = reduce(
            fps_numerator as i64 * fields,
            fps_denominator as i64 * 2 * frames as i64,
        );

        let video = self.stream.video.as_ref();
        let (sar_num, sar_den) = video.map(|v| v.sample_aspect_ratio).unwrap_or((0, 1));

        VideoProperties {
            fps_numerator,
            fps_denominator,
            rff_numerator,
            rff_denominator,
            num_frames: frames,
            sar_num,
            sar_den,
            crop_top: 0,
            crop_bottom: 0,
            crop_left: 0,
            crop_right: 0,
            top_field_first: first.top_field_first,
            first_time: track.first_time(),
            last_time: track.last_time(),
            last_end_time: track.last_end_time(),
            rotation: video.map(|v| v.rotation).unwrap_or(0),
            flip: video.map(|v| v.flip).unwrap_or(0),
            hdr: first.hdr,
        }
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

/// Reduce a ratio and clamp it into `i32`.
fn reduce(num: i64, den: i64) -> (i32, i32) {
    if num <= 0 || den <= 0 {
        return (0, 1);
    }
    let g = gcd(num, den);
    let (mut num, mut den) = (num / g, den / g);
    while num > i32::MAX as i64 || den > i32::MAX as i64 {
        num /= 2;
        den /= 2;
    }
    (num as i32, den.max(1) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce() {
        assert_eq!(reduce(25 * 249, 249), (25, 1));
        assert_eq!(reduce(30000, 1001), (30000, 1001));
        assert_eq!(reduce(0, 5), (0, 1));
        let (n, d) = reduce(i64::MAX / 3, 7);
        assert!(n > 0 && d > 0);
    }
}
