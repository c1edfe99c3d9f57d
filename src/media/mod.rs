//! Media backend seam
//!
//! The engine never talks to a demuxer, decoder, scaler or resampler
//! directly. It goes through the traits in this module:
//! - [`MediaBackend`] opens files and builds conversion contexts
//! - [`Demuxer`] iterates packets and seeks
//! - [`VideoDecoder`] / [`AudioDecoder`] turn packets into pictures and samples
//! - [`Scaler`] / [`Resampler`] convert decoded output
//!
//! The FFmpeg implementation lives in `crate::ffmpeg`.

pub mod types;

use std::path::Path;

use crate::error::Result;
use crate::index::TrackTimeBase;
use crate::source::ResampleOptions;

pub use types::*;

/// Static description of one stream as reported by the demuxer.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Zero-based index of this stream in the container
    pub index: usize,
    pub track_type: TrackType,
    pub codec_name: String,
    pub time_base: TrackTimeBase,
    /// First timestamp of the stream in `time_base` units, if known
    pub start_time: Option<i64>,
    /// Average frame rate (num, den), video only
    pub frame_rate: Option<(i32, i32)>,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: Option<PixelFormat>,
    /// Sample aspect ratio (num, den); (0, 1) when unknown
    pub sample_aspect_ratio: (i32, i32),
    /// Display rotation in degrees
    pub rotation: i32,
    /// Non-zero when the display matrix mirrors the picture
    pub flip: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u64,
    pub sample_format: Option<SampleFormat>,
    pub bits_per_sample: u32,
}

/// One coded unit read from the container.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    /// Byte offset of the packet in the file
    pub pos: Option<u64>,
    pub keyframe: bool,
    /// Set by the demuxer when the packet is known to be damaged
    pub corrupt: bool,
    /// Extra fields to repeat, as reported by the codec parser
    pub repeat_pict: i32,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Where a demuxer seek should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    /// Beginning of the stream
    Start,
    /// Keyframe at or before this timestamp (stream time base)
    Timestamp(i64),
    /// First packet at or after this byte offset
    Byte(u64),
}

/// Everything a backend needs to open a demuxer.
pub trait MediaBackend: Send + Sync {
    /// Short backend identifier used in logs.
    fn name(&self) -> &'static str;

    /// Version string of the underlying libraries.
    fn version(&self) -> String;

    /// Open a container for sequential reading.
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>>;

    /// True if the scaler can produce `format`.
    fn supports_pixel_format(&self, format: PixelFormat) -> bool;

    /// Build a picture converter.
    fn scaler(&self, request: &ScaleRequest) -> Result<Box<dyn Scaler>>;

    /// Build an audio converter from `source` to the target in `options`.
    fn resampler(&self, source: &AudioFormat, options: &ResampleOptions)
        -> Result<Box<dyn Resampler>>;

    /// Forward the process log level to the library.
    fn set_log_level(&self, _level: LogLevel) {}
}

pub trait Demuxer: Send {
    fn format_name(&self) -> &str;

    /// Total size of the input in bytes.
    fn file_size(&self) -> u64;

    fn streams(&self) -> &[StreamInfo];

    /// Next packet, `None` at end of file.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Reposition the demuxer using `stream`'s time base.
    fn seek(&mut self, stream: usize, target: SeekTarget) -> Result<()>;

    /// Run the codec parser on `stream`'s packets to fill in `repeat_pict`
    /// and parser keyframe flags.
    fn set_parsing(&mut self, _stream: usize, _enabled: bool) {}

    fn video_decoder(&self, stream: usize, threads: usize) -> Result<Box<dyn VideoDecoder>>;

    fn audio_decoder(&self, stream: usize) -> Result<Box<dyn AudioDecoder>>;
}

pub trait VideoDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Signal end of input so delayed pictures come out.
    fn send_eof(&mut self) -> Result<()>;

    /// One decoded picture, or `None` when more input is needed.
    fn receive_picture(&mut self) -> Result<Option<DecodedPicture>>;

    /// Drop all buffered state, used after a seek.
    fn flush(&mut self);
}

pub trait AudioDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    fn send_eof(&mut self) -> Result<()>;

    fn receive_block(&mut self) -> Result<Option<AudioBlock>>;

    fn flush(&mut self);

    /// Format of decoded blocks.
    fn format(&self) -> AudioFormat;
}

pub trait Scaler: Send {
    fn scale(&mut self, source: &Picture) -> Result<Picture>;
}

pub trait Resampler: Send {
    /// Convert one block. Output is interleaved. A converter with internal
    /// latency may return fewer samples than it was given.
    fn convert(&mut self, block: &AudioBlock) -> Result<AudioBlock>;

    /// Hand out samples still buffered inside the converter.
    fn drain(&mut self) -> Result<Option<AudioBlock>> {
        Ok(None)
    }
}

/// Parameters for building a [`Scaler`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleRequest {
    pub source_format: PixelFormat,
    pub source_width: u32,
    pub source_height: u32,
    pub target_format: PixelFormat,
    pub target_width: u32,
    pub target_height: u32,
    pub resizer: Resizer,
    /// Matrix coefficients of the source (H.273 code point)
    pub color_space: i32,
    pub color_range: ColorRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
}

/// Owned picture buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
}

impl Picture {
    /// Zeroed picture with tightly packed rows.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let planes = (0..format.plane_count())
            .map(|i| {
                let (row, rows) = format.plane_geometry(i, width, height);
                Plane {
                    data: vec![0; row * rows],
                    stride: row,
                }
            })
            .collect();
        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Row `y` of `plane`, trimmed to the visible width.
    pub fn row(&self, plane: usize, y: usize) -> &[u8] {
        let (row_bytes, _) = self.format.plane_geometry(plane, self.width, self.height);
        let p = &self.planes[plane];
        let start = y * p.stride;
        &p.data[start..start + row_bytes]
    }

    pub fn row_mut(&mut self, plane: usize, y: usize) -> &mut [u8] {
        let (row_bytes, _) = self.format.plane_geometry(plane, self.width, self.height);
        let p = &mut self.planes[plane];
        let start = y * p.stride;
        &mut p.data[start..start + row_bytes]
    }
}

/// Colour description of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorProperties {
    /// Matrix coefficients (H.273)
    pub color_space: i32,
    pub color_range: ColorRange,
    /// Colour primaries (H.273)
    pub primaries: i32,
    /// Transfer characteristics (H.273)
    pub transfer: i32,
    pub chroma_location: ChromaLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MasteringDisplayPrimaries {
    pub x: [f64; 3],
    pub y: [f64; 3],
    pub white_point_x: f64,
    pub white_point_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MasteringDisplayLuminance {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    pub max: u32,
    pub average: u32,
}

/// HDR side data; each part is present only when the stream carries it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HdrMetadata {
    pub mastering_primaries: Option<MasteringDisplayPrimaries>,
    pub mastering_luminance: Option<MasteringDisplayLuminance>,
    pub content_light_level: Option<ContentLightLevel>,
}

/// A picture fresh out of the decoder.
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    pub picture: Picture,
    /// Best-effort presentation timestamp
    pub pts: Option<i64>,
    pub keyframe: bool,
    /// 'I', 'P', 'B' ... or '?' when unknown
    pub pict_type: char,
    pub repeat_pict: i32,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub color: ColorProperties,
    pub hdr: HdrMetadata,
}

/// Layout of decoded or converted audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    /// One buffer per channel when true, interleaved otherwise
    pub planar: bool,
    pub channels: u32,
    pub channel_layout: u64,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Bytes of one interleaved sample frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

/// A run of decoded samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub format: AudioFormat,
    /// Samples per channel
    pub samples: usize,
    /// One buffer when interleaved, `channels` buffers when planar
    pub planes: Vec<Vec<u8>>,
    pub pts: Option<i64>,
}

impl AudioBlock {
    /// Interleaved copy of the block. Already interleaved blocks are cloned.
    pub fn interleaved(&self) -> AudioBlock {
        if !self.format.planar {
            return self.clone();
        }
        let bps = self.format.sample_format.bytes_per_sample();
        let channels = self.format.channels as usize;
        let mut out = vec![0u8; self.samples * bps * channels];
        for (ch, plane) in self.planes.iter().enumerate().take(channels) {
            for s in 0..self.samples {
                let src = &plane[s * bps..(s + 1) * bps];
                let dst = (s * channels + ch) * bps;
                out[dst..dst + bps].copy_from_slice(src);
            }
        }
        AudioBlock {
            format: AudioFormat {
                planar: false,
                ..self.format
            },
            samples: self.samples,
            planes: vec![out],
            pts: self.pts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picture_new_allocates_planes() {
        let pic = Picture::new(PixelFormat::Yuv420p, 4, 4);
        assert_eq!(pic.planes.len(), 3);
        assert_eq!(pic.planes[0].data.len(), 16);
        assert_eq!(pic.planes[1].data.len(), 4);
        assert_eq!(pic.row(1, 1).len(), 2);
    }

    #[test]
    fn test_interleave_planar_block() {
        let block = AudioBlock {
            format: AudioFormat {
                sample_format: SampleFormat::S16,
                planar: true,
                channels: 2,
                channel_layout: channel::LAYOUT_STEREO,
                sample_rate: 48000,
            },
            samples: 2,
            planes: vec![vec![1, 0, 2, 0], vec![3, 0, 4, 0]],
            pts: Some(0),
        };
        let out = block.interleaved();
        assert!(!out.format.planar);
        assert_eq!(out.planes, vec![vec![1, 0, 3, 0, 2, 0, 4, 0]]);
    }
}
