//! Container demuxing, codec parsing and seeking

use std::collections::HashMap;
use std::path::Path;
use std::ptr;

use ffmpeg_next as ffmpeg;

use super::decode::{FfmpegAudioDecoder, FfmpegVideoDecoder};
use super::utils::{ffmpeg_error, pixel_from_ffmpeg, sample_from_ffmpeg, timestamp, track_type};
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::index::TrackTimeBase;
use crate::media::{
    channel, AudioDecoder, AudioParams, Demuxer, Packet, SeekTarget, StreamInfo, TrackType,
    VideoDecoder, VideoParams,
};

const AVSEEK_FLAG_BACKWARD: i32 = 1;
const AVSEEK_FLAG_BYTE: i32 = 2;
const PARSER_FLAG_COMPLETE_FRAMES: i32 = 0x0001;

/// Codec parser attached to one video stream.
///
/// Only used to recover `repeat_pict` and the parser's keyframe verdict,
/// which the demuxer alone doesn't provide.
struct StreamParser {
    parser: *mut ffmpeg::ffi::AVCodecParserContext,
    codec: *mut ffmpeg::ffi::AVCodecContext,
}

// SAFETY: the parser and codec context are owned exclusively by one
// `StreamParser` and only touched through `&mut self`.
unsafe impl Send for StreamParser {}

impl StreamParser {
    fn new(params: &ffmpeg::codec::Parameters) -> Option<Self> {
        // SAFETY: `params.as_ptr()` is valid for the lifetime of the input;
        // both allocations are checked before use and freed in Drop.
        unsafe {
            let id: ffmpeg::ffi::AVCodecID = params.id().into();
            let parser = ffmpeg::ffi::av_parser_init(id as i32);
            if parser.is_null() {
                return None;
            }
            (*parser).flags |= PARSER_FLAG_COMPLETE_FRAMES;
            let codec = ffmpeg::ffi::avcodec_alloc_context3(ptr::null());
            if codec.is_null()
                || ffmpeg::ffi::avcodec_parameters_to_context(codec, params.as_ptr()) < 0
            {
                let mut codec = codec;
                ffmpeg::ffi::avcodec_free_context(&mut codec);
                ffmpeg::ffi::av_parser_close(parser);
                return None;
            }
            Some(Self { parser, codec })
        }
    }

    /// Run the parser over one packet; returns (repeat_pict, keyframe).
    fn parse(&mut self, packet: &Packet) -> (i32, Option<bool>) {
        let mut out: *mut u8 = ptr::null_mut();
        let mut out_size: i32 = 0;
        // SAFETY: `data` outlives the call and the parser copies what it keeps.
        unsafe {
            ffmpeg::ffi::av_parser_parse2(
                self.parser,
                self.codec,
                &mut out,
                &mut out_size,
                packet.data.as_ptr(),
                packet.data.len() as i32,
                packet.pts.unwrap_or(ffmpeg::ffi::AV_NOPTS_VALUE),
                packet.dts.unwrap_or(ffmpeg::ffi::AV_NOPTS_VALUE),
                packet.pos.map(|p| p as i64).unwrap_or(-1),
            );
            let key = match (*self.parser).key_frame {
                1 => Some(true),
                0 => Some(false),
                _ => None,
            };
            ((*self.parser).repeat_pict, key)
        }
    }
}

impl Drop for StreamParser {
    fn drop(&mut self) {
        // SAFETY: both pointers were allocated in `new` and are freed once.
        unsafe {
            ffmpeg::ffi::av_parser_close(self.parser);
            ffmpeg::ffi::avcodec_free_context(&mut self.codec);
        }
    }
}

/// An open container.
pub struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
    format_name: String,
    file_size: u64,
    parsers: HashMap<usize, StreamParser>,
}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> Result<Self> {
        let file_size = std::fs::metadata(path)
            .map_err(|e| Error::open_failed(ErrorKind::Parser, &path.display().to_string(), &e))?
            .len();
        let input = ffmpeg::format::input(&path).map_err(|e| {
            ffmpeg_error(
                ErrorKind::Parser,
                ErrorSubkind::FileRead,
                format!("Can't open '{}'", path.display()),
                e,
            )
        })?;

        let format_name = input.format().name().to_string();
        let streams = input.streams().map(|s| stream_info(&s)).collect();

        tracing::debug!(
            path = %path.display(),
            format = %format_name,
            "opened container"
        );

        Ok(Self {
            input,
            streams,
            format_name,
            file_size,
            parsers: HashMap::new(),
        })
    }

    fn stream(&self, stream: usize) -> Result<ffmpeg::Stream<'_>> {
        self.input.stream(stream).ok_or_else(|| {
            Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("No stream {}", stream),
            )
        })
    }

    fn seek_raw(&mut self, stream: usize, target: i64, flags: i32) -> i32 {
        let ctx = unsafe { self.input.as_mut_ptr() };
        // SAFETY: `ctx` is the live format context owned by `self.input`.
        unsafe {
            if flags & AVSEEK_FLAG_BYTE != 0 {
                ffmpeg::ffi::avformat_seek_file(ctx, stream as i32, target, target, target, flags)
            } else {
                ffmpeg::ffi::av_seek_frame(ctx, stream as i32, target, flags)
            }
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut raw = ffmpeg::Packet::empty();
        match raw.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => {
                return Err(ffmpeg_error(
                    ErrorKind::Parser,
                    ErrorSubkind::FileRead,
                    "read_frame",
                    e,
                ))
            }
        }

        let mut packet = Packet {
            stream: raw.stream(),
            pts: timestamp(raw.pts()),
            dts: timestamp(raw.dts()),
            duration: raw.duration(),
            pos: (raw.position() >= 0).then(|| raw.position() as u64),
            keyframe: raw.is_key(),
            corrupt: raw.is_corrupt(),
            repeat_pict: 0,
            data: raw.data().map(|d| d.to_vec()).unwrap_or_default(),
        };

        if let Some(parser) = self.parsers.get_mut(&packet.stream) {
            let (repeat_pict, key) = parser.parse(&packet);
            packet.repeat_pict = repeat_pict;
            if let Some(key) = key {
                packet.keyframe = packet.keyframe || key;
            }
        }

        Ok(Some(packet))
    }

    fn seek(&mut self, stream: usize, target: SeekTarget) -> Result<()> {
        let ret = match target {
            SeekTarget::Start => {
                let start = self
                    .streams
                    .get(stream)
                    .and_then(|s| s.start_time)
                    .unwrap_or(0);
                let ret = self.seek_raw(stream, start, AVSEEK_FLAG_BACKWARD);
                if ret < 0 {
                    self.seek_raw(stream, 0, AVSEEK_FLAG_BYTE)
                } else {
                    ret
                }
            }
            SeekTarget::Timestamp(ts) => self.seek_raw(stream, ts, AVSEEK_FLAG_BACKWARD),
            SeekTarget::Byte(pos) => self.seek_raw(stream, pos as i64, AVSEEK_FLAG_BYTE),
        };
        if ret < 0 {
            return Err(ffmpeg_error(
                ErrorKind::Seeking,
                ErrorSubkind::Unknown,
                format!("Seek to {:?} failed", target),
                ffmpeg::Error::from(ret),
            ));
        }

        // Parser state refers to pre-seek data.
        let enabled: Vec<usize> = self.parsers.keys().copied().collect();
        for idx in enabled {
            self.parsers.remove(&idx);
            self.set_parsing(idx, true);
        }
        Ok(())
    }

    fn set_parsing(&mut self, stream: usize, enabled: bool) {
        if !enabled {
            self.parsers.remove(&stream);
            return;
        }
        let Some(s) = self.input.stream(stream) else {
            return;
        };
        match StreamParser::new(&s.parameters()) {
            Some(parser) => {
                self.parsers.insert(stream, parser);
            }
            None => tracing::debug!(stream, "no codec parser available"),
        }
    }

    fn video_decoder(&self, stream: usize, threads: usize) -> Result<Box<dyn VideoDecoder>> {
        let s = self.stream(stream)?;
        Ok(Box::new(FfmpegVideoDecoder::new(&s, threads)?))
    }

    fn audio_decoder(&self, stream: usize) -> Result<Box<dyn AudioDecoder>> {
        let s = self.stream(stream)?;
        Ok(Box::new(FfmpegAudioDecoder::new(&s)?))
    }
}

fn stream_info(stream: &ffmpeg::Stream) -> StreamInfo {
    let params = stream.parameters();
    let kind = track_type(params.medium());
    let tb = stream.time_base();
    let fr = stream.avg_frame_rate();

    StreamInfo {
        index: stream.index(),
        track_type: kind,
        codec_name: params.id().name().to_string(),
        time_base: TrackTimeBase::new(tb.numerator() as i64, tb.denominator() as i64)
            .unwrap_or_default(),
        start_time: timestamp(Some(stream.start_time())),
        frame_rate: (kind == TrackType::Video && fr.numerator() > 0 && fr.denominator() > 0)
            .then(|| (fr.numerator(), fr.denominator())),
        video: (kind == TrackType::Video).then(|| video_params(&params)),
        audio: (kind == TrackType::Audio).then(|| audio_params(&params)),
    }
}

fn video_params(params: &ffmpeg::codec::Parameters) -> VideoParams {
    // SAFETY: `params.as_ptr()` is a valid AVCodecParameters for the
    // lifetime of `params`. Enum values are range-checked before conversion.
    unsafe {
        let par = params.as_ptr();
        let format = (*par).format;
        let pixel_format = if format >= 0
            && format < ffmpeg::ffi::AVPixelFormat::AV_PIX_FMT_NB as i32
        {
            let raw: ffmpeg::ffi::AVPixelFormat = std::mem::transmute(format);
            pixel_from_ffmpeg(raw.into())
        } else {
            None
        };
        let (rotation, flip) = display_matrix(par);
        VideoParams {
            width: (*par).width.max(0) as u32,
            height: (*par).height.max(0) as u32,
            pixel_format,
            sample_aspect_ratio: {
                let sar = (*par).sample_aspect_ratio;
                if sar.num > 0 && sar.den > 0 {
                    (sar.num, sar.den)
                } else {
                    (0, 1)
                }
            },
            rotation,
            flip,
        }
    }
}

/// Rotation (clockwise degrees) and horizontal flip from the display matrix.
unsafe fn display_matrix(par: *const ffmpeg::ffi::AVCodecParameters) -> (i32, i32) {
    let side = ffmpeg::ffi::av_packet_side_data_get(
        (*par).coded_side_data,
        (*par).nb_coded_side_data,
        ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
    );
    if side.is_null() || (*side).size < 9 * 4 {
        return (0, 0);
    }
    let m = (*side).data as *const i32;
    let matrix = std::slice::from_raw_parts(m, 9);
    let flip = i32::from((matrix[0] as i64 * matrix[4] as i64 - matrix[1] as i64 * matrix[3] as i64) < 0);
    let angle = ffmpeg::ffi::av_display_rotation_get(m);
    if angle.is_nan() {
        return (0, flip);
    }
    // FFmpeg reports counterclockwise degrees.
    let rotation = ((-angle).round() as i32).rem_euclid(360);
    (rotation, flip)
}

fn audio_params(params: &ffmpeg::codec::Parameters) -> AudioParams {
    // SAFETY: see `video_params`.
    unsafe {
        let par = params.as_ptr();
        let format = (*par).format;
        let sample_format = if format >= 0
            && format < ffmpeg::ffi::AVSampleFormat::AV_SAMPLE_FMT_NB as i32
        {
            let raw: ffmpeg::ffi::AVSampleFormat = std::mem::transmute(format);
            sample_from_ffmpeg(raw.into()).map(|(f, _)| f)
        } else {
            None
        };
        let channels = (*par).ch_layout.nb_channels.max(0) as u32;
        let mask = if (*par).ch_layout.order == ffmpeg::ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
            (*par).ch_layout.u.mask
        } else {
            0
        };
        let raw_bits = (*par).bits_per_raw_sample.max(0) as u32;
        AudioParams {
            sample_rate: (*par).sample_rate.max(0) as u32,
            channels,
            channel_layout: if mask != 0 {
                mask
            } else {
                channel::default_layout(channels)
            },
            sample_format,
            bits_per_sample: if raw_bits > 0 {
                raw_bits
            } else {
                sample_format.map(|f| f.bits_per_sample()).unwrap_or(0)
            },
        }
    }
}
