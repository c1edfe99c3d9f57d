//! Video and audio decoders

use ffmpeg_next as ffmpeg;
use ffmpeg::software::scaling;

use super::utils::{
    audio_plane, ffmpeg_error, fallback_pixel_format, pixel_from_ffmpeg, pixel_to_ffmpeg,
    sample_from_ffmpeg, timestamp,
};
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{
    channel, AudioBlock, AudioDecoder, AudioFormat, ChromaLocation, ColorProperties, ColorRange,
    ContentLightLevel, DecodedPicture, HdrMetadata, MasteringDisplayLuminance,
    MasteringDisplayPrimaries, Packet, Picture, PixelFormat, Plane, VideoDecoder,
};

/// Copy an engine packet into an FFmpeg packet.
fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut raw = ffmpeg::Packet::copy(&packet.data);
    raw.set_pts(packet.pts);
    raw.set_dts(packet.dts);
    raw.set_duration(packet.duration);
    raw.set_stream(packet.stream);
    if let Some(pos) = packet.pos {
        raw.set_position(pos as isize);
    }
    if packet.keyframe {
        raw.set_flags(ffmpeg::codec::packet::Flags::KEY);
    }
    raw
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    /// Converter for decoder output formats the engine can't describe
    fallback: Option<(ffmpeg::format::Pixel, u32, u32, SendScaler)>,
}

/// `scaling::Context` holds a raw pointer and isn't `Send` by itself.
struct SendScaler(scaling::Context);

// SAFETY: the context is owned by one decoder and used through `&mut self`.
unsafe impl Send for SendScaler {}

impl FfmpegVideoDecoder {
    pub fn new(stream: &ffmpeg::Stream, threads: usize) -> Result<Self> {
        let stream_index = stream.index();
        let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| {
                ffmpeg_error(
                    ErrorKind::Decoding,
                    ErrorSubkind::Codec,
                    format!("Can't create codec context for stream {}", stream_index),
                    e,
                )
            })?;
        if threads > 0 {
            // SAFETY: the context isn't opened yet, so thread_count may change.
            unsafe {
                (*context.as_mut_ptr()).thread_count = threads as i32;
            }
        }
        let decoder = context.decoder().video().map_err(|e| {
            ffmpeg_error(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                format!("Can't open video decoder for stream {}", stream_index),
                e,
            )
        })?;
        tracing::debug!(stream_index, threads, "opened video decoder");
        Ok(Self {
            decoder,
            stream_index,
            fallback: None,
        })
    }

    fn to_picture(&mut self, frame: &ffmpeg::util::frame::Video) -> Result<Picture> {
        let (width, height) = (frame.width(), frame.height());
        if let Some(format) = pixel_from_ffmpeg(frame.format()) {
            return Ok(copy_video_frame(frame, format));
        }

        let target = fallback_pixel_format(frame.format());
        let reuse = matches!(&self.fallback, Some((f, w, h, _)) if *f == frame.format() && *w == width && *h == height);
        if !reuse {
            tracing::debug!(
                stream_index = self.stream_index,
                "converting {:?} to {}",
                frame.format(),
                target.name()
            );
            let ctx = scaling::Context::get(
                frame.format(),
                width,
                height,
                pixel_to_ffmpeg(target),
                width,
                height,
                scaling::Flags::POINT,
            )
            .map_err(|e| ffmpeg_error(ErrorKind::Scaling, ErrorSubkind::Unsupported, "sws", e))?;
            self.fallback = Some((frame.format(), width, height, SendScaler(ctx)));
        }
        let mut converted = ffmpeg::util::frame::Video::empty();
        if let Some((_, _, _, scaler)) = self.fallback.as_mut() {
            scaler
                .0
                .run(frame, &mut converted)
                .map_err(|e| ffmpeg_error(ErrorKind::Scaling, ErrorSubkind::Unknown, "sws", e))?;
        }
        Ok(copy_video_frame(&converted, target))
    }
}

/// Copy the planes of `frame`, keeping its strides.
pub(super) fn copy_video_frame(frame: &ffmpeg::util::frame::Video, format: PixelFormat) -> Picture {
    let (width, height) = (frame.width(), frame.height());
    let planes = (0..format.plane_count())
        .map(|i| {
            let stride = frame.stride(i);
            let (_, rows) = format.plane_geometry(i, width, height);
            let data = frame.data(i);
            let len = (stride * rows).min(data.len());
            Plane {
                data: data[..len].to_vec(),
                stride,
            }
        })
        .collect();
    Picture {
        format,
        width,
        height,
        planes,
    }
}

fn color_properties(frame: &ffmpeg::util::frame::Video) -> ColorProperties {
    // SAFETY: reading plain enum fields of a valid frame.
    unsafe {
        let f = frame.as_ptr();
        ColorProperties {
            color_space: (*f).colorspace as i32,
            color_range: ColorRange::from_code((*f).color_range as i32),
            primaries: (*f).color_primaries as i32,
            transfer: (*f).color_trc as i32,
            chroma_location: ChromaLocation::from_code((*f).chroma_location as i32),
        }
    }
}

fn q2d(r: ffmpeg::ffi::AVRational) -> f64 {
    if r.den == 0 {
        0.0
    } else {
        r.num as f64 / r.den as f64
    }
}

fn hdr_metadata(frame: &ffmpeg::util::frame::Video) -> HdrMetadata {
    let mut hdr = HdrMetadata::default();
    // SAFETY: side data pointers are owned by the frame and typed by their
    // side data kind.
    unsafe {
        let f = frame.as_ptr();
        let side = ffmpeg::ffi::av_frame_get_side_data(
            f,
            ffmpeg::ffi::AVFrameSideDataType::AV_FRAME_DATA_MASTERING_DISPLAY_METADATA,
        );
        if !side.is_null() {
            let md = &*((*side).data as *const ffmpeg::ffi::AVMasteringDisplayMetadata);
            if md.has_primaries != 0 {
                hdr.mastering_primaries = Some(MasteringDisplayPrimaries {
                    x: [
                        q2d(md.display_primaries[0][0]),
                        q2d(md.display_primaries[1][0]),
                        q2d(md.display_primaries[2][0]),
                    ],
                    y: [
                        q2d(md.display_primaries[0][1]),
                        q2d(md.display_primaries[1][1]),
                        q2d(md.display_primaries[2][1]),
                    ],
                    white_point_x: q2d(md.white_point[0]),
                    white_point_y: q2d(md.white_point[1]),
                });
            }
            if md.has_luminance != 0 {
                hdr.mastering_luminance = Some(MasteringDisplayLuminance {
                    min: q2d(md.min_luminance),
                    max: q2d(md.max_luminance),
                });
            }
        }
        let side = ffmpeg::ffi::av_frame_get_side_data(
            f,
            ffmpeg::ffi::AVFrameSideDataType::AV_FRAME_DATA_CONTENT_LIGHT_LEVEL,
        );
        if !side.is_null() {
            let cll = &*((*side).data as *const ffmpeg::ffi::AVContentLightMetadata);
            hdr.content_light_level = Some(ContentLightLevel {
                max: cll.MaxCLL as u32,
                average: cll.MaxFALL as u32,
            });
        }
    }
    hdr
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .send_packet(&to_ffmpeg_packet(packet))
            .map_err(|e| {
                ffmpeg_error(
                    ErrorKind::Decoding,
                    ErrorSubkind::Codec,
                    format!("send_packet error on stream {}", self.stream_index),
                    e,
                )
            })
    }

    fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) if is_again(&e) => Ok(()),
            Err(e) => Err(ffmpeg_error(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                format!("send_eof error on stream {}", self.stream_index),
                e,
            )),
        }
    }

    fn receive_picture(&mut self) -> Result<Option<DecodedPicture>> {
        let mut frame = ffmpeg::util::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) if is_again(&e) => return Ok(None),
            Err(e) => {
                return Err(ffmpeg_error(
                    ErrorKind::Decoding,
                    ErrorSubkind::Codec,
                    format!("receive_frame error on stream {}", self.stream_index),
                    e,
                ))
            }
        }

        let picture = self.to_picture(&frame)?;
        // SAFETY: plain field reads on a valid frame.
        let (repeat_pict, pict_type) = unsafe {
            let f = frame.as_ptr();
            (
                (*f).repeat_pict,
                ffmpeg::ffi::av_get_picture_type_char((*f).pict_type) as u8 as char,
            )
        };
        Ok(Some(DecodedPicture {
            picture,
            pts: timestamp(frame.timestamp()).or_else(|| timestamp(frame.pts())),
            keyframe: frame.is_key(),
            pict_type,
            repeat_pict,
            interlaced: frame.is_interlaced(),
            top_field_first: frame.is_top_first(),
            color: color_properties(&frame),
            hdr: hdr_metadata(&frame),
        }))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

pub struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
    format: AudioFormat,
}

impl FfmpegAudioDecoder {
    pub fn new(stream: &ffmpeg::Stream) -> Result<Self> {
        let stream_index = stream.index();
        let context =
            ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| {
                ffmpeg_error(
                    ErrorKind::Decoding,
                    ErrorSubkind::Codec,
                    format!("Can't create codec context for stream {}", stream_index),
                    e,
                )
            })?;
        let decoder = context.decoder().audio().map_err(|e| {
            ffmpeg_error(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                format!("Can't open audio decoder for stream {}", stream_index),
                e,
            )
        })?;

        let (sample_format, planar) = sample_from_ffmpeg(decoder.format()).ok_or_else(|| {
            Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::Unsupported,
                format!(
                    "Unsupported sample format {:?} on stream {}",
                    decoder.format(),
                    stream_index
                ),
            )
        })?;
        let channels = decoder.channels() as u32;
        let mask = decoder.channel_layout().bits();
        let format = AudioFormat {
            sample_format,
            planar,
            channels,
            channel_layout: if mask != 0 {
                mask
            } else {
                channel::default_layout(channels)
            },
            sample_rate: decoder.rate(),
        };
        tracing::debug!(stream_index, ?format, "opened audio decoder");

        Ok(Self {
            decoder,
            stream_index,
            format,
        })
    }

    fn to_block(&self, frame: &ffmpeg::util::frame::Audio) -> Result<AudioBlock> {
        let (sample_format, planar) = sample_from_ffmpeg(frame.format()).ok_or_else(|| {
            Error::new(
                ErrorKind::Decoding,
                ErrorSubkind::Unsupported,
                format!("Unsupported sample format {:?}", frame.format()),
            )
        })?;
        let samples = frame.samples();
        // SAFETY: plain field read on a valid frame.
        let channels = unsafe { (*frame.as_ptr()).ch_layout.nb_channels.max(0) as u32 };
        let bps = sample_format.bytes_per_sample();
        let (count, plane_bytes) = if planar {
            (channels as usize, samples * bps)
        } else {
            (1, samples * bps * channels as usize)
        };
        let planes = (0..count)
            .map(|i| {
                let data = audio_plane(frame, i);
                data[..plane_bytes.min(data.len())].to_vec()
            })
            .collect();
        Ok(AudioBlock {
            format: AudioFormat {
                sample_format,
                planar,
                channels,
                channel_layout: self.format.channel_layout,
                sample_rate: frame.rate(),
            },
            samples,
            planes,
            pts: timestamp(frame.pts()),
        })
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .send_packet(&to_ffmpeg_packet(packet))
            .map_err(|e| {
                ffmpeg_error(
                    ErrorKind::Decoding,
                    ErrorSubkind::Codec,
                    format!("send_packet error on stream {}", self.stream_index),
                    e,
                )
            })
    }

    fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) if is_again(&e) => Ok(()),
            Err(e) => Err(ffmpeg_error(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                format!("send_eof error on stream {}", self.stream_index),
                e,
            )),
        }
    }

    fn receive_block(&mut self) -> Result<Option<AudioBlock>> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => self.to_block(&frame).map(Some),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_again(&e) => Ok(None),
            Err(e) => Err(ffmpeg_error(
                ErrorKind::Decoding,
                ErrorSubkind::Codec,
                format!("receive_frame error on stream {}", self.stream_index),
                e,
            )),
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}
