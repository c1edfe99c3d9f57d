//! Conversions between FFmpeg types and the engine's own types

use ffmpeg_next as ffmpeg;
use ffmpeg::format::{sample::Type as SampleType, Pixel, Sample};

use crate::error::{Error, ErrorKind, ErrorSubkind};
use crate::media::{PixelFormat, SampleFormat, TrackType};

/// Wrap an FFmpeg error with some context.
pub fn ffmpeg_error(
    kind: ErrorKind,
    subkind: ErrorSubkind,
    context: impl std::fmt::Display,
    err: ffmpeg::Error,
) -> Error {
    Error::new(kind, subkind, format!("{}: {}", context, err))
}

pub fn track_type(medium: ffmpeg::media::Type) -> TrackType {
    match medium {
        ffmpeg::media::Type::Video => TrackType::Video,
        ffmpeg::media::Type::Audio => TrackType::Audio,
        ffmpeg::media::Type::Data => TrackType::Data,
        ffmpeg::media::Type::Subtitle => TrackType::Subtitle,
        ffmpeg::media::Type::Attachment => TrackType::Attachment,
        _ => TrackType::Unknown,
    }
}

pub fn pixel_to_ffmpeg(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Gray8 => Pixel::GRAY8,
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Yuv422p => Pixel::YUV422P,
        PixelFormat::Yuv444p => Pixel::YUV444P,
        PixelFormat::Yuv420p10le => Pixel::YUV420P10LE,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgr24 => Pixel::BGR24,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Bgra => Pixel::BGRA,
    }
}

pub fn pixel_from_ffmpeg(format: Pixel) -> Option<PixelFormat> {
    Some(match format {
        Pixel::GRAY8 => PixelFormat::Gray8,
        Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::Yuv420p,
        Pixel::YUV422P | Pixel::YUVJ422P => PixelFormat::Yuv422p,
        Pixel::YUV444P | Pixel::YUVJ444P => PixelFormat::Yuv444p,
        Pixel::YUV420P10LE => PixelFormat::Yuv420p10le,
        Pixel::NV12 => PixelFormat::Nv12,
        Pixel::RGB24 => PixelFormat::Rgb24,
        Pixel::BGR24 => PixelFormat::Bgr24,
        Pixel::RGBA => PixelFormat::Rgba,
        Pixel::BGRA => PixelFormat::Bgra,
        _ => return None,
    })
}

/// Closest supported format for a decoder output the engine can't describe.
pub fn fallback_pixel_format(format: Pixel) -> PixelFormat {
    // SAFETY: av_pix_fmt_desc_get returns null or a pointer to static data.
    let desc = unsafe { ffmpeg::ffi::av_pix_fmt_desc_get(format.into()) };
    if desc.is_null() {
        return PixelFormat::Yuv420p;
    }
    let (flags, depth) = unsafe { ((*desc).flags, (*desc).comp[0].depth) };
    if flags & ffmpeg::ffi::AV_PIX_FMT_FLAG_RGB as u64 != 0 {
        PixelFormat::Rgba
    } else if depth > 8 {
        PixelFormat::Yuv420p10le
    } else {
        PixelFormat::Yuv420p
    }
}

/// Engine sample format and planarity of an FFmpeg sample format.
pub fn sample_from_ffmpeg(format: Sample) -> Option<(SampleFormat, bool)> {
    let (format, kind) = match format {
        Sample::U8(kind) => (SampleFormat::U8, kind),
        Sample::I16(kind) => (SampleFormat::S16, kind),
        Sample::I32(kind) => (SampleFormat::S32, kind),
        Sample::F32(kind) => (SampleFormat::Flt, kind),
        Sample::F64(kind) => (SampleFormat::Dbl, kind),
        _ => return None,
    };
    Some((format, kind == SampleType::Planar))
}

pub fn sample_to_ffmpeg(format: SampleFormat, planar: bool) -> Sample {
    let kind = if planar {
        SampleType::Planar
    } else {
        SampleType::Packed
    };
    match format {
        SampleFormat::U8 => Sample::U8(kind),
        SampleFormat::S16 => Sample::I16(kind),
        SampleFormat::S32 => Sample::I32(kind),
        SampleFormat::Flt => Sample::F32(kind),
        SampleFormat::Dbl => Sample::F64(kind),
    }
}

/// Plane `index` of an audio frame.
///
/// Reads `extended_data` with `linesize[0]` for every plane, since planar
/// frames only fill in the first linesize and may have more than eight
/// channels.
pub fn audio_plane(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    // SAFETY: plane pointers come from the frame itself and are bounded by
    // the channel count (planar) or a single plane (packed).
    unsafe {
        let f = frame.as_ptr();
        let planes = if frame.format().is_planar() {
            (*f).ch_layout.nb_channels.max(0) as usize
        } else {
            1
        };
        let ptrs = (*f).extended_data;
        if index >= planes || ptrs.is_null() {
            return &[];
        }
        let plane = *ptrs.add(index);
        if plane.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(plane, (*f).linesize[0].max(0) as usize)
    }
}

pub fn audio_plane_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    let planar = frame.format().is_planar();
    // SAFETY: as in `audio_plane`.
    unsafe {
        let f = frame.as_mut_ptr();
        let planes = if planar {
            (*f).ch_layout.nb_channels.max(0) as usize
        } else {
            1
        };
        let ptrs = (*f).extended_data;
        if index >= planes || ptrs.is_null() {
            return &mut [];
        }
        let plane = *ptrs.add(index);
        if plane.is_null() {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(plane, (*f).linesize[0].max(0) as usize)
    }
}

/// `AV_NOPTS_VALUE` becomes `None`.
pub fn timestamp(ts: Option<i64>) -> Option<i64> {
    ts.filter(|&t| t != ffmpeg::ffi::AV_NOPTS_VALUE)
}
