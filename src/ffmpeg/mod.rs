//! FFmpeg backend
//!
//! Implements the [`crate::media`] traits on top of ffmpeg-next:
//! - demuxing, codec parsing and seeking ([`demux`])
//! - video and audio decoding ([`decode`])
//! - pixel format conversion and resizing ([`scale`])
//! - sample format and channel layout conversion ([`resample`])

pub mod decode;
pub mod demux;
pub mod resample;
pub mod scale;
pub mod utils;

use std::path::Path;
use std::sync::Once;

use ffmpeg_next as ffmpeg;

use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{
    AudioFormat, Demuxer, LogLevel, MediaBackend, PixelFormat, Resampler, ScaleRequest, Scaler,
};
use crate::source::ResampleOptions;

static INIT: Once = Once::new();

/// The production media backend.
#[derive(Debug)]
pub struct FfmpegBackend {
    _priv: (),
}

impl FfmpegBackend {
    /// Initialize the FFmpeg libraries (once per process) and route their
    /// log output through `tracing`.
    pub fn new() -> Result<Self> {
        let mut result = Ok(());
        INIT.call_once(|| {
            result = ffmpeg::init().map_err(|e| {
                Error::new(
                    ErrorKind::Parser,
                    ErrorSubkind::Unknown,
                    format!("ffmpeg::init() failed: {}", e),
                )
            });
            if result.is_ok() {
                install_log_filter();
                tracing::info!("FFmpeg initialized ({})", version_info());
            }
        });
        result?;
        Ok(Self { _priv: () })
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn version(&self) -> String {
        version_info()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(demux::FfmpegDemuxer::open(path)?))
    }

    fn supports_pixel_format(&self, _format: PixelFormat) -> bool {
        true
    }

    fn scaler(&self, request: &ScaleRequest) -> Result<Box<dyn Scaler>> {
        Ok(Box::new(scale::FfmpegScaler::new(request)?))
    }

    fn resampler(
        &self,
        source: &AudioFormat,
        options: &ResampleOptions,
    ) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(resample::FfmpegResampler::new(source, options)?))
    }

    fn set_log_level(&self, level: LogLevel) {
        // SAFETY: plain store into FFmpeg's global log level.
        unsafe { ffmpeg::ffi::av_log_set_level(level.code()) }
    }
}

/// Install a log callback that forwards FFmpeg messages to `tracing`.
///
/// Must run after `ffmpeg::init()` and before any decoding starts.
fn install_log_filter() {
    // SAFETY: modifies global FFmpeg state; guarded by `INIT`.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
        ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Expected noise when seeking into the middle of a stream.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
    "Error parsing Opus packet header",
    "Missing reference picture",
    "co located POCs unavailable",
    "mmco: unref short failure",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() || SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s)) {
        return;
    }

    match LogLevel::from_code(level) {
        LogLevel::Quiet => {}
        LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => {
            tracing::error!(target: "avindex::ffmpeg", "{}", msg)
        }
        LogLevel::Warning => tracing::warn!(target: "avindex::ffmpeg", "{}", msg),
        LogLevel::Info => tracing::info!(target: "avindex::ffmpeg", "{}", msg),
        LogLevel::Verbose | LogLevel::Debug => {
            tracing::debug!(target: "avindex::ffmpeg", "{}", msg)
        }
        LogLevel::Trace => tracing::trace!(target: "avindex::ffmpeg", "{}", msg),
    }
}

fn split_version(v: u32) -> String {
    format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}

/// Versions of the linked FFmpeg libraries.
pub fn version_info() -> String {
    // SAFETY: version getters have no preconditions.
    let (format, codec) = unsafe {
        (
            ffmpeg::ffi::avformat_version(),
            ffmpeg::ffi::avcodec_version(),
        )
    };
    format!(
        "libavformat {}, libavcodec {}",
        split_version(format),
        split_version(codec)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_version() {
        assert_eq!(split_version((61 << 16) | (7 << 8) | 100), "61.7.100");
    }
}
