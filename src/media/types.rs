//! Enumerations shared between index build time and source open time.
//!
//! Every numeric value here is part of the stable interface: indexes written
//! by one build must read back the same way in another.

use serde::{Deserialize, Serialize};

/// Kind of stream inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Unknown = -1,
    Video = 0,
    Audio = 1,
    Data = 2,
    Subtitle = 3,
    Attachment = 4,
}

impl TrackType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => TrackType::Unknown,
            0 => TrackType::Video,
            1 => TrackType::Audio,
            2 => TrackType::Data,
            3 => TrackType::Subtitle,
            4 => TrackType::Attachment,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TrackType::Unknown => "unknown",
            TrackType::Video => "video",
            TrackType::Audio => "audio",
            TrackType::Data => "data",
            TrackType::Subtitle => "subtitle",
            TrackType::Attachment => "attachment",
        }
    }
}

/// Output sample format. Output is always interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    U8 = 0,
    S16 = 1,
    S32 = 2,
    Flt = 3,
    Dbl = 4,
}

impl SampleFormat {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => SampleFormat::U8,
            1 => SampleFormat::S16,
            2 => SampleFormat::S32,
            3 => SampleFormat::Flt,
            4 => SampleFormat::Dbl,
            _ => return None,
        })
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::Flt => 4,
            SampleFormat::Dbl => 8,
        }
    }

    pub fn bits_per_sample(self) -> u32 {
        self.bytes_per_sample() as u32 * 8
    }
}

/// Channel mask bits.
pub mod channel {
    pub const FRONT_LEFT: u64 = 0x0000_0001;
    pub const FRONT_RIGHT: u64 = 0x0000_0002;
    pub const FRONT_CENTER: u64 = 0x0000_0004;
    pub const LOW_FREQUENCY: u64 = 0x0000_0008;
    pub const BACK_LEFT: u64 = 0x0000_0010;
    pub const BACK_RIGHT: u64 = 0x0000_0020;
    pub const FRONT_LEFT_OF_CENTER: u64 = 0x0000_0040;
    pub const FRONT_RIGHT_OF_CENTER: u64 = 0x0000_0080;
    pub const BACK_CENTER: u64 = 0x0000_0100;
    pub const SIDE_LEFT: u64 = 0x0000_0200;
    pub const SIDE_RIGHT: u64 = 0x0000_0400;
    pub const TOP_CENTER: u64 = 0x0000_0800;
    pub const TOP_FRONT_LEFT: u64 = 0x0000_1000;
    pub const TOP_FRONT_CENTER: u64 = 0x0000_2000;
    pub const TOP_FRONT_RIGHT: u64 = 0x0000_4000;
    pub const TOP_BACK_LEFT: u64 = 0x0000_8000;
    pub const TOP_BACK_CENTER: u64 = 0x0001_0000;
    pub const TOP_BACK_RIGHT: u64 = 0x0002_0000;
    pub const STEREO_LEFT: u64 = 0x2000_0000;
    pub const STEREO_RIGHT: u64 = 0x4000_0000;

    pub const LAYOUT_MONO: u64 = FRONT_CENTER;
    pub const LAYOUT_STEREO: u64 = FRONT_LEFT | FRONT_RIGHT;
    pub const LAYOUT_5POINT1: u64 =
        FRONT_LEFT | FRONT_RIGHT | FRONT_CENTER | LOW_FREQUENCY | SIDE_LEFT | SIDE_RIGHT;
    pub const LAYOUT_7POINT1: u64 = LAYOUT_5POINT1 | BACK_LEFT | BACK_RIGHT;

    /// Number of channels described by `mask`.
    pub fn count(mask: u64) -> u32 {
        mask.count_ones()
    }

    /// Conventional layout for a bare channel count, 0 when there is none.
    pub fn default_layout(channels: u32) -> u64 {
        match channels {
            1 => LAYOUT_MONO,
            2 => LAYOUT_STEREO,
            3 => LAYOUT_STEREO | FRONT_CENTER,
            4 => LAYOUT_STEREO | BACK_LEFT | BACK_RIGHT,
            5 => LAYOUT_STEREO | FRONT_CENTER | BACK_LEFT | BACK_RIGHT,
            6 => LAYOUT_5POINT1,
            8 => LAYOUT_7POINT1,
            _ => 0,
        }
    }
}

/// Scaling algorithm used when the output size differs from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resizer {
    FastBilinear = 0x0001,
    Bilinear = 0x0002,
    Bicubic = 0x0004,
    X = 0x0008,
    Point = 0x0010,
    Area = 0x0020,
    Bicublin = 0x0040,
    Gauss = 0x0080,
    Sinc = 0x0100,
    Lanczos = 0x0200,
    Spline = 0x0400,
}

impl Resizer {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Sample value range of a picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRange {
    #[default]
    Unspecified = 0,
    /// 219*2^(n-8), i.e. 16-235 with 8-bit samples
    Mpeg = 1,
    /// 2^n-1, full range
    Jpeg = 2,
}

impl ColorRange {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ColorRange::Mpeg,
            2 => ColorRange::Jpeg,
            _ => ColorRange::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChromaLocation {
    #[default]
    Unspecified = 0,
    Left = 1,
    Center = 2,
    TopLeft = 3,
    Top = 4,
    BottomLeft = 5,
    Bottom = 6,
}

impl ChromaLocation {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ChromaLocation::Left,
            2 => ChromaLocation::Center,
            3 => ChromaLocation::TopLeft,
            4 => ChromaLocation::Top,
            5 => ChromaLocation::BottomLeft,
            6 => ChromaLocation::Bottom,
            _ => ChromaLocation::Unspecified,
        }
    }
}

/// Seek strategy of a video source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekMode {
    /// Never seek; requesting an earlier frame than the last one is an error
    LinearNoRewrite = -1,
    /// Never seek backward; an earlier frame restarts decoding from the start
    Linear = 0,
    /// Keyframe-accurate seeking, verified against the index
    Normal = 1,
    /// Like `Normal`, but guesses the position when it can't be verified
    Unsafe = 2,
    /// Like `Unsafe`, and seeks forward even without a closer known keyframe
    Aggressive = 3,
}

impl SeekMode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => SeekMode::LinearNoRewrite,
            0 => SeekMode::Linear,
            1 => SeekMode::Normal,
            2 => SeekMode::Unsafe,
            3 => SeekMode::Aggressive,
            _ => return None,
        })
    }
}

/// What the indexer does when a single unit of a track fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    Abort = 0,
    ClearTrack = 1,
    StopTrack = 2,
    Ignore = 3,
}

impl ErrorHandling {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ErrorHandling::Abort,
            1 => ErrorHandling::ClearTrack,
            2 => ErrorHandling::StopTrack,
            3 => ErrorHandling::Ignore,
            _ => return None,
        })
    }
}

/// How an audio track's start offset is normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    /// Sample 0 is the first decoded sample
    NoShift,
    /// Sample 0 is time zero
    TimeZero,
    /// Sample 0 lines up with the first frame of the first video track
    FirstVideoTrack,
    /// Sample 0 lines up with the first frame of the given track
    Track(usize),
}

impl DelayMode {
    pub fn code(self) -> i32 {
        match self {
            DelayMode::NoShift => -3,
            DelayMode::TimeZero => -2,
            DelayMode::FirstVideoTrack => -1,
            DelayMode::Track(n) => n as i32,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -3 => DelayMode::NoShift,
            -2 => DelayMode::TimeZero,
            -1 => DelayMode::FirstVideoTrack,
            n if n >= 0 => DelayMode::Track(n as usize),
            _ => return None,
        })
    }
}

/// Log verbosity, ordered like FFmpeg's levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Quiet = -8,
    Panic = 0,
    Fatal = 8,
    Error = 16,
    Warning = 24,
    Info = 32,
    Verbose = 40,
    Debug = 48,
    Trace = 56,
}

impl LogLevel {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Closest level for an arbitrary numeric value.
    pub fn from_code(code: i32) -> Self {
        match code {
            i32::MIN..=-1 => LogLevel::Quiet,
            0..=7 => LogLevel::Panic,
            8..=15 => LogLevel::Fatal,
            16..=23 => LogLevel::Error,
            24..=31 => LogLevel::Warning,
            32..=39 => LogLevel::Info,
            40..=47 => LogLevel::Verbose,
            48..=55 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Quiet => "off",
            LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose | LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Pixel formats the engine can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuv420p10le,
    Nv12,
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
}

const ALL_PIXEL_FORMATS: [PixelFormat; 10] = [
    PixelFormat::Gray8,
    PixelFormat::Yuv420p,
    PixelFormat::Yuv422p,
    PixelFormat::Yuv444p,
    PixelFormat::Yuv420p10le,
    PixelFormat::Nv12,
    PixelFormat::Rgb24,
    PixelFormat::Bgr24,
    PixelFormat::Rgba,
    PixelFormat::Bgra,
];

impl PixelFormat {
    pub fn all() -> &'static [PixelFormat] {
        &ALL_PIXEL_FORMATS
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Yuv420p10le => "yuv420p10le",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
        }
    }

    /// Look a format up by its conventional name (`"yuv420p"`, `"gray8"` ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "gray8" || name == "y8" {
            return Some(PixelFormat::Gray8);
        }
        ALL_PIXEL_FORMATS.iter().copied().find(|f| f.name() == name)
    }

    pub fn is_rgb(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Rgba | PixelFormat::Bgra
        )
    }

    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Gray8
            | PixelFormat::Rgb24
            | PixelFormat::Bgr24
            | PixelFormat::Rgba
            | PixelFormat::Bgra => 1,
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuv420p
            | PixelFormat::Yuv422p
            | PixelFormat::Yuv444p
            | PixelFormat::Yuv420p10le => 3,
        }
    }

    /// Minimum row length in bytes and row count of `plane` for a
    /// `width`x`height` picture.
    pub fn plane_geometry(self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let w = width as usize;
        let h = height as usize;
        let half_w = w.div_ceil(2);
        let half_h = h.div_ceil(2);
        match (self, plane) {
            (PixelFormat::Gray8, 0) => (w, h),
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, 0) => (w * 3, h),
            (PixelFormat::Rgba | PixelFormat::Bgra, 0) => (w * 4, h),
            (PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p, 0) => (w, h),
            (PixelFormat::Yuv420p, 1 | 2) => (half_w, half_h),
            (PixelFormat::Yuv422p, 1 | 2) => (half_w, h),
            (PixelFormat::Yuv444p, 1 | 2) => (w, h),
            (PixelFormat::Yuv420p10le, 0) => (w * 2, h),
            (PixelFormat::Yuv420p10le, 1 | 2) => (half_w * 2, half_h),
            (PixelFormat::Nv12, 0) => (w, h),
            (PixelFormat::Nv12, 1) => (half_w * 2, half_h),
            _ => (0, 0),
        }
    }
}

/// Mixing coefficient precision used by the resampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixingCoefficientType {
    Q8 = 0,
    Q15 = 1,
    Flt = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixEncoding {
    None = 0,
    Dolby = 1,
    ProLogicII = 2,
    ProLogicIIx = 3,
    ProLogicIIz = 4,
    DolbyEx = 5,
    DolbyHeadphone = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilterType {
    Cubic = 0,
    /// Blackman-Nuttall windowed sinc
    Sinc = 1,
    Kaiser = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DitherMethod {
    None = 0,
    Rectangular = 1,
    Triangular = 2,
    TriangularHighpass = 3,
    TriangularNoiseShaping = 4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_type_codes() {
        for t in [
            TrackType::Unknown,
            TrackType::Video,
            TrackType::Audio,
            TrackType::Data,
            TrackType::Subtitle,
            TrackType::Attachment,
        ] {
            assert_eq!(TrackType::from_code(t.code()), Some(t));
        }
        assert_eq!(TrackType::from_code(9), None);
    }

    #[test]
    fn test_delay_mode_codes() {
        assert_eq!(DelayMode::NoShift.code(), -3);
        assert_eq!(DelayMode::from_code(-1), Some(DelayMode::FirstVideoTrack));
        assert_eq!(DelayMode::from_code(2), Some(DelayMode::Track(2)));
        assert_eq!(DelayMode::from_code(-4), None);
    }

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::from_name("yuv420p"), Some(PixelFormat::Yuv420p));
        assert_eq!(PixelFormat::from_name("GRAY8"), Some(PixelFormat::Gray8));
        assert_eq!(PixelFormat::from_name("rgb24"), Some(PixelFormat::Rgb24));
        assert_eq!(PixelFormat::from_name("p010"), None);
    }

    #[test]
    fn test_plane_geometry_odd_sizes() {
        assert_eq!(PixelFormat::Yuv420p.plane_geometry(0, 5, 3), (5, 3));
        assert_eq!(PixelFormat::Yuv420p.plane_geometry(1, 5, 3), (3, 2));
        assert_eq!(PixelFormat::Nv12.plane_geometry(1, 5, 3), (6, 2));
        assert_eq!(PixelFormat::Rgba.plane_geometry(0, 5, 3), (20, 3));
        assert_eq!(PixelFormat::Gray8.plane_geometry(1, 5, 3), (0, 0));
    }

    #[test]
    fn test_channel_helpers() {
        assert_eq!(channel::count(channel::LAYOUT_5POINT1), 6);
        assert_eq!(channel::default_layout(2), channel::LAYOUT_STEREO);
        assert_eq!(channel::default_layout(7), 0);
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(LogLevel::from_code(24), LogLevel::Warning);
        assert_eq!(LogLevel::from_code(-100), LogLevel::Quiet);
        assert_eq!(LogLevel::Verbose.as_filter(), "debug");
        assert!(LogLevel::Error < LogLevel::Info);
    }
}
