//! Audio output format description

use serde::{Deserialize, Serialize};

use crate::media::{
    AudioFormat, DitherMethod, MatrixEncoding, MixingCoefficientType, ResampleFilterType,
    SampleFormat,
};

/// Target format and conversion tuning for an [`AudioSource`](super::AudioSource).
///
/// Obtain one with [`AudioSource::resample_options`](super::AudioSource::resample_options),
/// change what you need and pass it to `set_output_format`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleOptions {
    pub channel_layout: u64,
    pub sample_format: SampleFormat,
    /// Must equal the source rate
    pub sample_rate: u32,
    pub mixing_coefficient_type: MixingCoefficientType,
    pub center_mix_level: f64,
    pub surround_mix_level: f64,
    pub lfe_mix_level: f64,
    pub normalize: bool,
    pub force_resample: bool,
    pub filter_size: i32,
    pub phase_shift: i32,
    pub linear_interpolation: bool,
    pub cutoff_frequency_ratio: f64,
    pub matrix_encoding: MatrixEncoding,
    pub filter_type: ResampleFilterType,
    pub kaiser_beta: i32,
    pub dither_method: DitherMethod,
}

impl ResampleOptions {
    /// Options that convert `format` to itself, interleaved.
    pub fn for_format(format: &AudioFormat) -> Self {
        Self {
            channel_layout: format.channel_layout,
            sample_format: format.sample_format,
            sample_rate: format.sample_rate,
            mixing_coefficient_type: MixingCoefficientType::Flt,
            center_mix_level: std::f64::consts::FRAC_1_SQRT_2,
            surround_mix_level: std::f64::consts::FRAC_1_SQRT_2,
            lfe_mix_level: 0.0,
            normalize: true,
            force_resample: false,
            filter_size: 32,
            phase_shift: 10,
            linear_interpolation: false,
            cutoff_frequency_ratio: 0.97,
            matrix_encoding: MatrixEncoding::None,
            filter_type: ResampleFilterType::Kaiser,
            kaiser_beta: 9,
            dither_method: DitherMethod::None,
        }
    }

    /// Interleaved output format these options produce.
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat {
            sample_format: self.sample_format,
            planar: false,
            channels: crate::media::channel::count(self.channel_layout),
            channel_layout: self.channel_layout,
            sample_rate: self.sample_rate,
        }
    }

    /// True when converting `source` with these options is a plain
    /// interleave (or nothing at all).
    pub fn is_passthrough(&self, source: &AudioFormat) -> bool {
        !self.force_resample
            && self.sample_format == source.sample_format
            && self.channel_layout == source.channel_layout
            && self.sample_rate == source.sample_rate
    }
}

/// Audio track description as seen through a source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProperties {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub channels: u32,
    pub channel_layout: u64,
    /// Samples available to `get_audio`, delay included
    pub num_samples: u64,
    pub first_time: f64,
    pub last_time: f64,
    pub last_end_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::channel;

    fn stereo_s16() -> AudioFormat {
        AudioFormat {
            sample_format: SampleFormat::S16,
            planar: true,
            channels: 2,
            channel_layout: channel::LAYOUT_STEREO,
            sample_rate: 44100,
        }
    }

    #[test]
    fn test_defaults_describe_source() {
        let format = stereo_s16();
        let opts = ResampleOptions::for_format(&format);
        assert!(opts.is_passthrough(&format));
        let out = opts.output_format();
        assert_eq!(out.channels, 2);
        assert!(!out.planar);
        assert_eq!(out.sample_rate, 44100);
    }

    #[test]
    fn test_changes_break_passthrough() {
        let format = stereo_s16();
        let mut opts = ResampleOptions::for_format(&format);
        opts.sample_format = SampleFormat::Flt;
        assert!(!opts.is_passthrough(&format));

        let mut opts = ResampleOptions::for_format(&format);
        opts.force_resample = true;
        assert!(!opts.is_passthrough(&format));
    }
}
