//! Sample format and channel layout conversion with libswresample

use std::ffi::CStr;

use ffmpeg_next as ffmpeg;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;

use super::utils::{audio_plane, audio_plane_mut, ffmpeg_error, sample_to_ffmpeg};
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{
    AudioBlock, AudioFormat, DitherMethod, MixingCoefficientType, Resampler, SampleFormat,
};
use crate::source::ResampleOptions;

const SWR_FLAG_RESAMPLE: i64 = 1;
const SWR_DITHER_NS_LIPSHITZ: i64 = 65;

pub struct FfmpegResampler {
    context: resampling::Context,
    source: AudioFormat,
    target: AudioFormat,
}

// SAFETY: the SwrContext is owned by this resampler and only used through
// `&mut self`.
unsafe impl Send for FfmpegResampler {}

fn layout(mask: u64, channels: u32) -> ChannelLayout {
    let layout = ChannelLayout::from_bits_truncate(mask);
    if layout.bits() != 0 {
        return layout;
    }
    match channels {
        1 => ChannelLayout::MONO,
        _ => ChannelLayout::STEREO,
    }
}

fn resample_error(what: &str, ret: i32) -> Error {
    ffmpeg_error(
        ErrorKind::Resampling,
        ErrorSubkind::InvalidArgument,
        format!("Can't set {}", what),
        ffmpeg::Error::from(ret),
    )
}

/// Apply tuning options to an allocated but not yet re-initialized context.
unsafe fn apply_options(swr: *mut ffmpeg::ffi::SwrContext, opts: &ResampleOptions) -> Result<()> {
    let obj = swr as *mut std::ffi::c_void;
    let set_double = |name: &CStr, v: f64| -> Result<()> {
        let ret = ffmpeg::ffi::av_opt_set_double(obj, name.as_ptr(), v, 0);
        if ret < 0 {
            return Err(resample_error(&name.to_string_lossy(), ret));
        }
        Ok(())
    };
    let set_int = |name: &CStr, v: i64| -> Result<()> {
        let ret = ffmpeg::ffi::av_opt_set_int(obj, name.as_ptr(), v, 0);
        if ret < 0 {
            return Err(resample_error(&name.to_string_lossy(), ret));
        }
        Ok(())
    };

    set_double(c"center_mix_level", opts.center_mix_level)?;
    set_double(c"surround_mix_level", opts.surround_mix_level)?;
    set_double(c"lfe_mix_level", opts.lfe_mix_level)?;
    set_double(c"rematrix_maxval", if opts.normalize { 1.0 } else { 0.0 })?;
    set_int(
        c"flags",
        if opts.force_resample {
            SWR_FLAG_RESAMPLE
        } else {
            0
        },
    )?;
    set_int(c"filter_size", opts.filter_size as i64)?;
    set_int(c"phase_shift", opts.phase_shift as i64)?;
    set_int(c"linear_interp", i64::from(opts.linear_interpolation))?;
    set_double(c"cutoff", opts.cutoff_frequency_ratio)?;
    set_int(c"matrix_encoding", opts.matrix_encoding as i64)?;
    set_int(c"filter_type", opts.filter_type as i64)?;
    set_double(c"kaiser_beta", opts.kaiser_beta as f64)?;
    set_int(
        c"dither_method",
        match opts.dither_method {
            DitherMethod::TriangularNoiseShaping => SWR_DITHER_NS_LIPSHITZ,
            m => m as i64,
        },
    )?;

    let internal = match opts.mixing_coefficient_type {
        MixingCoefficientType::Q8 => ffmpeg::ffi::AVSampleFormat::AV_SAMPLE_FMT_S16P,
        MixingCoefficientType::Q15 => ffmpeg::ffi::AVSampleFormat::AV_SAMPLE_FMT_S32P,
        MixingCoefficientType::Flt => ffmpeg::ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP,
    };
    let ret = ffmpeg::ffi::av_opt_set_sample_fmt(obj, c"internal_sample_fmt".as_ptr(), internal, 0);
    if ret < 0 {
        return Err(resample_error("internal_sample_fmt", ret));
    }
    Ok(())
}

impl FfmpegResampler {
    pub fn new(source: &AudioFormat, options: &ResampleOptions) -> Result<Self> {
        let target = options.output_format();
        let mut context = resampling::Context::get(
            sample_to_ffmpeg(source.sample_format, source.planar),
            layout(source.channel_layout, source.channels),
            source.sample_rate,
            sample_to_ffmpeg(target.sample_format, false),
            layout(target.channel_layout, target.channels),
            target.sample_rate,
        )
        .map_err(|e| {
            ffmpeg_error(
                ErrorKind::Resampling,
                ErrorSubkind::Unsupported,
                "Failed to create resampling context",
                e,
            )
        })?;

        // SAFETY: the context is valid; swr_init may be called again after
        // changing options.
        unsafe {
            let swr = context.as_mut_ptr();
            apply_options(swr, options)?;
            let ret = ffmpeg::ffi::swr_init(swr);
            if ret < 0 {
                return Err(ffmpeg_error(
                    ErrorKind::Resampling,
                    ErrorSubkind::InvalidArgument,
                    "swr_init",
                    ffmpeg::Error::from(ret),
                ));
            }
        }

        tracing::debug!(?source, ?target, "created resampler");
        Ok(Self {
            context,
            source: *source,
            target,
        })
    }

    fn input_frame(&self, block: &AudioBlock) -> ffmpeg::util::frame::Audio {
        let mut frame = ffmpeg::util::frame::Audio::new(
            sample_to_ffmpeg(block.format.sample_format, block.format.planar),
            block.samples,
            layout(self.source.channel_layout, self.source.channels),
        );
        frame.set_rate(block.format.sample_rate);
        for (i, plane) in block.planes.iter().enumerate() {
            let dst = audio_plane_mut(&mut frame, i);
            let n = plane.len().min(dst.len());
            dst[..n].copy_from_slice(&plane[..n]);
        }
        frame
    }
}

impl FfmpegResampler {
    fn output_block(&self, output: &ffmpeg::util::frame::Audio, pts: Option<i64>) -> AudioBlock {
        let samples = output.samples();
        let bytes = samples * self.target.frame_bytes();
        let data = audio_plane(output, 0);
        AudioBlock {
            format: self.target,
            samples,
            planes: vec![data[..bytes.min(data.len())].to_vec()],
            pts,
        }
    }
}

impl Resampler for FfmpegResampler {
    fn convert(&mut self, block: &AudioBlock) -> Result<AudioBlock> {
        if block.format.sample_format != self.source.sample_format
            || block.format.planar != self.source.planar
            || block.format.channels != self.source.channels
        {
            return Err(Error::new(
                ErrorKind::Resampling,
                ErrorSubkind::InvalidArgument,
                "Audio block doesn't match the resampler input",
            ));
        }
        let input = self.input_frame(block);
        // The output frame must be empty so swr allocates it from its own
        // configuration.
        let mut output = ffmpeg::util::frame::Audio::empty();
        self.context
            .run(&input, &mut output)
            .map_err(|e| ffmpeg_error(ErrorKind::Resampling, ErrorSubkind::Unknown, "swr_convert", e))?;

        Ok(self.output_block(&output, block.pts))
    }

    fn drain(&mut self) -> Result<Option<AudioBlock>> {
        let mut output = ffmpeg::util::frame::Audio::empty();
        // swr reports an error when it has nothing buffered
        if let Err(e) = self.context.flush(&mut output) {
            tracing::trace!("resampler flush: {}", e);
            return Ok(None);
        }
        if output.samples() == 0 {
            return Ok(None);
        }
        Ok(Some(self.output_block(&output, None)))
    }
}
