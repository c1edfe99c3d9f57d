//! Pixel format conversion and resizing with libswscale

use ffmpeg_next as ffmpeg;
use ffmpeg::software::scaling;

use super::decode::copy_video_frame;
use super::utils::{ffmpeg_error, pixel_to_ffmpeg};
use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::{ColorRange, Picture, ScaleRequest, Scaler};

/// H.273 "unspecified" matrix coefficients.
const COLOR_SPACE_UNSPECIFIED: i32 = 2;
/// BT.601, the swscale default.
const COLOR_SPACE_BT601: i32 = 5;

pub struct FfmpegScaler {
    context: scaling::Context,
    request: ScaleRequest,
}

// SAFETY: the SwsContext is owned by this scaler and only used through
// `&mut self`.
unsafe impl Send for FfmpegScaler {}

impl FfmpegScaler {
    pub fn new(request: &ScaleRequest) -> Result<Self> {
        let mut context = scaling::Context::get(
            pixel_to_ffmpeg(request.source_format),
            request.source_width,
            request.source_height,
            pixel_to_ffmpeg(request.target_format),
            request.target_width,
            request.target_height,
            scaling::Flags::from_bits_truncate(request.resizer.code() as _),
        )
        .map_err(|e| {
            ffmpeg_error(
                ErrorKind::Scaling,
                ErrorSubkind::InvalidArgument,
                format!(
                    "Can't convert {} {}x{} to {} {}x{}",
                    request.source_format.name(),
                    request.source_width,
                    request.source_height,
                    request.target_format.name(),
                    request.target_width,
                    request.target_height
                ),
                e,
            )
        })?;

        let color_space = match request.color_space {
            0 | COLOR_SPACE_UNSPECIFIED => COLOR_SPACE_BT601,
            cs => cs,
        };
        let src_range = match request.color_range {
            ColorRange::Jpeg => 1,
            ColorRange::Mpeg => 0,
            ColorRange::Unspecified => i32::from(request.source_format.is_rgb()),
        };
        let dst_range = if request.target_format.is_rgb() {
            1
        } else {
            src_range
        };
        // SAFETY: the context is valid; sws_getCoefficients returns a pointer
        // to a static table.
        unsafe {
            let table = ffmpeg::ffi::sws_getCoefficients(color_space);
            ffmpeg::ffi::sws_setColorspaceDetails(
                context.as_mut_ptr(),
                table,
                src_range,
                table,
                dst_range,
                0,
                1 << 16,
                1 << 16,
            );
        }

        tracing::debug!(?request, "created scaler");
        Ok(Self {
            context,
            request: request.clone(),
        })
    }
}

impl Scaler for FfmpegScaler {
    fn scale(&mut self, source: &Picture) -> Result<Picture> {
        if source.format != self.request.source_format
            || source.width != self.request.source_width
            || source.height != self.request.source_height
        {
            return Err(Error::new(
                ErrorKind::Scaling,
                ErrorSubkind::InvalidArgument,
                "Picture doesn't match the scaler input",
            ));
        }

        let mut input = ffmpeg::util::frame::Video::new(
            pixel_to_ffmpeg(source.format),
            source.width,
            source.height,
        );
        for plane in 0..source.planes.len() {
            let (row_bytes, rows) = source.format.plane_geometry(plane, source.width, source.height);
            let stride = input.stride(plane);
            let dst = input.data_mut(plane);
            for y in 0..rows {
                dst[y * stride..y * stride + row_bytes].copy_from_slice(source.row(plane, y));
            }
        }

        let mut output = ffmpeg::util::frame::Video::empty();
        self.context
            .run(&input, &mut output)
            .map_err(|e| ffmpeg_error(ErrorKind::Scaling, ErrorSubkind::Unknown, "sws_scale", e))?;
        Ok(copy_video_frame(&output, self.request.target_format))
    }
}
