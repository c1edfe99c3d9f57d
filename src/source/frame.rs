//! Decoded frame and video track description

use crate::media::{ColorProperties, DecodedPicture, HdrMetadata, Picture, PixelFormat, Plane};

/// A decoded, optionally converted, video frame.
///
/// Borrowed from the source that produced it and replaced by the next
/// decode call.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub planes: Vec<Plane>,
    pub encoded_width: u32,
    pub encoded_height: u32,
    pub encoded_pixel_format: PixelFormat,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub converted_pixel_format: PixelFormat,
    /// Presentation timestamp in track time base
    pub pts: Option<i64>,
    pub keyframe: bool,
    pub repeat_pict: i32,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub pict_type: char,
    pub color: ColorProperties,
    pub hdr: HdrMetadata,
}

impl Frame {
    pub(crate) fn new(decoded: &DecodedPicture, pts: Option<i64>, output: Picture) -> Self {
        Self {
            encoded_width: decoded.picture.width,
            encoded_height: decoded.picture.height,
            encoded_pixel_format: decoded.picture.format,
            scaled_width: output.width,
            scaled_height: output.height,
            converted_pixel_format: output.format,
            planes: output.planes,
            pts,
            keyframe: decoded.keyframe,
            repeat_pict: decoded.repeat_pict,
            interlaced: decoded.interlaced,
            top_field_first: decoded.top_field_first,
            pict_type: decoded.pict_type,
            color: decoded.color,
            hdr: decoded.hdr,
        }
    }

    /// Bytes of `plane`, empty if the format has fewer planes.
    pub fn data(&self, plane: usize) -> &[u8] {
        self.planes.get(plane).map(|p| p.data.as_slice()).unwrap_or(&[])
    }

    /// Row stride of `plane` in bytes, 0 if absent.
    pub fn linesize(&self, plane: usize) -> usize {
        self.planes.get(plane).map(|p| p.stride).unwrap_or(0)
    }

    /// Row `y` of `plane` without padding.
    pub fn row(&self, plane: usize, y: usize) -> &[u8] {
        let (row_bytes, _) = self.converted_pixel_format.plane_geometry(
            plane,
            self.scaled_width,
            self.scaled_height,
        );
        let start = y * self.linesize(plane);
        &self.data(plane)[start..start + row_bytes]
    }
}

/// Video track description as seen through a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoProperties {
    pub fps_numerator: i32,
    pub fps_denominator: i32,
    /// Repeat-field rate: fps with field repeats applied
    pub rff_numerator: i32,
    pub rff_denominator: i32,
    pub num_frames: usize,
    pub sar_num: i32,
    pub sar_den: i32,
    pub crop_top: u32,
    pub crop_bottom: u32,
    pub crop_left: u32,
    pub crop_right: u32,
    pub top_field_first: bool,
    pub first_time: f64,
    pub last_time: f64,
    pub last_end_time: f64,
    /// Degrees clockwise
    pub rotation: i32,
    pub flip: i32,
    pub hdr: HdrMetadata,
}
