//! Pixel-format catalog.
//!
//! A read-only view over FFmpeg's pixel format descriptor table. The scaler
//! uses it to find how many planes a frame has, how far each chroma plane is
//! subsampled, and how many bytes one pixel occupies in each plane.

use std::ffi::{CStr, CString};

use ffmpeg_next::format::Pixel;
use ffmpeg_sys_next::{
    AV_PIX_FMT_FLAG_HWACCEL, AVPixFmtDescriptor, AVPixelFormat, av_get_pix_fmt,
    av_pix_fmt_count_planes, av_pix_fmt_desc_get, av_pix_fmt_desc_get_id, av_pix_fmt_desc_next,
};

/// Maximum number of data planes a frame can carry (luma, two chroma, alpha).
pub const MAX_PLANES: usize = 4;

/// Layout facts about one pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatInfo {
    /// The format this entry describes.
    pub format: Pixel,
    /// FFmpeg's short name, e.g. `"yuv420p"`.
    pub name: &'static str,
    /// Number of data planes. Zero for hardware surface formats.
    pub plane_count: usize,
    /// log2 of the horizontal chroma subsampling factor.
    pub chroma_shift_x: u8,
    /// log2 of the vertical chroma subsampling factor.
    pub chroma_shift_y: u8,
    /// Bytes needed to store one sample of the first component.
    pub bytes_per_sample: usize,
    /// Distance in bytes between horizontally adjacent pixels, per plane.
    pub plane_steps: [usize; MAX_PLANES],
    /// `true` for opaque hardware surface formats (QSV, CUDA, VAAPI, ...).
    pub hardware: bool,
}

impl PixelFormatInfo {
    /// Subsampling shifts that apply to `plane`.
    ///
    /// Planes 1 and 2 carry chroma; plane 0 (luma or packed data) and plane 3
    /// (alpha) are always addressed at full resolution.
    pub fn plane_shifts(&self, plane: usize) -> (u8, u8) {
        if plane == 1 || plane == 2 {
            (self.chroma_shift_x, self.chroma_shift_y)
        } else {
            (0, 0)
        }
    }

    /// `true` when the format has chroma planes at reduced resolution.
    pub fn is_subsampled(&self) -> bool {
        self.chroma_shift_x > 0 || self.chroma_shift_y > 0
    }
}

/// Look up the layout of `format`.
///
/// Returns `None` for [`Pixel::None`] and any value FFmpeg has no descriptor
/// for.
pub fn describe(format: Pixel) -> Option<PixelFormatInfo> {
    let av_format: AVPixelFormat = format.into();
    let descriptor = unsafe { av_pix_fmt_desc_get(av_format) };
    if descriptor.is_null() {
        return None;
    }

    let descriptor: &AVPixFmtDescriptor = unsafe { &*descriptor };
    let plane_count = unsafe { av_pix_fmt_count_planes(av_format) }.max(0) as usize;
    let component_count = (descriptor.nb_components as usize).min(descriptor.comp.len());

    // A plane's pixel step is that of its first component. Packed 4:2:2
    // formats store chroma with twice the luma step on the same plane.
    let mut plane_steps = [0usize; MAX_PLANES];
    for component in &descriptor.comp[..component_count] {
        let plane = component.plane as usize;
        if plane < MAX_PLANES && plane_steps[plane] == 0 {
            plane_steps[plane] = component.step.max(0) as usize;
        }
    }

    let bytes_per_sample = descriptor.comp[..component_count]
        .first()
        .map(|component| (component.depth.max(0) as usize).div_ceil(8))
        .unwrap_or(0);

    let name = if descriptor.name.is_null() {
        ""
    } else {
        unsafe { CStr::from_ptr(descriptor.name) }
            .to_str()
            .unwrap_or("")
    };

    Some(PixelFormatInfo {
        format,
        name,
        plane_count: plane_count.min(MAX_PLANES),
        chroma_shift_x: descriptor.log2_chroma_w,
        chroma_shift_y: descriptor.log2_chroma_h,
        bytes_per_sample,
        plane_steps,
        hardware: descriptor.flags & (AV_PIX_FMT_FLAG_HWACCEL as u64) != 0,
    })
}

/// Resolve a format by its FFmpeg name (`"yuv420p"`, `"nv12"`, `"bgr24"`).
pub fn by_name(name: &str) -> Option<Pixel> {
    let name = CString::new(name).ok()?;
    let format = unsafe { av_get_pix_fmt(name.as_ptr()) };
    if format == AVPixelFormat::AV_PIX_FMT_NONE {
        None
    } else {
        Some(Pixel::from(format))
    }
}

/// Resolve a raw `AVPixelFormat` integer.
///
/// Walks FFmpeg's descriptor table instead of casting, so integers that do
/// not name a real format return `None`.
pub fn from_raw(value: i32) -> Option<Pixel> {
    let mut descriptor = unsafe { av_pix_fmt_desc_next(std::ptr::null()) };
    while !descriptor.is_null() {
        let format = unsafe { av_pix_fmt_desc_get_id(descriptor) };
        if format as i32 == value {
            return Some(Pixel::from(format));
        }
        descriptor = unsafe { av_pix_fmt_desc_next(descriptor) };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420p_has_three_half_resolution_planes() {
        let info = describe(Pixel::YUV420P).unwrap();
        assert_eq!(info.name, "yuv420p");
        assert_eq!(info.plane_count, 3);
        assert_eq!((info.chroma_shift_x, info.chroma_shift_y), (1, 1));
        assert_eq!(info.bytes_per_sample, 1);
        assert_eq!(info.plane_steps, [1, 1, 1, 0]);
        assert!(!info.hardware);
        assert_eq!(info.plane_shifts(0), (0, 0));
        assert_eq!(info.plane_shifts(2), (1, 1));
    }

    #[test]
    fn nv12_interleaves_chroma() {
        let info = describe(Pixel::NV12).unwrap();
        assert_eq!(info.plane_count, 2);
        assert_eq!(info.plane_steps[0], 1);
        assert_eq!(info.plane_steps[1], 2);
    }

    #[test]
    fn packed_422_steps_by_luma() {
        for format in [Pixel::YUYV422, Pixel::UYVY422, Pixel::YVYU422] {
            let info = describe(format).unwrap();
            assert_eq!(info.plane_count, 1, "{format:?}");
            assert_eq!(info.plane_steps[0], 2, "{format:?}");
            assert_eq!(info.chroma_shift_x, 1, "{format:?}");
        }
    }

    #[test]
    fn packed_rgb_is_single_plane() {
        let info = describe(Pixel::BGR24).unwrap();
        assert_eq!(info.plane_count, 1);
        assert_eq!(info.plane_steps[0], 3);
        assert!(!info.is_subsampled());
    }

    #[test]
    fn high_bit_depth_uses_two_bytes() {
        let info = describe(Pixel::YUV420P10LE).unwrap();
        assert_eq!(info.bytes_per_sample, 2);
        assert_eq!(info.plane_steps[0], 2);
    }

    #[test]
    fn hardware_surfaces_are_flagged() {
        let info = describe(Pixel::QSV).unwrap();
        assert!(info.hardware);
        assert_eq!(info.plane_count, 0);
    }

    #[test]
    fn none_has_no_descriptor() {
        assert!(describe(Pixel::None).is_none());
    }

    #[test]
    fn lookup_by_name_and_raw_value() {
        assert_eq!(by_name("gray"), Some(Pixel::GRAY8));
        assert_eq!(by_name("definitely-not-a-format"), None);

        let raw = AVPixelFormat::from(Pixel::BGRA) as i32;
        assert_eq!(from_raw(raw), Some(Pixel::BGRA));
        assert_eq!(from_raw(-42), None);
    }
}
