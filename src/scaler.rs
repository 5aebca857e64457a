//! Cropping and pixel-format conversion of decoded frames.
//!
//! A [`Scaler`] is built once for a fixed source rectangle, source format,
//! destination size and destination format, then reused for every frame
//! with that geometry. Changing any of them means building a new scaler.
//!
//! When the source rectangle does not start at the frame origin, every
//! plane is read from an offset pointer. Chroma planes of subsampled formats
//! are addressed in chroma units, so their offsets are the crop origin
//! shifted right by the format's subsampling factors; see
//! [`crop_plane_offset`].
//!
//! # Example
//!
//! ```no_run
//! use ffmpeg_next::format::Pixel;
//! use framedecode::{Scaler, ScalerOptions, ScalingQuality, SourceRect};
//!
//! let options = ScalerOptions::new(
//!     SourceRect::new(64, 32, 1280, 720),
//!     Pixel::YUV420P,
//!     640,
//!     360,
//!     Pixel::BGR24,
//! )
//! .with_frame_bounds(1920, 1080)
//! .with_quality(ScalingQuality::Bicubic);
//!
//! let scaler = Scaler::new(options)?;
//! let mut pixels = vec![0u8; scaler.required_buffer_len(640 * 3)];
//! # Ok::<(), framedecode::FrameDecodeError>(())
//! ```

use std::os::raw::c_int;

use ffmpeg_next::{
    format::Pixel,
    frame::Video as VideoFrame,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::{
    error::FrameDecodeError,
    pixel_format::{self, MAX_PLANES, PixelFormatInfo},
};

/// Resampling filter used by the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingQuality {
    /// Fast, lower quality bilinear.
    FastBilinear,
    /// Bilinear. The default.
    #[default]
    Bilinear,
    /// Bicubic.
    Bicubic,
    /// Nearest neighbour. Copies samples unchanged when sizes match.
    Point,
    /// Area averaging, good for large downscales.
    Area,
    /// Bicubic for luma, bilinear for chroma.
    BicubicLinear,
    /// Gaussian.
    Gauss,
    /// Sinc.
    Sinc,
    /// Lanczos. Sharpest of the built-in filters.
    Lanczos,
    /// Natural bicubic spline.
    Spline,
    /// FFmpeg's experimental filter (`SWS_X`).
    Experimental,
}

/// `SWS_*` bits that choose the resampling algorithm. Higher bits are
/// modifiers such as `SWS_ACCURATE_RND`.
pub const SWS_ALGORITHM_MASK: i32 = 0x7FF;

impl ScalingQuality {
    fn to_scaling_flags(self) -> ScalingFlags {
        match self {
            ScalingQuality::FastBilinear => ScalingFlags::FAST_BILINEAR,
            ScalingQuality::Bilinear => ScalingFlags::BILINEAR,
            ScalingQuality::Bicubic => ScalingFlags::BICUBIC,
            ScalingQuality::Point => ScalingFlags::POINT,
            ScalingQuality::Area => ScalingFlags::AREA,
            ScalingQuality::BicubicLinear => ScalingFlags::BICUBLIN,
            ScalingQuality::Gauss => ScalingFlags::GAUSS,
            ScalingQuality::Sinc => ScalingFlags::SINC,
            ScalingQuality::Lanczos => ScalingFlags::LANCZOS,
            ScalingQuality::Spline => ScalingFlags::SPLINE,
            ScalingQuality::Experimental => ScalingFlags::X,
        }
    }

    /// Algorithm selected by a raw `SWS_*` flag word.
    ///
    /// Modifier bits are ignored here; pass them on with
    /// [`ScalerOptions::with_extra_sws_flags`]. A word without an algorithm
    /// bit means bicubic, as in FFmpeg. More than one algorithm bit is
    /// rejected.
    pub fn from_sws_flags(flags: i32) -> Option<Self> {
        let quality = match flags & SWS_ALGORITHM_MASK {
            0x000 | 0x004 => ScalingQuality::Bicubic,
            0x001 => ScalingQuality::FastBilinear,
            0x002 => ScalingQuality::Bilinear,
            0x008 => ScalingQuality::Experimental,
            0x010 => ScalingQuality::Point,
            0x020 => ScalingQuality::Area,
            0x040 => ScalingQuality::BicubicLinear,
            0x080 => ScalingQuality::Gauss,
            0x100 => ScalingQuality::Sinc,
            0x200 => ScalingQuality::Lanczos,
            0x400 => ScalingQuality::Spline,
            _ => return None,
        };
        Some(quality)
    }
}

/// Region of the source frame to convert, in luma pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Width of the region.
    pub width: u32,
    /// Height of the region.
    pub height: u32,
}

impl SourceRect {
    /// A region starting at (`left`, `top`).
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// The whole of a `width` × `height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// `true` when the region starts at the frame origin.
    pub fn at_origin(&self) -> bool {
        self.left == 0 && self.top == 0
    }

    fn geometry_error(&self, frame_width: u32, frame_height: u32) -> FrameDecodeError {
        FrameDecodeError::InvalidGeometry {
            left: self.left,
            top: self.top,
            width: self.width,
            height: self.height,
            frame_width,
            frame_height,
        }
    }

    /// Check that the region is non-empty and lies inside a frame of the
    /// given size.
    pub fn check_within(&self, frame_width: u32, frame_height: u32) -> Result<(), FrameDecodeError> {
        let right = self.left.checked_add(self.width);
        let bottom = self.top.checked_add(self.height);

        match (right, bottom) {
            (Some(right), Some(bottom))
                if self.width > 0
                    && self.height > 0
                    && right <= frame_width
                    && bottom <= frame_height =>
            {
                Ok(())
            }
            _ => Err(self.geometry_error(frame_width, frame_height)),
        }
    }
}

/// Byte offset of the crop origin inside one plane.
///
/// `shift_x`/`shift_y` are the plane's log2 subsampling factors (zero for
/// luma and alpha), `pixel_step` the bytes between adjacent pixels in the
/// plane, and `line_stride` the plane's row pitch, which FFmpeg allows to be
/// negative for bottom-up frames.
pub fn crop_plane_offset(
    left: u32,
    top: u32,
    shift_x: u8,
    shift_y: u8,
    pixel_step: usize,
    line_stride: isize,
) -> isize {
    let row = (top >> shift_y) as isize;
    let column = (left >> shift_x) as isize * pixel_step as isize;
    row * line_stride + column
}

/// Settings for a [`Scaler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalerOptions {
    pub(crate) source: SourceRect,
    pub(crate) source_format: Pixel,
    pub(crate) frame_bounds: Option<(u32, u32)>,
    pub(crate) destination_width: u32,
    pub(crate) destination_height: u32,
    pub(crate) destination_format: Pixel,
    pub(crate) quality: ScalingQuality,
    pub(crate) extra_flags: i32,
}

impl ScalerOptions {
    /// Convert `source` of frames in `source_format` to a
    /// `destination_width` × `destination_height` image in
    /// `destination_format`.
    pub fn new(
        source: SourceRect,
        source_format: Pixel,
        destination_width: u32,
        destination_height: u32,
        destination_format: Pixel,
    ) -> Self {
        Self {
            source,
            source_format,
            frame_bounds: None,
            destination_width,
            destination_height,
            destination_format,
            quality: ScalingQuality::default(),
            extra_flags: 0,
        }
    }

    /// Declare the size of the frames that will be scaled so the source
    /// rectangle is validated at creation instead of on first use.
    #[must_use]
    pub fn with_frame_bounds(mut self, width: u32, height: u32) -> Self {
        self.frame_bounds = Some((width, height));
        self
    }

    /// Set the resampling filter. Defaults to bilinear.
    #[must_use]
    pub fn with_quality(mut self, quality: ScalingQuality) -> Self {
        self.quality = quality;
        self
    }

    /// OR raw `SWS_*` modifier bits (`SWS_ACCURATE_RND`, `SWS_BITEXACT`,
    /// `SWS_FULL_CHR_H_INT`, ...) into the conversion flags. Algorithm bits
    /// are dropped; the algorithm comes from [`with_quality`](Self::with_quality).
    #[must_use]
    pub fn with_extra_sws_flags(mut self, flags: i32) -> Self {
        self.extra_flags = flags & !SWS_ALGORITHM_MASK;
        self
    }
}

/// A reusable crop + scale + convert context.
pub struct Scaler {
    context: ScalingContext,
    options: ScalerOptions,
    source_info: PixelFormatInfo,
    destination_row_bytes: usize,
}

// The conversion context is owned exclusively and only used through
// `&mut self`.
unsafe impl Send for Scaler {}

impl Scaler {
    /// Build a scaler.
    ///
    /// # Errors
    ///
    /// - [`FrameDecodeError::InvalidGeometry`] if the source rectangle is
    ///   empty or outside the declared frame bounds. No conversion context
    ///   is allocated in that case.
    /// - [`FrameDecodeError::InvalidArgument`] for a zero destination size.
    /// - [`FrameDecodeError::UnsupportedConversion`] for hardware surface
    ///   formats, multi-plane destinations, or pairs FFmpeg cannot convert.
    pub fn new(options: ScalerOptions) -> Result<Self, FrameDecodeError> {
        crate::ffmpeg::initialize()?;

        let source = options.source;
        let (bound_width, bound_height) = options
            .frame_bounds
            .unwrap_or((source.left.saturating_add(source.width), source.top.saturating_add(source.height)));
        source.check_within(bound_width, bound_height)?;

        if options.destination_width == 0 || options.destination_height == 0 {
            return Err(FrameDecodeError::InvalidArgument(format!(
                "destination size {}x{} is empty",
                options.destination_width, options.destination_height
            )));
        }

        let unsupported = |reason: &str| FrameDecodeError::UnsupportedConversion {
            from: options.source_format,
            to: options.destination_format,
            reason: reason.to_string(),
        };

        let source_info = pixel_format::describe(options.source_format)
            .ok_or_else(|| unsupported("unknown source pixel format"))?;
        if source_info.hardware {
            return Err(unsupported(
                "hardware surfaces must be transferred to system memory before scaling",
            ));
        }

        // Packed 4:2:2 pixels share chroma in pairs; a crop cannot split one.
        let macropixel = 1u32 << source_info.chroma_shift_x;
        if source_info.plane_count == 1 && source.left % macropixel != 0 {
            return Err(source.geometry_error(bound_width, bound_height));
        }

        let destination_info = pixel_format::describe(options.destination_format)
            .ok_or_else(|| unsupported("unknown destination pixel format"))?;
        if destination_info.hardware || destination_info.plane_count != 1 {
            return Err(unsupported("destination must be a packed, single-plane format"));
        }

        let destination_row_bytes = unsafe {
            ffmpeg_sys_next::av_image_get_linesize(
                options.destination_format.into(),
                options.destination_width as c_int,
                0,
            )
        };
        if destination_row_bytes <= 0 {
            return Err(unsupported("destination row size is undefined"));
        }

        let context = ScalingContext::get(
            options.source_format,
            source.width,
            source.height,
            options.destination_format,
            options.destination_width,
            options.destination_height,
            options.quality.to_scaling_flags()
                | ScalingFlags::from_bits_truncate(options.extra_flags),
        )
        .map_err(|error| unsupported(&error.to_string()))?;

        log::debug!(
            "Created scaler {}x{}+{}+{} {} -> {}x{} {} ({:?})",
            source.width,
            source.height,
            source.left,
            source.top,
            source_info.name,
            options.destination_width,
            options.destination_height,
            destination_info.name,
            options.quality,
        );

        Ok(Self {
            context,
            options,
            source_info,
            destination_row_bytes: destination_row_bytes as usize,
        })
    }

    /// Convert `frame` into `destination`, whose rows are
    /// `destination_stride` bytes apart.
    ///
    /// # Errors
    ///
    /// - [`FrameDecodeError::InvalidGeometry`] if the source rectangle does
    ///   not fit inside `frame`. The scaler stays usable.
    /// - [`FrameDecodeError::InvalidArgument`] if the frame's pixel format
    ///   differs from the configured one, or `destination` is too small.
    pub fn scale(
        &mut self,
        frame: &VideoFrame,
        destination: &mut [u8],
        destination_stride: usize,
    ) -> Result<(), FrameDecodeError> {
        if destination_stride < self.destination_row_bytes {
            return Err(FrameDecodeError::InvalidArgument(format!(
                "destination stride {destination_stride} is smaller than a {} byte row",
                self.destination_row_bytes
            )));
        }
        let stride = c_int::try_from(destination_stride).map_err(|_| {
            FrameDecodeError::InvalidArgument(format!(
                "destination stride {destination_stride} is too large"
            ))
        })?;

        let required = self.required_buffer_len(destination_stride);
        if destination.len() < required {
            return Err(FrameDecodeError::InvalidArgument(format!(
                "destination holds {} bytes, {required} needed",
                destination.len()
            )));
        }

        let (source_planes, source_strides) = self.source_planes(frame)?;

        let destination_planes: [*mut u8; MAX_PLANES] = [
            destination.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        ];
        let destination_strides: [c_int; MAX_PLANES] = [stride, 0, 0, 0];

        let rows = unsafe {
            ffmpeg_sys_next::sws_scale(
                self.context.as_mut_ptr(),
                source_planes.as_ptr(),
                source_strides.as_ptr(),
                0,
                self.options.source.height as c_int,
                destination_planes.as_ptr(),
                destination_strides.as_ptr(),
            )
        };

        if rows < 0 {
            return Err(ffmpeg_next::Error::from(rows).into());
        }
        Ok(())
    }

    /// Convert `frame` into a new [`DynamicImage`].
    ///
    /// Only available for RGB24, RGBA and GRAY8 destinations.
    pub fn scale_to_image(&mut self, frame: &VideoFrame) -> Result<DynamicImage, FrameDecodeError> {
        let width = self.options.destination_width;
        let height = self.options.destination_height;
        let format = self.options.destination_format;

        if !matches!(format, Pixel::RGB24 | Pixel::RGBA | Pixel::GRAY8) {
            return Err(FrameDecodeError::UnsupportedConversion {
                from: self.options.source_format,
                to: format,
                reason: "images can only be built from rgb24, rgba or gray8".to_string(),
            });
        }

        let stride = self.destination_row_bytes;
        let mut buffer = vec![0u8; stride * height as usize];
        self.scale(frame, &mut buffer, stride)?;

        let image = match format {
            Pixel::RGB24 => RgbImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgb8),
            Pixel::RGBA => RgbaImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgba8),
            _ => GrayImage::from_raw(width, height, buffer).map(DynamicImage::ImageLuma8),
        };

        image.ok_or_else(|| {
            FrameDecodeError::InvalidArgument("scaled buffer does not match image size".to_string())
        })
    }

    /// Smallest destination buffer for rows `destination_stride` bytes
    /// apart.
    pub fn required_buffer_len(&self, destination_stride: usize) -> usize {
        let rows = self.options.destination_height as usize;
        destination_stride * rows.saturating_sub(1) + self.destination_row_bytes
    }

    /// The source rectangle this scaler reads.
    pub fn source(&self) -> SourceRect {
        self.options.source
    }

    /// Source pixel format.
    pub fn source_format(&self) -> Pixel {
        self.options.source_format
    }

    /// Destination size and format as `(width, height, format)`.
    pub fn destination(&self) -> (u32, u32, Pixel) {
        (
            self.options.destination_width,
            self.options.destination_height,
            self.options.destination_format,
        )
    }

    /// Per-plane read pointers and strides for `frame`, offset to the crop
    /// origin.
    fn source_planes(
        &self,
        frame: &VideoFrame,
    ) -> Result<([*const u8; MAX_PLANES], [c_int; MAX_PLANES]), FrameDecodeError> {
        if frame.format() != self.options.source_format {
            return Err(FrameDecodeError::InvalidArgument(format!(
                "frame is {:?}, scaler expects {:?}",
                frame.format(),
                self.options.source_format
            )));
        }

        let source = self.options.source;
        source.check_within(frame.width(), frame.height())?;

        let mut planes = [std::ptr::null::<u8>(); MAX_PLANES];
        let mut strides: [c_int; MAX_PLANES] = [0; MAX_PLANES];

        let raw = unsafe { frame.as_ptr() };
        for plane in 0..self.source_info.plane_count {
            let (data, stride) = unsafe { ((*raw).data[plane], (*raw).linesize[plane]) };
            if data.is_null() {
                return Err(FrameDecodeError::InvalidArgument(format!(
                    "frame plane {plane} has no data"
                )));
            }

            strides[plane] = stride;
            planes[plane] = if source.at_origin() {
                data
            } else {
                let (shift_x, shift_y) = self.source_info.plane_shifts(plane);
                let offset = crop_plane_offset(
                    source.left,
                    source.top,
                    shift_x,
                    shift_y,
                    self.source_info.plane_steps[plane],
                    stride as isize,
                );
                unsafe { data.offset(offset) }
            };
        }

        Ok((planes, strides))
    }
}

impl std::fmt::Debug for Scaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scaler").field("options", &self.options).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_offset_is_halved_for_420() {
        // (2, 2) in luma is (1, 1) in a 4:2:0 chroma plane.
        assert_eq!(crop_plane_offset(2, 2, 1, 1, 1, 64), 64 + 1);
        assert_eq!(crop_plane_offset(2, 2, 0, 0, 1, 128), 2 * 128 + 2);
    }

    #[test]
    fn odd_origins_truncate_in_chroma() {
        assert_eq!(crop_plane_offset(3, 5, 1, 1, 1, 10), 2 * 10 + 1);
        // 4:2:2 only halves horizontally.
        assert_eq!(crop_plane_offset(4, 4, 1, 0, 1, 10), 4 * 10 + 2);
    }

    #[test]
    fn pixel_step_scales_the_column() {
        // NV12 chroma interleaves U and V.
        assert_eq!(crop_plane_offset(4, 2, 1, 1, 2, 64), 64 + 4);
        // Packed BGR24.
        assert_eq!(crop_plane_offset(2, 1, 0, 0, 3, 30), 30 + 6);
    }

    #[test]
    fn negative_stride_walks_upwards() {
        assert_eq!(crop_plane_offset(0, 2, 0, 0, 1, -16), -32);
    }

    #[test]
    fn source_rect_bounds() {
        assert!(SourceRect::new(2, 2, 4, 4).check_within(8, 8).is_ok());
        assert!(SourceRect::new(4, 4, 4, 4).check_within(8, 8).is_ok());
        assert!(SourceRect::new(5, 0, 4, 4).check_within(8, 8).is_err());
        assert!(SourceRect::new(0, 0, 0, 4).check_within(8, 8).is_err());
        assert!(SourceRect::new(u32::MAX, 0, 2, 2).check_within(8, 8).is_err());
    }

    #[test]
    fn quality_from_raw_flags() {
        assert_eq!(ScalingQuality::from_sws_flags(4), Some(ScalingQuality::Bicubic));
        assert_eq!(ScalingQuality::from_sws_flags(0x10), Some(ScalingQuality::Point));
        assert_eq!(ScalingQuality::from_sws_flags(0x200), Some(ScalingQuality::Lanczos));
        assert_eq!(ScalingQuality::from_sws_flags(0x400), Some(ScalingQuality::Spline));
        assert_eq!(ScalingQuality::from_sws_flags(0), Some(ScalingQuality::Bicubic));
        // Two algorithms at once.
        assert_eq!(ScalingQuality::from_sws_flags(3), None);
    }

    #[test]
    fn modifier_bits_do_not_change_the_algorithm() {
        const SWS_ACCURATE_RND: i32 = 0x40000;
        const SWS_FULL_CHR_H_INT: i32 = 0x2000;

        assert_eq!(
            ScalingQuality::from_sws_flags(0x04 | SWS_ACCURATE_RND),
            Some(ScalingQuality::Bicubic)
        );
        assert_eq!(
            ScalingQuality::from_sws_flags(0x20 | SWS_ACCURATE_RND | SWS_FULL_CHR_H_INT),
            Some(ScalingQuality::Area)
        );

        let options = ScalerOptions::new(
            SourceRect::full(16, 16),
            Pixel::YUV420P,
            8,
            8,
            Pixel::RGB24,
        )
        .with_quality(ScalingQuality::Lanczos)
        .with_extra_sws_flags(0x200 | SWS_ACCURATE_RND);
        assert_eq!(options.extra_flags, SWS_ACCURATE_RND);
        assert!(Scaler::new(options).is_ok());
    }

    #[test]
    fn cropped_planes_point_at_the_crop_origin() {
        let mut frame = VideoFrame::new(Pixel::YUV420P, 16, 16);
        for plane in 0..3 {
            frame.data_mut(plane).fill(plane as u8);
        }

        let options = ScalerOptions::new(
            SourceRect::new(2, 2, 8, 8),
            Pixel::YUV420P,
            8,
            8,
            Pixel::GRAY8,
        )
        .with_frame_bounds(16, 16);
        let scaler = Scaler::new(options).unwrap();
        let (planes, strides) = scaler.source_planes(&frame).unwrap();

        let luma = frame.data(0).as_ptr();
        let chroma_u = frame.data(1).as_ptr();
        let chroma_v = frame.data(2).as_ptr();
        unsafe {
            assert_eq!(planes[0], luma.add(2 * frame.stride(0) + 2));
            assert_eq!(planes[1], chroma_u.add(frame.stride(1) + 1));
            assert_eq!(planes[2], chroma_v.add(frame.stride(2) + 1));
        }
        assert!(planes[3].is_null());
        assert_eq!(strides[1] as usize, frame.stride(1));
    }

    #[test]
    fn packed_422_crop_moves_two_bytes_per_pixel() {
        let frame = VideoFrame::new(Pixel::YUYV422, 16, 8);
        let options = ScalerOptions::new(
            SourceRect::new(2, 1, 8, 4),
            Pixel::YUYV422,
            8,
            4,
            Pixel::RGB24,
        )
        .with_frame_bounds(16, 8);
        let scaler = Scaler::new(options).unwrap();
        let (planes, _) = scaler.source_planes(&frame).unwrap();

        // Pixel 2 starts the second Y0 U Y1 V macropixel, four bytes in.
        unsafe {
            assert_eq!(planes[0], frame.data(0).as_ptr().add(frame.stride(0) + 4));
        }
        assert!(planes[1].is_null());
    }

    #[test]
    fn packed_422_crop_cannot_split_a_macropixel() {
        let options = ScalerOptions::new(
            SourceRect::new(1, 0, 8, 4),
            Pixel::UYVY422,
            8,
            4,
            Pixel::RGB24,
        )
        .with_frame_bounds(16, 8);
        assert!(matches!(
            Scaler::new(options),
            Err(FrameDecodeError::InvalidGeometry { left: 1, .. })
        ));
    }

    #[test]
    fn uncropped_planes_are_untouched() {
        let frame = VideoFrame::new(Pixel::NV12, 8, 8);
        let scaler = Scaler::new(ScalerOptions::new(
            SourceRect::full(8, 8),
            Pixel::NV12,
            8,
            8,
            Pixel::GRAY8,
        ))
        .unwrap();

        let (planes, _) = scaler.source_planes(&frame).unwrap();
        assert_eq!(planes[0], frame.data(0).as_ptr());
        assert_eq!(planes[1], frame.data(1).as_ptr());
        assert!(planes[2].is_null());
    }
}
