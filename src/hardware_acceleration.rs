//! Hardware backend adapter.
//!
//! Wraps an FFmpeg hardware device context and the surface pool a decoder
//! renders into. [`HardwareAccelerationMode`] is chosen once when a
//! [`Decoder`](crate::Decoder) is created and never changes afterwards.
//!
//! The format-negotiation callback installed on hardware decoders lives here
//! too. It receives nothing but the codec context and reads the device
//! binding straight from it, so no back-pointer to the owning decoder is
//! needed.
//!
//! # Platform Support
//!
//! Which devices work depends on the FFmpeg build and the host drivers. Use
//! [`available_hardware_devices`] to see what the linked FFmpeg was built
//! with. Unlike a best-effort player, the decoder never falls back to
//! software on its own: a device that cannot be opened is reported as
//! [`FrameDecodeError::DeviceOpenFailed`].

use std::{
    ffi::{CString, c_int, c_void},
    ptr::NonNull,
};

use ffmpeg_next::{Codec, format::Pixel};
use ffmpeg_sys_next::{
    AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX, AV_CODEC_HW_CONFIG_METHOD_HW_FRAMES_CTX,
    AVBufferRef, AVCodecContext, AVCodecHWConfig, AVHWDeviceContext, AVHWDeviceType,
    AVHWFramesContext, AVPixelFormat,
};

use crate::{error::FrameDecodeError, pixel_format};

/// Number of surfaces pre-allocated for a hardware decoder.
pub const SURFACE_POOL_SIZE: i32 = 32;

/// Surface dimensions are rounded up to a multiple of this value.
pub const SURFACE_ALIGNMENT: i32 = 32;

/// `MFX_MEMTYPE_VIDEO_MEMORY_DECODER_TARGET` from the Intel media SDK.
const MFX_MEMTYPE_VIDEO_MEMORY_DECODER_TARGET: c_int = 0x0010;

/// Leading fields of FFmpeg's `AVQSVFramesContext`, which ffmpeg-sys-next
/// does not bind. Only `frame_type` is written.
#[repr(C)]
struct QsvFramesContext {
    _surfaces: *mut c_void,
    _nb_surfaces: c_int,
    frame_type: c_int,
}

/// Hardware acceleration mode for video decoding.
///
/// # Example
///
/// ```no_run
/// use ffmpeg_next::codec::Id;
/// use framedecode::{Decoder, HardwareAccelerationMode, HardwareDeviceType};
///
/// let decoder = Decoder::new(
///     Id::H264,
///     HardwareAccelerationMode::Hardware(HardwareDeviceType::Qsv),
/// )?;
/// # Ok::<(), framedecode::FrameDecodeError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareAccelerationMode {
    /// Decode on the CPU.
    #[default]
    Software,
    /// Decode into surfaces of the given hardware device.
    Hardware(HardwareDeviceType),
}

impl HardwareAccelerationMode {
    /// The device requested by this mode, if any.
    pub fn device(self) -> Option<HardwareDeviceType> {
        match self {
            HardwareAccelerationMode::Software => None,
            HardwareAccelerationMode::Hardware(device) => Some(device),
        }
    }
}

/// Supported hardware device types for accelerated decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareDeviceType {
    /// Intel Quick Sync Video (cross-platform).
    Qsv,
    /// NVIDIA CUDA (Linux, Windows).
    Cuda,
    /// Video Acceleration API (Linux).
    Vaapi,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Apple VideoToolbox (macOS, iOS).
    VideoToolbox,
}

impl HardwareDeviceType {
    /// Every device type this crate knows how to drive.
    pub const ALL: [HardwareDeviceType; 6] = [
        HardwareDeviceType::Qsv,
        HardwareDeviceType::Cuda,
        HardwareDeviceType::Vaapi,
        HardwareDeviceType::Dxva2,
        HardwareDeviceType::D3d11va,
        HardwareDeviceType::VideoToolbox,
    ];

    pub(crate) fn to_av_hw_device_type(self) -> AVHWDeviceType {
        match self {
            HardwareDeviceType::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
            HardwareDeviceType::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HardwareDeviceType::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HardwareDeviceType::Dxva2 => AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HardwareDeviceType::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HardwareDeviceType::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
        }
    }

    pub(crate) fn from_av_hw_device_type(device_type: AVHWDeviceType) -> Option<Self> {
        match device_type {
            AVHWDeviceType::AV_HWDEVICE_TYPE_QSV => Some(HardwareDeviceType::Qsv),
            AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA => Some(HardwareDeviceType::Cuda),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI => Some(HardwareDeviceType::Vaapi),
            AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2 => Some(HardwareDeviceType::Dxva2),
            AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA => Some(HardwareDeviceType::D3d11va),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX => Some(HardwareDeviceType::VideoToolbox),
            _ => None,
        }
    }

    /// The opaque surface format decoded frames carry on this device.
    pub fn surface_format(self) -> Pixel {
        match self {
            HardwareDeviceType::Qsv => Pixel::QSV,
            HardwareDeviceType::Cuda => Pixel::CUDA,
            HardwareDeviceType::Vaapi => Pixel::VAAPI,
            HardwareDeviceType::Dxva2 => Pixel::DXVA2_VLD,
            HardwareDeviceType::D3d11va => Pixel::D3D11,
            HardwareDeviceType::VideoToolbox => Pixel::VIDEOTOOLBOX,
        }
    }

    /// Device string passed to FFmpeg when the caller does not pick one.
    pub fn default_device(self) -> Option<&'static str> {
        match self {
            HardwareDeviceType::Qsv => Some("auto"),
            _ => None,
        }
    }

    /// Name of the dedicated decoder for `codec` on this device, if the
    /// device uses named decoders rather than the generic hwaccel path.
    pub(crate) fn dedicated_decoder_name(self, codec: ffmpeg_next::codec::Id) -> Option<String> {
        use ffmpeg_next::codec::Id;

        if self != HardwareDeviceType::Qsv {
            return None;
        }

        let prefix = match codec {
            Id::H264 => "h264",
            Id::HEVC => "hevc",
            Id::AV1 => "av1",
            Id::VP8 => "vp8",
            Id::VP9 => "vp9",
            Id::MPEG2VIDEO => "mpeg2",
            Id::VC1 => "vc1",
            Id::MJPEG => "mjpeg",
            _ => return None,
        };
        Some(format!("{prefix}_qsv"))
    }
}

/// List all hardware device types supported by the linked FFmpeg build.
pub fn available_hardware_devices() -> Vec<HardwareDeviceType> {
    let mut devices = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;

    loop {
        device_type = unsafe { ffmpeg_sys_next::av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }

        if let Some(device) = HardwareDeviceType::from_av_hw_device_type(device_type) {
            devices.push(device);
        }
    }

    devices
}

/// Check whether `codec` can decode into surfaces of `device`.
pub fn codec_supports_device(codec: &Codec, device: HardwareDeviceType) -> bool {
    let codec_pointer = unsafe { codec.as_ptr() };
    if codec_pointer.is_null() {
        return false;
    }

    let wanted = device.to_av_hw_device_type();
    let accepted_methods = (AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX
        | AV_CODEC_HW_CONFIG_METHOD_HW_FRAMES_CTX) as i32;
    let mut index: i32 = 0;

    loop {
        let config: *const AVCodecHWConfig =
            unsafe { ffmpeg_sys_next::avcodec_get_hw_config(codec_pointer, index) };
        if config.is_null() {
            return false;
        }

        let (methods, device_type) = unsafe { ((*config).methods, (*config).device_type) };
        if methods & accepted_methods != 0 && device_type == wanted {
            return true;
        }

        index += 1;
    }
}

/// An open hardware device context.
///
/// Holds one reference on FFmpeg's `AVBufferRef`; dropping the value
/// releases it. Codec contexts bound to the device keep their own
/// references, so the device outlives whichever side is released last.
#[derive(Debug)]
pub struct HardwareDevice {
    reference: NonNull<AVBufferRef>,
    device_type: HardwareDeviceType,
}

impl HardwareDevice {
    /// Open a device of `device_type`.
    ///
    /// `device` selects a specific adapter (a DRM node for VAAPI, an index
    /// for CUDA); `None` uses the type's default.
    pub fn open(
        device_type: HardwareDeviceType,
        device: Option<&str>,
    ) -> Result<Self, FrameDecodeError> {
        let device_name = device
            .or(device_type.default_device())
            .map(CString::new)
            .transpose()
            .map_err(|_| {
                FrameDecodeError::InvalidArgument("device name contains a NUL byte".to_string())
            })?;

        let mut reference: *mut AVBufferRef = std::ptr::null_mut();
        let result = unsafe {
            ffmpeg_sys_next::av_hwdevice_ctx_create(
                &mut reference,
                device_type.to_av_hw_device_type(),
                device_name
                    .as_ref()
                    .map_or(std::ptr::null(), |name| name.as_ptr()),
                std::ptr::null_mut(),
                0,
            )
        };

        if result < 0 {
            return Err(FrameDecodeError::DeviceOpenFailed {
                device: device_type,
                reason: ffmpeg_next::Error::from(result).to_string(),
            });
        }

        let reference = NonNull::new(reference).ok_or(FrameDecodeError::DeviceOpenFailed {
            device: device_type,
            reason: "FFmpeg returned no device context".to_string(),
        })?;

        log::debug!("Opened {device_type:?} hardware device");
        Ok(Self {
            reference,
            device_type,
        })
    }

    /// The device type this context was opened for.
    pub fn device_type(&self) -> HardwareDeviceType {
        self.device_type
    }

    /// A new reference for a codec context to own.
    pub(crate) fn new_reference(&self) -> Result<*mut AVBufferRef, FrameDecodeError> {
        let reference = unsafe { ffmpeg_sys_next::av_buffer_ref(self.reference.as_ptr()) };
        if reference.is_null() {
            Err(FrameDecodeError::AllocationFailed("hardware device reference"))
        } else {
            Ok(reference)
        }
    }
}

impl Drop for HardwareDevice {
    fn drop(&mut self) {
        let mut reference = self.reference.as_ptr();
        unsafe { ffmpeg_sys_next::av_buffer_unref(&mut reference) };
        log::debug!("Released {:?} hardware device", self.device_type);
    }
}

// Accessed from a single owning thread at a time; FFmpeg device contexts are
// reference counted atomically.
unsafe impl Send for HardwareDevice {}

/// Geometry of a hardware surface pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePoolSpec {
    /// Opaque surface format (e.g. `Pixel::QSV`).
    pub surface_format: Pixel,
    /// Memory layout of the surfaces' contents (e.g. `Pixel::NV12`).
    pub software_format: Pixel,
    /// Surface width in pixels.
    pub width: i32,
    /// Surface height in pixels.
    pub height: i32,
    /// Number of surfaces allocated up front.
    pub pool_size: i32,
}

impl FramePoolSpec {
    /// Pool for a stream with the given coded size, aligned to
    /// [`SURFACE_ALIGNMENT`] and sized to [`SURFACE_POOL_SIZE`].
    pub fn for_coded_size(
        surface_format: Pixel,
        software_format: Pixel,
        coded_width: i32,
        coded_height: i32,
    ) -> Self {
        Self {
            surface_format,
            software_format,
            width: align_up(coded_width, SURFACE_ALIGNMENT),
            height: align_up(coded_height, SURFACE_ALIGNMENT),
            pool_size: SURFACE_POOL_SIZE,
        }
    }

    /// Grow the pool to cover what the codec's hwaccel asked for. Some
    /// backends need coarser alignment (HEVC on DXVA pads to 128 lines) or
    /// more surfaces for deep reference lists.
    pub fn covering(self, width: i32, height: i32, pool_size: i32) -> Self {
        Self {
            width: self.width.max(width),
            height: self.height.max(height),
            pool_size: self.pool_size.max(pool_size),
            ..self
        }
    }
}

/// Memory layout of hardware surfaces holding frames decoded as `decoded`.
///
/// Decoders write NV12 for 8-bit content and P010 for deeper samples,
/// whatever planar format the software path would produce.
pub fn surface_software_format(decoded: Pixel) -> Pixel {
    match pixel_format::describe(decoded) {
        Some(info) if info.bytes_per_sample > 1 => Pixel::P010LE,
        _ => Pixel::NV12,
    }
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
pub fn align_up(value: i32, alignment: i32) -> i32 {
    (value.max(0) + alignment - 1) & !(alignment - 1)
}

/// Allocate and initialise the surface pool for `context`.
///
/// FFmpeg's hwaccel fills in the device-specific parts (software format,
/// D3D11 bind flags, DXVA2 surface type). Named decoders without a hwaccel,
/// such as `h264_qsv`, get a pool built here instead. Either way the pool
/// is then sized and aligned per [`FramePoolSpec::for_coded_size`].
///
/// On success the returned reference is owned by the caller. On failure
/// nothing is leaked.
///
/// # Safety
///
/// `context` must be a valid codec context with a hardware device bound.
pub(crate) unsafe fn bind_frame_pool(
    context: *mut AVCodecContext,
    device_type: HardwareDeviceType,
    surface_format: Pixel,
) -> Result<(*mut AVBufferRef, FramePoolSpec), ffmpeg_next::Error> {
    let mut frames_reference: *mut AVBufferRef = std::ptr::null_mut();
    let suggested = unsafe {
        ffmpeg_sys_next::avcodec_get_hw_frames_parameters(
            context,
            (*context).hw_device_ctx,
            surface_format.into(),
            &mut frames_reference,
        )
    };

    if suggested < 0 {
        log::debug!(
            "No hwaccel frame parameters for {surface_format:?} ({}); building the pool directly",
            ffmpeg_next::Error::from(suggested)
        );
        frames_reference =
            unsafe { ffmpeg_sys_next::av_hwframe_ctx_alloc((*context).hw_device_ctx) };
        if frames_reference.is_null() {
            return Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::util::error::ENOMEM,
            });
        }
        unsafe {
            let frames = (*frames_reference).data as *mut AVHWFramesContext;
            (*frames).format = surface_format.into();
            (*frames).sw_format =
                surface_software_format(Pixel::from((*context).sw_pix_fmt)).into();
        }
    }

    let spec = unsafe {
        let frames = (*frames_reference).data as *mut AVHWFramesContext;
        let spec = FramePoolSpec::for_coded_size(
            surface_format,
            Pixel::from((*frames).sw_format),
            (*context).coded_width,
            (*context).coded_height,
        )
        .covering((*frames).width, (*frames).height, (*frames).initial_pool_size);

        (*frames).width = spec.width;
        (*frames).height = spec.height;
        (*frames).initial_pool_size = spec.pool_size;

        if device_type == HardwareDeviceType::Qsv {
            let qsv = (*frames).hwctx as *mut QsvFramesContext;
            if !qsv.is_null() {
                (*qsv).frame_type = MFX_MEMTYPE_VIDEO_MEMORY_DECODER_TARGET;
            }
        }
        spec
    };

    let result = unsafe { ffmpeg_sys_next::av_hwframe_ctx_init(frames_reference) };
    if result < 0 {
        unsafe { ffmpeg_sys_next::av_buffer_unref(&mut frames_reference) };
        return Err(ffmpeg_next::Error::from(result));
    }

    Ok((frames_reference, spec))
}

/// Pick `wanted` out of the formats a codec offers.
pub fn select_surface_format(candidates: &[Pixel], wanted: Pixel) -> Option<Pixel> {
    candidates.iter().copied().find(|&format| format == wanted)
}

/// Device type bound to a codec context, if any.
///
/// # Safety
///
/// `context` must point to a valid codec context.
pub(crate) unsafe fn bound_device_type(
    context: *const AVCodecContext,
) -> Option<HardwareDeviceType> {
    let device = unsafe { (*context).hw_device_ctx };
    if device.is_null() {
        return None;
    }
    let device_context = unsafe { (*device).data } as *const AVHWDeviceContext;
    HardwareDeviceType::from_av_hw_device_type(unsafe { (*device_context).type_ })
}

/// `true` when FFmpeg ran format negotiation on a hardware-bound context and
/// it ended without a surface pool.
///
/// FFmpeg records the software fallback format before calling `get_format`,
/// so a set `sw_pix_fmt` with no frames context means the callback refused
/// every candidate.
///
/// # Safety
///
/// `context` must point to a valid codec context.
pub(crate) unsafe fn negotiation_failed(context: *const AVCodecContext) -> bool {
    unsafe {
        !(*context).hw_device_ctx.is_null()
            && (*context).hw_frames_ctx.is_null()
            && (*context).sw_pix_fmt != AVPixelFormat::AV_PIX_FMT_NONE
    }
}

/// `get_format` callback for hardware decoders.
///
/// Selects the bound device's surface format and gives the codec a fresh
/// surface pool sized to the current coded dimensions. Called again on
/// mid-stream format changes, in which case the previous pool is released
/// first.
pub(crate) unsafe extern "C" fn negotiate_surface_format(
    context: *mut AVCodecContext,
    formats: *const AVPixelFormat,
) -> AVPixelFormat {
    let mut candidates = Vec::new();
    let mut cursor = formats;
    unsafe {
        while !cursor.is_null() && *cursor != AVPixelFormat::AV_PIX_FMT_NONE {
            candidates.push(Pixel::from(*cursor));
            cursor = cursor.add(1);
        }
    }

    let Some(device_type) = (unsafe { bound_device_type(context) }) else {
        log::error!("Format negotiation ran on a codec without a hardware device");
        return AVPixelFormat::AV_PIX_FMT_NONE;
    };

    let Some(surface_format) = select_surface_format(&candidates, device_type.surface_format())
    else {
        log::error!(
            "{device_type:?} surface format not offered during format negotiation (candidates: {candidates:?})"
        );
        return AVPixelFormat::AV_PIX_FMT_NONE;
    };

    unsafe {
        if !(*context).hw_frames_ctx.is_null() {
            ffmpeg_sys_next::av_buffer_unref(&mut (*context).hw_frames_ctx);
        }

        match bind_frame_pool(context, device_type, surface_format) {
            Ok((frames_reference, spec)) => {
                (*context).hw_frames_ctx = frames_reference;
                log::debug!(
                    "Bound {} {:?} surfaces of {}x{} ({:?})",
                    spec.pool_size,
                    spec.surface_format,
                    spec.width,
                    spec.height,
                    spec.software_format,
                );
                surface_format.into()
            }
            Err(error) => {
                log::error!("Failed to allocate {device_type:?} surface pool: {error}");
                AVPixelFormat::AV_PIX_FMT_NONE
            }
        }
    }
}
