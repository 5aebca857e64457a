//! C ABI for hosts that load the crate as a shared library.
//!
//! Handles are boxed Rust values passed around as opaque pointers. Every
//! function returns a status code: `0` on success, a negative
//! `FRAMEDECODE_ERROR_*` value on failure, or one of the positive
//! non-error decode outcomes ([`FRAMEDECODE_NO_FRAME_YET`],
//! [`FRAMEDECODE_END_OF_STREAM`]).
//!
//! Codec and pixel-format integers are FFmpeg's own `AVCodecID` and
//! `AVPixelFormat` values; unknown values are rejected with
//! [`FRAMEDECODE_ERROR_INVALID_ARGUMENT`].

use std::os::raw::c_int;

use ffmpeg_next::codec::Id as CodecId;
use ffmpeg_sys_next::AVPixelFormat;

use crate::{
    decoder::{DecodeInput, DecodeOutcome, Decoder},
    error::FrameDecodeError,
    hardware_acceleration::{HardwareAccelerationMode, HardwareDeviceType},
    pixel_format,
    scaler::{Scaler, ScalerOptions, ScalingQuality, SourceRect},
};

pub const FRAMEDECODE_OK: c_int = 0;
pub const FRAMEDECODE_NO_FRAME_YET: c_int = 1;
pub const FRAMEDECODE_END_OF_STREAM: c_int = 2;

pub const FRAMEDECODE_ERROR_INVALID_ARGUMENT: c_int = -1;
pub const FRAMEDECODE_ERROR_ALLOCATION_FAILED: c_int = -2;
pub const FRAMEDECODE_ERROR_UNSUPPORTED_CODEC: c_int = -3;
pub const FRAMEDECODE_ERROR_UNSUPPORTED_CONVERSION: c_int = -4;
pub const FRAMEDECODE_ERROR_DEVICE_OPEN_FAILED: c_int = -5;
pub const FRAMEDECODE_ERROR_REOPEN_FAILED: c_int = -6;
pub const FRAMEDECODE_ERROR_DECODE: c_int = -7;
pub const FRAMEDECODE_ERROR_INVALID_GEOMETRY: c_int = -8;
pub const FRAMEDECODE_ERROR_DECODER_CLOSED: c_int = -9;
pub const FRAMEDECODE_ERROR_FFMPEG: c_int = -10;

fn status_of(error: &FrameDecodeError) -> c_int {
    match error {
        FrameDecodeError::InvalidArgument(_) => FRAMEDECODE_ERROR_INVALID_ARGUMENT,
        FrameDecodeError::AllocationFailed(_) => FRAMEDECODE_ERROR_ALLOCATION_FAILED,
        FrameDecodeError::UnsupportedCodec { .. } => FRAMEDECODE_ERROR_UNSUPPORTED_CODEC,
        FrameDecodeError::UnsupportedConversion { .. } => FRAMEDECODE_ERROR_UNSUPPORTED_CONVERSION,
        FrameDecodeError::DeviceOpenFailed { .. } => FRAMEDECODE_ERROR_DEVICE_OPEN_FAILED,
        FrameDecodeError::ReopenFailed(_) => FRAMEDECODE_ERROR_REOPEN_FAILED,
        FrameDecodeError::DecodeError(_) => FRAMEDECODE_ERROR_DECODE,
        FrameDecodeError::InvalidGeometry { .. } => FRAMEDECODE_ERROR_INVALID_GEOMETRY,
        FrameDecodeError::DecoderClosed => FRAMEDECODE_ERROR_DECODER_CLOSED,
        FrameDecodeError::FfmpegError(_) => FRAMEDECODE_ERROR_FFMPEG,
    }
}

fn report(error: FrameDecodeError) -> c_int {
    log::debug!("C call failed: {error}");
    status_of(&error)
}

/// Map the host's acceleration selector.
fn acceleration_mode(value: c_int) -> Option<HardwareAccelerationMode> {
    let device = match value {
        0 => return Some(HardwareAccelerationMode::Software),
        1 => HardwareDeviceType::Qsv,
        2 => HardwareDeviceType::Cuda,
        3 => HardwareDeviceType::Vaapi,
        4 => HardwareDeviceType::Dxva2,
        5 => HardwareDeviceType::D3d11va,
        6 => HardwareDeviceType::VideoToolbox,
        _ => return None,
    };
    Some(HardwareAccelerationMode::Hardware(device))
}

/// Map a raw `AVCodecID` by walking FFmpeg's codec descriptor table, so
/// values the linked build does not know are never transmuted.
fn codec_from_raw(value: c_int) -> Option<CodecId> {
    let mut descriptor = std::ptr::null();
    loop {
        descriptor = unsafe { ffmpeg_sys_next::avcodec_descriptor_next(descriptor) };
        if descriptor.is_null() {
            return None;
        }
        let id = unsafe { (*descriptor).id };
        if id as c_int == value {
            return Some(CodecId::from(id));
        }
    }
}

fn pixel_to_raw(format: ffmpeg_next::format::Pixel) -> c_int {
    AVPixelFormat::from(format) as c_int
}

fn non_negative(value: c_int) -> Option<u32> {
    u32::try_from(value).ok()
}

/// Create a decoder and store its handle in `*handle`.
///
/// # Safety
///
/// `handle` must be valid for a pointer-sized write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn create_video_decoder(
    codec_id: c_int,
    hw_accel: c_int,
    handle: *mut *mut Decoder,
) -> c_int {
    if handle.is_null() {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    }
    unsafe { *handle = std::ptr::null_mut() };

    if let Err(error) = crate::ffmpeg::initialize() {
        return report(error);
    }

    let Some(codec) = codec_from_raw(codec_id) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    let Some(mode) = acceleration_mode(hw_accel) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };

    match Decoder::new(codec, mode) {
        Ok(decoder) => {
            unsafe { *handle = Box::into_raw(Box::new(decoder)) };
            FRAMEDECODE_OK
        }
        Err(error) => report(error),
    }
}

/// Install codec headers on a decoder. The bytes are copied.
///
/// # Safety
///
/// `handle` must come from [`create_video_decoder`] and not be removed;
/// `extradata` must be readable for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn set_video_decoder_extradata(
    handle: *mut Decoder,
    extradata: *const u8,
    length: c_int,
) -> c_int {
    let Some(decoder) = (unsafe { handle.as_mut() }) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    let length = match usize::try_from(length) {
        Ok(length) if length > 0 && !extradata.is_null() => length,
        _ => return FRAMEDECODE_ERROR_INVALID_ARGUMENT,
    };

    let bytes = unsafe { std::slice::from_raw_parts(extradata, length) };
    match decoder.set_extradata(bytes) {
        Ok(()) => FRAMEDECODE_OK,
        Err(error) => report(error),
    }
}

/// Submit a packet and try to pull one frame.
///
/// A null `data` pointer polls for pending output; a non-null pointer with
/// `length == 0` flushes. The frame geometry is written only when a frame
/// is produced.
///
/// # Safety
///
/// `handle` must be a live decoder handle, `data` readable for `length`
/// bytes when non-null, and the out-pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn decode_video_frame(
    handle: *mut Decoder,
    data: *const u8,
    length: c_int,
    frame_width: *mut c_int,
    frame_height: *mut c_int,
    frame_format: *mut c_int,
) -> c_int {
    let Some(decoder) = (unsafe { handle.as_mut() }) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    if frame_width.is_null() || frame_height.is_null() || frame_format.is_null() {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    }

    let input = if data.is_null() {
        DecodeInput::Poll
    } else {
        match usize::try_from(length) {
            Ok(0) => DecodeInput::Flush,
            Ok(length) => DecodeInput::Packet(unsafe { std::slice::from_raw_parts(data, length) }),
            Err(_) => return FRAMEDECODE_ERROR_INVALID_ARGUMENT,
        }
    };

    match decoder.decode(input) {
        Ok(DecodeOutcome::Frame(descriptor)) => {
            unsafe {
                *frame_width = descriptor.width as c_int;
                *frame_height = descriptor.height as c_int;
                *frame_format = pixel_to_raw(descriptor.format);
            }
            FRAMEDECODE_OK
        }
        Ok(DecodeOutcome::NoFrameYet) => FRAMEDECODE_NO_FRAME_YET,
        Ok(DecodeOutcome::EndOfStream) => FRAMEDECODE_END_OF_STREAM,
        Err(error) => report(error),
    }
}

/// Release a decoder. Null is ignored.
///
/// # Safety
///
/// `handle` must be null or a decoder handle that has not been removed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn remove_video_decoder(handle: *mut Decoder) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

/// Create a scaler and store its handle in `*handle`.
///
/// `quality` is an `SWS_*` flag word: one algorithm bit (none means
/// bicubic) plus any modifier bits, which are passed to FFmpeg unchanged.
///
/// # Safety
///
/// `handle` must be valid for a pointer-sized write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn create_video_scaler(
    source_left: c_int,
    source_top: c_int,
    source_width: c_int,
    source_height: c_int,
    source_format: c_int,
    scaled_width: c_int,
    scaled_height: c_int,
    scaled_format: c_int,
    quality: c_int,
    handle: *mut *mut Scaler,
) -> c_int {
    if handle.is_null() {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    }
    unsafe { *handle = std::ptr::null_mut() };

    if let Err(error) = crate::ffmpeg::initialize() {
        return report(error);
    }

    let (Some(left), Some(top), Some(width), Some(height)) = (
        non_negative(source_left),
        non_negative(source_top),
        non_negative(source_width),
        non_negative(source_height),
    ) else {
        return FRAMEDECODE_ERROR_INVALID_GEOMETRY;
    };
    let (Some(scaled_width), Some(scaled_height)) =
        (non_negative(scaled_width), non_negative(scaled_height))
    else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    let (Some(source_format), Some(scaled_format)) = (
        pixel_format::from_raw(source_format),
        pixel_format::from_raw(scaled_format),
    ) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    let Some(algorithm) = ScalingQuality::from_sws_flags(quality) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };

    let options = ScalerOptions::new(
        SourceRect::new(left, top, width, height),
        source_format,
        scaled_width,
        scaled_height,
        scaled_format,
    )
    .with_quality(algorithm)
    .with_extra_sws_flags(quality);

    match Scaler::new(options) {
        Ok(scaler) => {
            unsafe { *handle = Box::into_raw(Box::new(scaler)) };
            FRAMEDECODE_OK
        }
        Err(error) => report(error),
    }
}

/// Scale the decoder's current frame into `buffer`.
///
/// # Safety
///
/// Both handles must be live; `buffer` must be writable for
/// `stride * (scaled_height - 1)` bytes plus one destination row.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scale_decoded_video_frame(
    decoder: *mut Decoder,
    scaler: *mut Scaler,
    buffer: *mut u8,
    stride: c_int,
) -> c_int {
    let (Some(decoder), Some(scaler)) = (unsafe { decoder.as_ref() }, unsafe { scaler.as_mut() })
    else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    let Ok(stride) = usize::try_from(stride) else {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    };
    if buffer.is_null() {
        return FRAMEDECODE_ERROR_INVALID_ARGUMENT;
    }
    let Some(frame) = decoder.frame() else {
        return report(FrameDecodeError::InvalidArgument(
            "decoder holds no frame".to_string(),
        ));
    };

    let length = scaler.required_buffer_len(stride);
    let destination = unsafe { std::slice::from_raw_parts_mut(buffer, length) };
    match scaler.scale(frame, destination, stride) {
        Ok(()) => FRAMEDECODE_OK,
        Err(error) => report(error),
    }
}

/// Release a scaler. Null is ignored.
///
/// # Safety
///
/// `handle` must be null or a scaler handle that has not been removed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn remove_video_scaler(handle: *mut Scaler) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceleration_selectors() {
        assert_eq!(acceleration_mode(0), Some(HardwareAccelerationMode::Software));
        assert_eq!(
            acceleration_mode(3),
            Some(HardwareAccelerationMode::Hardware(HardwareDeviceType::Vaapi))
        );
        assert_eq!(acceleration_mode(7), None);
        assert_eq!(acceleration_mode(-1), None);
    }

    #[test]
    fn codec_ids_are_validated() {
        crate::ffmpeg::initialize().unwrap();
        let raw = ffmpeg_sys_next::AVCodecID::AV_CODEC_ID_H264 as c_int;
        assert_eq!(codec_from_raw(raw), Some(CodecId::H264));
        assert_eq!(codec_from_raw(-42), None);
    }

    #[test]
    fn decoder_handle_lifecycle() {
        let raw_codec = ffmpeg_sys_next::AVCodecID::AV_CODEC_ID_MPEG4 as c_int;
        let mut handle = std::ptr::null_mut();
        unsafe {
            assert_eq!(create_video_decoder(raw_codec, 0, &mut handle), FRAMEDECODE_OK);
            assert!(!handle.is_null());

            let (mut width, mut height, mut format) = (0, 0, 0);
            let status = decode_video_frame(
                handle,
                std::ptr::null(),
                0,
                &mut width,
                &mut height,
                &mut format,
            );
            assert_eq!(status, FRAMEDECODE_NO_FRAME_YET);

            let empty = [0u8; 1];
            let status =
                decode_video_frame(handle, empty.as_ptr(), 0, &mut width, &mut height, &mut format);
            assert_eq!(status, FRAMEDECODE_END_OF_STREAM);

            assert_eq!(
                set_video_decoder_extradata(handle, empty.as_ptr(), 0),
                FRAMEDECODE_ERROR_INVALID_ARGUMENT
            );

            remove_video_decoder(handle);
            remove_video_decoder(std::ptr::null_mut());
        }
    }

    #[test]
    fn unknown_hw_selector_is_rejected() {
        let raw_codec = ffmpeg_sys_next::AVCodecID::AV_CODEC_ID_MPEG4 as c_int;
        let mut handle = std::ptr::null_mut();
        let status = unsafe { create_video_decoder(raw_codec, 99, &mut handle) };
        assert_eq!(status, FRAMEDECODE_ERROR_INVALID_ARGUMENT);
        assert!(handle.is_null());
    }

    #[test]
    fn negative_crop_is_invalid_geometry() {
        let gray = AVPixelFormat::AV_PIX_FMT_GRAY8 as c_int;
        let mut handle = std::ptr::null_mut();
        let status =
            unsafe { create_video_scaler(-1, 0, 8, 8, gray, 8, 8, gray, 0x10, &mut handle) };
        assert_eq!(status, FRAMEDECODE_ERROR_INVALID_GEOMETRY);
        assert!(handle.is_null());

        let status = unsafe { create_video_scaler(0, 0, 8, 8, gray, 8, 8, gray, 0x10, &mut handle) };
        assert_eq!(status, FRAMEDECODE_OK);
        unsafe { remove_video_scaler(handle) };
    }

    #[test]
    fn quality_accepts_combined_sws_flags() {
        const SWS_BICUBIC: c_int = 0x4;
        const SWS_LANCZOS: c_int = 0x200;
        const SWS_ACCURATE_RND: c_int = 0x40000;

        let yuv = AVPixelFormat::AV_PIX_FMT_YUV420P as c_int;
        let rgb = AVPixelFormat::AV_PIX_FMT_RGB24 as c_int;

        for quality in [
            SWS_BICUBIC | SWS_ACCURATE_RND,
            SWS_LANCZOS,
            SWS_LANCZOS | SWS_ACCURATE_RND,
        ] {
            let mut handle = std::ptr::null_mut();
            let status = unsafe {
                create_video_scaler(0, 0, 32, 32, yuv, 16, 16, rgb, quality, &mut handle)
            };
            assert_eq!(status, FRAMEDECODE_OK, "quality {quality:#x}");
            assert!(!handle.is_null());
            unsafe { remove_video_scaler(handle) };
        }

        let mut handle = std::ptr::null_mut();
        let both = SWS_BICUBIC | SWS_LANCZOS;
        let status =
            unsafe { create_video_scaler(0, 0, 32, 32, yuv, 16, 16, rgb, both, &mut handle) };
        assert_eq!(status, FRAMEDECODE_ERROR_INVALID_ARGUMENT);
        assert!(handle.is_null());
    }
}
