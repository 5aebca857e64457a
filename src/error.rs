//! Error types for the `framedecode` crate.
//!
//! [`FrameDecodeError`] is returned by every fallible decoder, scaler, and
//! hardware operation. "No frame yet" and "end of stream" are not errors;
//! they are reported through [`DecodeOutcome`](crate::DecodeOutcome).

use ffmpeg_next::{Error as FfmpegError, codec::Id as CodecId, format::Pixel};
use thiserror::Error;

use crate::hardware_acceleration::HardwareDeviceType;

/// The unified error type for all `framedecode` operations.
///
/// A [`DecodeError`](FrameDecodeError::DecodeError) or
/// [`InvalidGeometry`](FrameDecodeError::InvalidGeometry) only fails the
/// current call; the decoder or scaler stays usable afterwards.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameDecodeError {
    /// Empty, misaligned, or otherwise unusable input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// FFmpeg could not allocate a context, frame, or buffer.
    #[error("Allocation failed: {0}")]
    AllocationFailed(&'static str),

    /// No decoder implementation matches the codec and acceleration mode.
    #[error("Unsupported codec {codec:?}: {reason}")]
    UnsupportedCodec {
        /// The requested codec.
        codec: CodecId,
        /// Why the lookup failed.
        reason: String,
    },

    /// The scaler cannot convert between the requested pixel formats.
    #[error("Unsupported conversion from {from:?} to {to:?}: {reason}")]
    UnsupportedConversion {
        /// Source pixel format.
        from: Pixel,
        /// Destination pixel format.
        to: Pixel,
        /// Why the conversion was refused.
        reason: String,
    },

    /// The hardware device could not be opened or offered no usable surface
    /// format.
    #[error("Failed to open {device:?} device: {reason}")]
    DeviceOpenFailed {
        /// The requested device type.
        device: HardwareDeviceType,
        /// Underlying reason.
        reason: String,
    },

    /// The codec context could not be reopened after an extradata change.
    #[error("Failed to reopen codec with new extradata: {0}")]
    ReopenFailed(String),

    /// The bitstream could not be decoded.
    #[error("Failed to decode video packet: {0}")]
    DecodeError(String),

    /// The crop rectangle lies outside the source frame.
    #[error(
        "Crop rectangle {width}x{height}+{left}+{top} does not fit a {frame_width}x{frame_height} frame"
    )]
    InvalidGeometry {
        /// Crop origin, x.
        left: u32,
        /// Crop origin, y.
        top: u32,
        /// Crop width.
        width: u32,
        /// Crop height.
        height: u32,
        /// Width of the frame being cropped.
        frame_width: u32,
        /// Height of the frame being cropped.
        frame_height: u32,
    },

    /// The decoder was closed, either explicitly or after a fatal hardware
    /// negotiation failure.
    #[error("Decoder is closed")]
    DecoderClosed,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

impl From<FfmpegError> for FrameDecodeError {
    fn from(error: FfmpegError) -> Self {
        FrameDecodeError::FfmpegError(error.to_string())
    }
}
