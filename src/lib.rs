//! # framedecode
//!
//! Turn compressed video packets into raw frames, then crop, scale and
//! convert those frames into caller-owned buffers.
//!
//! `framedecode` sits between a demuxer (which you bring) and whatever
//! consumes pixels. It wraps FFmpeg's decoders and `swscale` via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate and adds
//! optional hardware decoding through QSV, CUDA, VAAPI, DXVA2, D3D11VA or
//! VideoToolbox.
//!
//! ## Quick Start
//!
//! ### Decode a Stream
//!
//! ```no_run
//! use ffmpeg_next::codec::Id;
//! use framedecode::{DecodeInput, DecodeOutcome, Decoder, HardwareAccelerationMode};
//!
//! # fn demux() -> (Vec<u8>, Vec<Vec<u8>>) { (Vec::new(), Vec::new()) }
//! let (headers, packets) = demux();
//! let mut decoder = Decoder::new(Id::H264, HardwareAccelerationMode::Software)?;
//! decoder.set_extradata(&headers)?;
//!
//! for packet in &packets {
//!     let mut input = DecodeInput::Packet(packet);
//!     while let DecodeOutcome::Frame(frame) = decoder.decode(input)? {
//!         println!("{}x{}", frame.width, frame.height);
//!         input = DecodeInput::Poll;
//!     }
//! }
//! # Ok::<(), framedecode::FrameDecodeError>(())
//! ```
//!
//! ### Crop and Convert a Frame
//!
//! ```no_run
//! use ffmpeg_next::format::Pixel;
//! use framedecode::{Scaler, ScalerOptions, SourceRect};
//!
//! # fn run(decoder: &framedecode::Decoder) -> Result<(), framedecode::FrameDecodeError> {
//! let frame = decoder.frame().unwrap();
//! let mut scaler = Scaler::new(
//!     ScalerOptions::new(SourceRect::new(100, 50, 640, 480), frame.format(), 320, 240, Pixel::RGB24)
//!         .with_frame_bounds(frame.width(), frame.height()),
//! )?;
//!
//! let image = scaler.scale_to_image(frame)?;
//! image.save("crop.png").ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **One frame per call**: each decode call submits at most one packet and
//!   returns at most one frame; `Poll` and `Flush` drain buffered output
//! - **Extradata** is copied into padded FFmpeg memory and the codec is
//!   reopened around it
//! - **Hardware decoding** with a 32-surface pool per decoder and no silent
//!   software fallback
//! - **Cropping** of planar and packed formats, including subsampled chroma
//! - **C ABI** behind the `capi` feature for hosts in other languages
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `capi` | Exports `create_video_decoder`, `decode_video_frame`, `scale_decoded_video_frame` and friends |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system. Hardware
//! decoding additionally needs an FFmpeg build with the matching hwaccel and
//! working drivers.

#[cfg(feature = "capi")]
pub mod capi;
pub mod configuration;
pub mod decoder;
pub mod error;
pub mod ffmpeg;
pub mod hardware_acceleration;
pub mod pixel_format;
pub mod scaler;

pub use configuration::DecoderOptions;
pub use decoder::{DecodeInput, DecodeOutcome, Decoder, DecoderState, FrameDescriptor};
pub use error::FrameDecodeError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use hardware_acceleration::{
    HardwareAccelerationMode, HardwareDevice, HardwareDeviceType, available_hardware_devices,
};
pub use pixel_format::PixelFormatInfo;
pub use scaler::{Scaler, ScalerOptions, ScalingQuality, SourceRect, crop_plane_offset};
