//! Packet-to-frame decoding.
//!
//! [`Decoder`] owns one FFmpeg codec context, one reusable output frame, and
//! (in hardware mode) a device binding. Each [`decode`](Decoder::decode) call
//! accepts at most one input and pulls at most one frame:
//!
//! - [`DecodeInput::Packet`] feeds compressed data,
//! - [`DecodeInput::Flush`] signals end of stream so buffered frames come out,
//! - [`DecodeInput::Poll`] submits nothing and only pulls pending output.
//!
//! Codecs with reordering delay hold several packets before emitting the
//! first frame, and can hold several frames at once, so an orchestrator
//! drains with `Poll` after every `Frame` until it sees
//! [`DecodeOutcome::NoFrameYet`].
//!
//! A packet the codec cannot take yet (because it still has frames to hand
//! out) is kept by the decoder and resubmitted ahead of later input, so
//! callers that never poll lose nothing.
//!
//! # Example
//!
//! ```no_run
//! use ffmpeg_next::codec::Id;
//! use framedecode::{DecodeInput, DecodeOutcome, Decoder, HardwareAccelerationMode};
//!
//! # fn packets() -> Vec<Vec<u8>> { Vec::new() }
//! let mut decoder = Decoder::new(Id::H264, HardwareAccelerationMode::Software)?;
//!
//! for packet in packets() {
//!     let mut input = DecodeInput::Packet(&packet);
//!     while let DecodeOutcome::Frame(descriptor) = decoder.decode(input)? {
//!         println!("{}x{} {:?}", descriptor.width, descriptor.height, descriptor.format);
//!         input = DecodeInput::Poll;
//!     }
//! }
//!
//! while let DecodeOutcome::Frame(_) = decoder.decode(DecodeInput::Flush)? {}
//! # Ok::<(), framedecode::FrameDecodeError>(())
//! ```

use std::{collections::VecDeque, os::raw::c_int};

use ffmpeg_next::{
    Codec, Error as FfmpegError, Packet,
    codec::{Id as CodecId, context::Context as CodecContext},
    decoder::Video as VideoDecoder,
    format::Pixel,
    frame::Video as VideoFrame,
    media::Type as MediaType,
    util::error::EAGAIN,
};
use ffmpeg_sys_next::{AV_INPUT_BUFFER_PADDING_SIZE, AVCodecContext};

use crate::{
    configuration::DecoderOptions,
    error::FrameDecodeError,
    hardware_acceleration::{
        HardwareAccelerationMode, HardwareDevice, codec_supports_device, negotiate_surface_format,
        negotiation_failed,
    },
};

/// Input for one [`Decoder::decode`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeInput<'a> {
    /// A compressed packet. An empty slice is treated as [`Flush`](DecodeInput::Flush).
    Packet(&'a [u8]),
    /// End of input: make the codec release every buffered frame.
    Flush,
    /// No new input; only collect output the codec already holds.
    Poll,
}

/// Geometry and format of the frame produced by the last decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format. A hardware surface format in hardware mode.
    pub format: Pixel,
}

impl FrameDescriptor {
    fn of(frame: &VideoFrame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
        }
    }
}

/// Non-error result of a decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A frame is available through [`Decoder::frame`].
    Frame(FrameDescriptor),
    /// Input was accepted but no frame is ready. Call again with more
    /// input or a flush.
    NoFrameYet,
    /// Every frame has been delivered after a flush. Call
    /// [`Decoder::reset`] to decode more.
    EndOfStream,
}

/// Lifecycle of a [`Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Accepting packets.
    Open,
    /// A flush was submitted; buffered frames are being drained.
    Draining,
    /// The codec reported that all frames were delivered.
    EndOfStream,
    /// Resources were released. Terminal.
    Closed,
}

/// A single-stream video decoder.
///
/// The decoded frame is stored inside the decoder and overwritten by the
/// next [`decode`](Decoder::decode) call; [`frame`](Decoder::frame) borrows
/// it, so the borrow checker keeps it from being read after it was replaced.
///
/// The acceleration mode is fixed at creation. Dropping the decoder releases
/// the codec context, the frame, and any hardware device binding.
pub struct Decoder {
    codec: Codec,
    codec_id: CodecId,
    options: DecoderOptions,
    device: Option<HardwareDevice>,
    frame: Option<VideoFrame>,
    decoder: Option<VideoDecoder>,
    input: PendingInput,
    state: DecoderState,
    frame_ready: bool,
}

// Every FFmpeg object here is owned exclusively by this value and only
// touched through `&mut self`.
unsafe impl Send for Decoder {}

impl Decoder {
    /// Create a decoder for `codec_id` with default options.
    ///
    /// # Errors
    ///
    /// - [`FrameDecodeError::UnsupportedCodec`] if no decoder (or no
    ///   decoder for the requested device) exists.
    /// - [`FrameDecodeError::DeviceOpenFailed`] if the hardware device
    ///   cannot be opened or the codec refuses it.
    /// - [`FrameDecodeError::AllocationFailed`] on memory exhaustion.
    pub fn new(codec_id: CodecId, mode: HardwareAccelerationMode) -> Result<Self, FrameDecodeError> {
        Self::with_options(codec_id, DecoderOptions::new().with_hardware_acceleration(mode))
    }

    /// Create a decoder with explicit [`DecoderOptions`].
    ///
    /// Anything allocated before a failure is released before the error is
    /// returned.
    pub fn with_options(
        codec_id: CodecId,
        options: DecoderOptions,
    ) -> Result<Self, FrameDecodeError> {
        crate::ffmpeg::initialize()?;

        let mode = options.hardware_acceleration;
        let codec = resolve_codec(codec_id, mode)?;

        let device = match mode.device() {
            Some(device_type) => Some(HardwareDevice::open(device_type, options.device.as_deref())?),
            None => None,
        };

        let decoder = open_codec(codec, &options, device.as_ref(), None).map_err(|error| {
            match (error, mode.device()) {
                (FrameDecodeError::FfmpegError(reason), Some(device)) => {
                    FrameDecodeError::DeviceOpenFailed { device, reason }
                }
                (error, _) => error,
            }
        })?;

        log::info!(
            "Opened {} decoder for {codec_id:?} ({mode:?})",
            codec.name()
        );

        Ok(Self {
            codec,
            codec_id,
            options,
            device,
            frame: Some(VideoFrame::empty()),
            decoder: Some(decoder),
            input: PendingInput::default(),
            state: DecoderState::Open,
            frame_ready: false,
        })
    }

    /// Install out-of-band codec headers.
    ///
    /// The bytes are copied into a zero-padded buffer and the codec context
    /// is rebuilt and reopened around them. That costs far more than a
    /// decode call: do it once before decoding, or when the headers
    /// genuinely change, never per frame. Buffered frames are discarded.
    ///
    /// # Errors
    ///
    /// - [`FrameDecodeError::InvalidArgument`] if `extradata` is empty.
    /// - [`FrameDecodeError::ReopenFailed`] if the codec does not open with
    ///   the new headers. The previous context and headers stay in use.
    pub fn set_extradata(&mut self, extradata: &[u8]) -> Result<(), FrameDecodeError> {
        if extradata.is_empty() {
            return Err(FrameDecodeError::InvalidArgument(
                "extradata must not be empty".to_string(),
            ));
        }
        if self.decoder.is_none() {
            return Err(FrameDecodeError::DecoderClosed);
        }

        let reopened = open_codec(
            self.codec,
            &self.options,
            self.device.as_ref(),
            Some(extradata),
        )
        .map_err(|error| FrameDecodeError::ReopenFailed(error.to_string()))?;

        // Replacing the decoder frees the previous context and its headers.
        self.decoder = Some(reopened);
        self.input.clear();
        self.state = DecoderState::Open;
        self.frame_ready = false;

        log::debug!(
            "Reopened {} with {} bytes of extradata",
            self.codec.name(),
            extradata.len()
        );
        Ok(())
    }

    /// Submit `input` and try to pull one frame.
    ///
    /// Every call ends by asking the codec for a frame, whatever happened to
    /// the input. A packet the codec refuses because output is pending stays
    /// queued inside the decoder and goes in first on the next call.
    ///
    /// The previously decoded frame is invalidated as soon as this is
    /// called.
    ///
    /// # Errors
    ///
    /// - [`FrameDecodeError::DecodeError`] when the bitstream is damaged.
    ///   Only this call fails; later packets can still decode.
    /// - [`FrameDecodeError::DeviceOpenFailed`] when hardware format
    ///   negotiation found no usable surface format. The decoder is closed.
    /// - [`FrameDecodeError::DecoderClosed`] after [`close`](Decoder::close).
    pub fn decode(&mut self, input: DecodeInput<'_>) -> Result<DecodeOutcome, FrameDecodeError> {
        self.frame_ready = false;

        let (Some(decoder), Some(frame)) = (self.decoder.as_mut(), self.frame.as_mut()) else {
            return Err(FrameDecodeError::DecoderClosed);
        };

        match input {
            DecodeInput::Packet(data) if !data.is_empty() => self.input.push(Packet::copy(data)),
            DecodeInput::Packet(_) | DecodeInput::Flush => self.input.request_flush(),
            DecodeInput::Poll => {}
        }

        let outcome = match exchange(decoder, frame, &mut self.input) {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.handle_failure(error)),
        };

        if matches!(input, DecodeInput::Flush | DecodeInput::Packet([]))
            && self.state == DecoderState::Open
        {
            self.state = DecoderState::Draining;
        }

        match outcome {
            DecodeOutcome::Frame(descriptor) => {
                self.frame_ready = true;
                log::trace!(
                    "Decoded {}x{} {:?} frame",
                    descriptor.width,
                    descriptor.height,
                    descriptor.format
                );
            }
            DecodeOutcome::EndOfStream => {
                if self.state != DecoderState::EndOfStream {
                    log::debug!("{} decoder drained", self.codec.name());
                }
                self.state = DecoderState::EndOfStream;
            }
            DecodeOutcome::NoFrameYet => {}
        }

        Ok(outcome)
    }

    /// The frame produced by the last successful decode call.
    ///
    /// `None` if the last call did not produce a frame.
    pub fn frame(&self) -> Option<&VideoFrame> {
        if self.frame_ready {
            self.frame.as_ref()
        } else {
            None
        }
    }

    /// Discard buffered packets and frames so decoding can restart, e.g.
    /// after end of stream or a seek.
    pub fn reset(&mut self) -> Result<(), FrameDecodeError> {
        let decoder = self.decoder.as_mut().ok_or(FrameDecodeError::DecoderClosed)?;
        decoder.flush();
        self.input.clear();
        self.state = DecoderState::Open;
        self.frame_ready = false;
        Ok(())
    }

    /// Release every FFmpeg resource held by the decoder.
    ///
    /// Extradata goes first, then the device reference, the frame, and the
    /// codec context. Safe to call more than once; also run on drop.
    pub fn close(&mut self) {
        if self.state == DecoderState::Closed {
            return;
        }

        if let Some(decoder) = self.decoder.as_mut() {
            unsafe {
                let context = decoder.as_mut_ptr();
                ffmpeg_sys_next::av_freep(
                    &mut (*context).extradata as *mut *mut u8 as *mut std::ffi::c_void,
                );
                (*context).extradata_size = 0;
            }
        }
        self.input.clear();
        self.device = None;
        self.frame = None;
        self.decoder = None;
        self.frame_ready = false;
        self.state = DecoderState::Closed;

        log::debug!("Closed {} decoder", self.codec.name());
    }

    /// Headers currently installed on the codec context.
    pub fn extradata(&self) -> Option<&[u8]> {
        let decoder = self.decoder.as_ref()?;
        unsafe {
            let context = decoder.as_ptr();
            let size = (*context).extradata_size;
            if (*context).extradata.is_null() || size <= 0 {
                None
            } else {
                Some(std::slice::from_raw_parts(
                    (*context).extradata,
                    size as usize,
                ))
            }
        }
    }

    /// The codec this decoder was created for.
    pub fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    /// Name of the FFmpeg decoder implementation in use (e.g. `"h264_qsv"`).
    pub fn codec_name(&self) -> &str {
        self.codec.name()
    }

    /// The acceleration mode fixed at creation.
    pub fn hardware_acceleration(&self) -> HardwareAccelerationMode {
        self.options.hardware_acceleration
    }

    /// `true` while a hardware device is bound.
    pub fn is_hardware_accelerated(&self) -> bool {
        self.device.is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Turn a failed exchange into the error reported to the caller.
    ///
    /// A negotiation that refused every surface format leaves the codec
    /// unusable, so the decoder is closed and the device released.
    fn handle_failure(&mut self, error: FrameDecodeError) -> FrameDecodeError {
        let Some(device) = self.options.hardware_acceleration.device() else {
            return error;
        };

        let negotiation_failed = self
            .decoder
            .as_ref()
            .is_some_and(|decoder| unsafe { negotiation_failed(decoder.as_ptr()) });
        if !negotiation_failed {
            return error;
        }

        log::error!("{device:?} offered no usable surface format; closing decoder");
        self.close();
        FrameDecodeError::DeviceOpenFailed {
            device,
            reason: "no compatible hardware surface format offered".to_string(),
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("codec", &self.codec.name())
            .field("codec_id", &self.codec_id)
            .field("hardware_acceleration", &self.options.hardware_acceleration)
            .field("state", &self.state)
            .finish()
    }
}

/// Input accepted from the caller but not yet taken by the codec.
///
/// Packets stay in arrival order, and end of stream is only signalled once
/// all of them are in.
#[derive(Default)]
struct PendingInput {
    packets: VecDeque<Packet>,
    flush_requested: bool,
    flush_sent: bool,
}

impl PendingInput {
    fn push(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }

    fn request_flush(&mut self) {
        self.flush_requested = true;
    }

    fn clear(&mut self) {
        self.packets.clear();
        self.flush_requested = false;
        self.flush_sent = false;
    }

    /// Hand the codec as much pending input as it will take.
    fn submit(&mut self, decoder: &mut VideoDecoder) -> Result<(), FrameDecodeError> {
        while let Some(packet) = self.packets.front() {
            match decoder.send_packet(packet) {
                // A codec that already saw end of stream ignores further input.
                Ok(()) | Err(FfmpegError::Eof) => {
                    self.packets.pop_front();
                }
                Err(FfmpegError::Other { errno: EAGAIN }) => return Ok(()),
                Err(error) => {
                    self.packets.pop_front();
                    return Err(FrameDecodeError::DecodeError(error.to_string()));
                }
            }
        }

        if self.flush_requested && !self.flush_sent {
            match decoder.send_eof() {
                Ok(()) | Err(FfmpegError::Eof) => self.flush_sent = true,
                Err(FfmpegError::Other { errno: EAGAIN }) => {}
                Err(error) => return Err(FrameDecodeError::DecodeError(error.to_string())),
            }
        }
        Ok(())
    }
}

/// Submit pending input, then pull at most one frame.
fn exchange(
    decoder: &mut VideoDecoder,
    frame: &mut VideoFrame,
    input: &mut PendingInput,
) -> Result<DecodeOutcome, FrameDecodeError> {
    input.submit(decoder)?;

    match decoder.receive_frame(frame) {
        Ok(()) => Ok(DecodeOutcome::Frame(FrameDescriptor::of(frame))),
        Err(FfmpegError::Other { errno: EAGAIN }) => Ok(DecodeOutcome::NoFrameYet),
        Err(FfmpegError::Eof) => Ok(DecodeOutcome::EndOfStream),
        Err(error) => Err(FrameDecodeError::DecodeError(error.to_string())),
    }
}

/// Find the decoder implementation for `codec_id` under `mode`.
fn resolve_codec(
    codec_id: CodecId,
    mode: HardwareAccelerationMode,
) -> Result<Codec, FrameDecodeError> {
    let unsupported = |reason: String| FrameDecodeError::UnsupportedCodec {
        codec: codec_id,
        reason,
    };

    let codec = match mode.device().and_then(|device| device.dedicated_decoder_name(codec_id)) {
        Some(name) => ffmpeg_next::decoder::find_by_name(&name)
            .ok_or_else(|| unsupported(format!("decoder {name} is not available")))?,
        None => ffmpeg_next::decoder::find(codec_id)
            .ok_or_else(|| unsupported("no decoder available".to_string()))?,
    };

    if codec.medium() != MediaType::Video {
        return Err(unsupported(format!("{} is not a video decoder", codec.name())));
    }

    if let Some(device) = mode.device() {
        if !codec_supports_device(&codec, device) {
            return Err(unsupported(format!(
                "{} cannot decode into {device:?} surfaces",
                codec.name()
            )));
        }
    }

    Ok(codec)
}

/// Build and open a codec context.
///
/// Used both at creation and for every extradata change; the context is
/// always configured from the same options so a reopen behaves like the
/// original open.
fn open_codec(
    codec: Codec,
    options: &DecoderOptions,
    device: Option<&HardwareDevice>,
    extradata: Option<&[u8]>,
) -> Result<VideoDecoder, FrameDecodeError> {
    let mut context = CodecContext::new_with_codec(codec);

    unsafe {
        let raw = context.as_mut_ptr();
        if raw.is_null() {
            return Err(FrameDecodeError::AllocationFailed("codec context"));
        }

        if let Some(threads) = options.threads {
            (*raw).thread_count = c_int::try_from(threads).unwrap_or(c_int::MAX);
        }

        if let Some(extradata) = extradata {
            install_extradata(raw, extradata)?;
        }

        if let Some(device) = device {
            (*raw).hw_device_ctx = device.new_reference()?;
            (*raw).get_format = Some(negotiate_surface_format);
        }
    }

    let decoder = context.decoder().open_as(codec)?.video()?;
    Ok(decoder)
}

/// Copy `extradata` into a zero-padded FFmpeg allocation owned by `context`.
///
/// The padding lets bitstream readers overrun the end without touching
/// unowned memory. The context frees the buffer when it is freed.
///
/// # Safety
///
/// `context` must be a valid, unopened codec context without extradata.
unsafe fn install_extradata(
    context: *mut AVCodecContext,
    extradata: &[u8],
) -> Result<(), FrameDecodeError> {
    let size = c_int::try_from(extradata.len()).map_err(|_| {
        FrameDecodeError::InvalidArgument(format!(
            "extradata of {} bytes is too large",
            extradata.len()
        ))
    })?;

    let padded_len = extradata.len() + AV_INPUT_BUFFER_PADDING_SIZE as usize;
    let buffer = unsafe { ffmpeg_sys_next::av_mallocz(padded_len) } as *mut u8;
    if buffer.is_null() {
        return Err(FrameDecodeError::AllocationFailed("extradata buffer"));
    }

    unsafe {
        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buffer, extradata.len());
        (*context).extradata = buffer;
        (*context).extradata_size = size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padding_of(decoder: &Decoder) -> Vec<u8> {
        let extradata = decoder.extradata().unwrap();
        let padding = AV_INPUT_BUFFER_PADDING_SIZE as usize;
        unsafe { std::slice::from_raw_parts(extradata.as_ptr().add(extradata.len()), padding) }
            .to_vec()
    }

    #[test]
    fn extradata_is_copied_with_zeroed_padding() {
        let mut decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();
        assert!(decoder.extradata().is_none());

        decoder.set_extradata(&[0xAA; 3]).unwrap();
        assert_eq!(decoder.extradata(), Some(&[0xAA; 3][..]));
        assert!(padding_of(&decoder).iter().all(|&byte| byte == 0));

        let larger = vec![0x55; 200];
        decoder.set_extradata(&larger).unwrap();
        assert_eq!(decoder.extradata(), Some(&larger[..]));
        assert!(padding_of(&decoder).iter().all(|&byte| byte == 0));
    }

    #[test]
    fn empty_extradata_is_rejected() {
        let mut decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();
        assert!(matches!(
            decoder.set_extradata(&[]),
            Err(FrameDecodeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();
        decoder.close();
        decoder.close();
        assert_eq!(decoder.state(), DecoderState::Closed);
        assert!(decoder.extradata().is_none());
        assert!(matches!(
            decoder.decode(DecodeInput::Poll),
            Err(FrameDecodeError::DecoderClosed)
        ));
        assert!(matches!(
            decoder.set_extradata(&[1]),
            Err(FrameDecodeError::DecoderClosed)
        ));
    }

    #[test]
    fn poll_on_fresh_decoder_yields_nothing() {
        let mut decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();
        assert_eq!(decoder.decode(DecodeInput::Poll).unwrap(), DecodeOutcome::NoFrameYet);
        assert!(decoder.frame().is_none());
        assert_eq!(decoder.state(), DecoderState::Open);
    }

    #[test]
    fn refused_negotiation_closes_the_decoder() {
        let mut decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();

        let untouched = decoder.handle_failure(FrameDecodeError::DecodeError("damaged".into()));
        assert!(matches!(untouched, FrameDecodeError::DecodeError(_)));

        // A hardware-bound context whose negotiation refused every format:
        // device set, software format recorded, no frames context.
        decoder.options.hardware_acceleration =
            HardwareAccelerationMode::Hardware(crate::HardwareDeviceType::Vaapi);
        let untouched = decoder.handle_failure(FrameDecodeError::DecodeError("damaged".into()));
        assert!(matches!(untouched, FrameDecodeError::DecodeError(_)));

        unsafe {
            let context = decoder.decoder.as_mut().unwrap().as_mut_ptr();
            (*context).hw_device_ctx = ffmpeg_sys_next::av_buffer_alloc(1);
            (*context).sw_pix_fmt = ffmpeg_sys_next::AVPixelFormat::AV_PIX_FMT_YUV420P;
        }

        let error = decoder.handle_failure(FrameDecodeError::DecodeError("get_format".into()));
        assert!(matches!(
            error,
            FrameDecodeError::DeviceOpenFailed {
                device: crate::HardwareDeviceType::Vaapi,
                ..
            }
        ));
        assert_eq!(decoder.state(), DecoderState::Closed);
        assert!(!decoder.is_hardware_accelerated());
        assert!(matches!(
            decoder.decode(DecodeInput::Poll),
            Err(FrameDecodeError::DecoderClosed)
        ));
    }

    #[test]
    fn flush_on_fresh_decoder_ends_stream() {
        let mut decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();
        assert_eq!(decoder.decode(DecodeInput::Packet(&[])).unwrap(), DecodeOutcome::EndOfStream);
        assert_eq!(decoder.state(), DecoderState::EndOfStream);

        decoder.reset().unwrap();
        assert_eq!(decoder.state(), DecoderState::Open);
        assert_eq!(decoder.decode(DecodeInput::Poll).unwrap(), DecodeOutcome::NoFrameYet);
    }
}
