//! Decoder configuration.
//!
//! [`DecoderOptions`] is a builder for the settings a
//! [`Decoder`](crate::Decoder) fixes at creation time.
//!
//! # Example
//!
//! ```no_run
//! use ffmpeg_next::codec::Id;
//! use framedecode::{Decoder, DecoderOptions, HardwareAccelerationMode, HardwareDeviceType};
//!
//! let options = DecoderOptions::new()
//!     .with_hardware_acceleration(HardwareAccelerationMode::Hardware(HardwareDeviceType::Vaapi))
//!     .with_device("/dev/dri/renderD128");
//! let decoder = Decoder::with_options(Id::HEVC, options)?;
//! # Ok::<(), framedecode::FrameDecodeError>(())
//! ```

use crate::hardware_acceleration::HardwareAccelerationMode;

/// Settings applied when a decoder is created.
///
/// Every field is fixed for the lifetime of the decoder; reopening after an
/// extradata change reuses the same options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Software or hardware decoding. Defaults to software.
    pub(crate) hardware_acceleration: HardwareAccelerationMode,
    /// Adapter to open for hardware decoding. `None` uses the device
    /// type's default.
    pub(crate) device: Option<String>,
    /// Codec worker thread count. `None` leaves FFmpeg's default of one
    /// thread, which keeps output delay at its minimum.
    pub(crate) threads: Option<usize>,
}

impl DecoderOptions {
    /// Options for a single-threaded software decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hardware acceleration mode.
    #[must_use]
    pub fn with_hardware_acceleration(mut self, mode: HardwareAccelerationMode) -> Self {
        self.hardware_acceleration = mode;
        self
    }

    /// Open a specific hardware adapter (e.g. a DRM render node).
    ///
    /// Ignored in software mode.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Let the codec use `count` worker threads. Clamped to a minimum of 1.
    ///
    /// Frame threading adds one frame of output delay per extra thread.
    #[must_use]
    pub fn with_threads(mut self, count: usize) -> Self {
        self.threads = Some(count.max(1));
        self
    }

    /// The configured acceleration mode.
    pub fn hardware_acceleration(&self) -> HardwareAccelerationMode {
        self.hardware_acceleration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware_acceleration::HardwareDeviceType;

    #[test]
    fn defaults_to_single_threaded_software() {
        let options = DecoderOptions::new();
        assert_eq!(options.hardware_acceleration(), HardwareAccelerationMode::Software);
        assert_eq!(options.device, None);
        assert_eq!(options.threads, None);
    }

    #[test]
    fn builder_sets_fields() {
        let options = DecoderOptions::new()
            .with_hardware_acceleration(HardwareAccelerationMode::Hardware(
                HardwareDeviceType::Cuda,
            ))
            .with_device("0")
            .with_threads(0);

        assert_eq!(
            options.hardware_acceleration(),
            HardwareAccelerationMode::Hardware(HardwareDeviceType::Cuda)
        );
        assert_eq!(options.device.as_deref(), Some("0"));
        assert_eq!(options.threads, Some(1));
    }
}
