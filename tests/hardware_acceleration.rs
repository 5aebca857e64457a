//! Hardware backend integration tests.
//!
//! Which devices actually open depends on the host GPU and drivers, so these
//! tests only check that enumeration and failure reporting behave.

use ffmpeg_next::codec::Id as CodecId;
use framedecode::{
    Decoder, DecoderOptions, FrameDecodeError, HardwareAccelerationMode, HardwareDevice,
    HardwareDeviceType, available_hardware_devices, pixel_format,
};

#[test]
fn enumerate_hardware_devices_does_not_panic() {
    framedecode::ffmpeg::initialize().unwrap();
    let devices = available_hardware_devices();
    println!("Detected hardware devices: {devices:?}");

    for device in &devices {
        assert!(HardwareDeviceType::ALL.contains(device));
    }
}

#[test]
fn surface_formats_are_opaque() {
    for device in HardwareDeviceType::ALL {
        let info = pixel_format::describe(device.surface_format()).unwrap();
        assert!(info.hardware, "{device:?} surface should be a hardware format");
        assert_eq!(info.plane_count, 0);
    }
}

#[test]
fn software_mode_binds_no_device() {
    let decoder = Decoder::new(CodecId::MPEG4, HardwareAccelerationMode::Software).unwrap();
    assert!(!decoder.is_hardware_accelerated());
    assert_eq!(decoder.hardware_acceleration(), HardwareAccelerationMode::Software);
}

#[test]
fn missing_device_node_is_reported() {
    if !available_hardware_devices().contains(&HardwareDeviceType::Vaapi) {
        eprintln!("Skipping: FFmpeg built without VAAPI");
        return;
    }

    let result = HardwareDevice::open(
        HardwareDeviceType::Vaapi,
        Some("/dev/dri/this-node-does-not-exist"),
    );
    assert!(matches!(
        result,
        Err(FrameDecodeError::DeviceOpenFailed {
            device: HardwareDeviceType::Vaapi,
            ..
        })
    ));

    let options = DecoderOptions::new()
        .with_hardware_acceleration(HardwareAccelerationMode::Hardware(
            HardwareDeviceType::Vaapi,
        ))
        .with_device("/dev/dri/this-node-does-not-exist");
    match Decoder::with_options(CodecId::H264, options) {
        Err(FrameDecodeError::DeviceOpenFailed { .. })
        | Err(FrameDecodeError::UnsupportedCodec { .. }) => {}
        other => panic!("expected a device failure, got {other:?}"),
    }
}

#[test]
fn device_names_with_nul_bytes_are_rejected() {
    let result = HardwareDevice::open(HardwareDeviceType::Cuda, Some("0\0"));
    assert!(matches!(result, Err(FrameDecodeError::InvalidArgument(_))));
}

#[test]
fn qsv_requires_a_dedicated_decoder() {
    // Codecs without a *_qsv decoder cannot be decoded on QSV at all.
    let result = Decoder::new(
        CodecId::PNG,
        HardwareAccelerationMode::Hardware(HardwareDeviceType::Qsv),
    );
    assert!(matches!(
        result,
        Err(FrameDecodeError::UnsupportedCodec { .. })
    ));
}
