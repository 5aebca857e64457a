//! Synthetic streams for the integration tests.
//!
//! Packets are produced in-process with FFmpeg's built-in encoders so no
//! fixture files are needed.

#![allow(dead_code)]

use ffmpeg_next::{
    Packet, Rational,
    codec::{Id as CodecId, context::Context as CodecContext},
    encoder::{Video as OpenedEncoder, video::Video as VideoEncoder},
    format::Pixel,
    frame::Video as VideoFrame,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Encoded packets plus the headers the encoder exported, if any.
pub struct EncodedStream {
    pub extradata: Option<Vec<u8>>,
    pub packets: Vec<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

/// A frame whose samples change with position and `index`.
pub fn gradient_frame(format: Pixel, width: u32, height: u32, index: usize) -> VideoFrame {
    let mut frame = VideoFrame::new(format, width, height);
    for plane in 0..frame.planes() {
        let stride = frame.stride(plane);
        let rows = frame.plane_height(plane) as usize;
        let data = frame.data_mut(plane);
        for row in 0..rows {
            for column in 0..stride {
                data[row * stride + column] =
                    (row * 3 + column * 2 + index * 7 + plane * 50) as u8;
            }
        }
    }
    frame
}

/// An 8-bit single-plane frame where every sample is `x + y * width`.
pub fn numbered_gray_frame(width: u32, height: u32) -> VideoFrame {
    let mut frame = VideoFrame::new(Pixel::GRAY8, width, height);
    let stride = frame.stride(0);
    let data = frame.data_mut(0);
    for y in 0..height as usize {
        for x in 0..width as usize {
            data[y * stride + x] = (x + y * width as usize) as u8;
        }
    }
    frame
}

fn new_encoder(
    codec_id: CodecId,
    format: Pixel,
    width: u32,
    height: u32,
) -> (ffmpeg_next::Codec, VideoEncoder) {
    framedecode::ffmpeg::initialize().unwrap();
    let codec = ffmpeg_next::encoder::find(codec_id).expect("built-in encoder missing");
    let mut encoder = CodecContext::new_with_codec(codec).encoder().video().unwrap();
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(format);
    encoder.set_time_base(Rational::new(1, 25));
    encoder.set_frame_rate(Some(Rational::new(25, 1)));
    (codec, encoder)
}

fn drain(encoder: &mut OpenedEncoder, packets: &mut Vec<Vec<u8>>) {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        if let Some(data) = packet.data() {
            packets.push(data.to_vec());
        }
    }
}

fn encode(
    codec: ffmpeg_next::Codec,
    encoder: VideoEncoder,
    format: Pixel,
    (width, height): (u32, u32),
    frame_count: usize,
) -> EncodedStream {
    let mut encoder = encoder.open_as(codec).unwrap();

    let extradata = unsafe {
        let context = encoder.as_ptr();
        let size = (*context).extradata_size;
        if (*context).extradata.is_null() || size <= 0 {
            None
        } else {
            Some(std::slice::from_raw_parts((*context).extradata, size as usize).to_vec())
        }
    };

    let mut packets = Vec::new();
    for index in 0..frame_count {
        let mut frame = gradient_frame(format, width, height, index);
        frame.set_pts(Some(index as i64));
        encoder.send_frame(&frame).unwrap();
        drain(&mut encoder, &mut packets);
    }
    encoder.send_eof().unwrap();
    drain(&mut encoder, &mut packets);

    EncodedStream {
        extradata,
        packets,
        width,
        height,
    }
}

/// MPEG-4 Part 2 with up to `b_frames` B-frames between references.
///
/// With `global_header` the stream headers are exported as extradata and
/// left out of the packets, so decoding needs the extradata.
pub fn encode_mpeg4(frame_count: usize, b_frames: i32, global_header: bool) -> EncodedStream {
    let (codec, mut encoder) = new_encoder(CodecId::MPEG4, Pixel::YUV420P, WIDTH, HEIGHT);
    encoder.set_max_b_frames(b_frames as usize);
    encoder.set_gop(12);
    encoder.set_bit_rate(400_000);
    if global_header {
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }
    encode(codec, encoder, Pixel::YUV420P, (WIDTH, HEIGHT), frame_count)
}

/// Motion JPEG: every packet is a self-contained picture.
pub fn encode_mjpeg(frame_count: usize) -> EncodedStream {
    let (codec, encoder) = new_encoder(CodecId::MJPEG, Pixel::YUVJ420P, WIDTH, HEIGHT);
    encode(codec, encoder, Pixel::YUVJ420P, (WIDTH, HEIGHT), frame_count)
}
