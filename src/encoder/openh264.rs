//! OpenH264 software encoder backend
//!
//! Wraps Cisco's OpenH264 as a native encoder for H.264 sessions. The
//! conversion device hands over NV12; OpenH264 wants planar I420, so the
//! chroma plane is split before every encode.
//!
//! # Feature Gate
//!
//! Requires the `h264` feature.

use std::collections::VecDeque;

use bytes::Bytes;
use enumflags2::BitFlags;
use openh264::encoder::{BitRate, Encoder, EncoderConfig as OpenH264Config, FrameRate, FrameType, UsageType};
use openh264::formats::YUVSlices;
use tracing::{debug, trace};

use super::capability::{CapabilityDescriptor, CodecProfile, DeviceType, ProfileFlag, ProfileIds};
use super::native::{CodecBackend, CodecParams, EncodedPacket, NativeEncoder, NativeError, RateControl, Receive};
use crate::frame::{chroma_size, PixelFormat, VideoFrame};

/// Native name of the OpenH264 codec
pub const LIBOPENH264: &str = "libopenh264";

const EINVAL: i32 = -22;
const EIO: i32 = -5;

/// Descriptor for OpenH264: H.264 only, 8-bit, constant bitrate
pub fn descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor {
        name: "openh264".to_string(),
        device_type: DeviceType::Software,
        profiles: ProfileIds {
            h264_high: 100,
            hevc_main: 1,
            hevc_main_10: 2,
        },
        dev_pix_fmt: PixelFormat::Nv12,
        static_pix_fmt: PixelFormat::Nv12,
        dynamic_pix_fmt: PixelFormat::Nv12,
        h264: CodecProfile::new(LIBOPENH264, ProfileFlag::Cbr | ProfileFlag::RefFramesAutoselect),
        hevc: CodecProfile::new("", BitFlags::empty()),
        flags: BitFlags::empty(),
        hw_context: None,
    }
}

/// OpenH264 instance behind the native encoder interface
pub struct OpenH264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    u_plane: Vec<u8>,
    v_plane: Vec<u8>,
    pending: VecDeque<EncodedPacket>,
}

impl OpenH264Encoder {
    pub fn new(params: &CodecParams) -> Result<Self, NativeError> {
        if params.sw_pix_fmt != PixelFormat::Nv12 {
            return Err(NativeError::new(EINVAL, format!("OpenH264 cannot encode {}", params.sw_pix_fmt)));
        }
        if params.width % 2 != 0 || params.height % 2 != 0 {
            return Err(NativeError::new(
                EINVAL,
                format!("odd dimensions {}x{}", params.width, params.height),
            ));
        }

        let bitrate_bps = match params.rate_control {
            RateControl::ConstantBitrate { bitrate, .. } => bitrate.min(u32::MAX as u64) as u32,
            RateControl::ConstantQp { .. } => 5_000_000,
        };
        let config = OpenH264Config::new()
            .bitrate(BitRate::from_bps(bitrate_bps))
            .max_frame_rate(FrameRate::from_hz(params.framerate as f32))
            .usage_type(UsageType::ScreenContentRealTime);

        let encoder = Encoder::with_api_config(openh264::OpenH264API::from_source(), config)
            .map_err(|e| NativeError::new(EIO, format!("OpenH264 init failed: {:?}", e)))?;

        debug!(
            "Created OpenH264 encoder: {}x{}, bitrate={}bps, fps={}",
            params.width, params.height, bitrate_bps, params.framerate
        );

        let chroma = chroma_size(params.width) * chroma_size(params.height);
        Ok(Self {
            encoder,
            width: params.width,
            height: params.height,
            u_plane: vec![0; chroma],
            v_plane: vec![0; chroma],
            pending: VecDeque::new(),
        })
    }
}

impl NativeEncoder for OpenH264Encoder {
    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), NativeError> {
        if frame.format != PixelFormat::Nv12 || frame.width != self.width || frame.height != self.height {
            return Err(NativeError::new(EINVAL, "frame does not match encoder"));
        }

        for (i, uv) in frame.chroma().chunks_exact(2).enumerate() {
            self.u_plane[i] = uv[0];
            self.v_plane[i] = uv[1];
        }

        if frame.force_keyframe {
            self.encoder.force_intra_frame();
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let cw = chroma_size(self.width);
        let slices = YUVSlices::new((frame.luma(), self.u_plane.as_slice(), self.v_plane.as_slice()), (w, h), (w, cw, cw));
        let bitstream = self
            .encoder
            .encode(&slices)
            .map_err(|e| NativeError::new(EIO, format!("OpenH264 encode failed: {:?}", e)))?;

        let keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();
        if data.is_empty() {
            // Rate control skipped the frame
            trace!("OpenH264 produced no output for pts {}", frame.pts);
            return Ok(());
        }

        self.pending.push_back(EncodedPacket {
            data: Bytes::from(data),
            pts: frame.pts,
            keyframe,
        });
        Ok(())
    }

    fn receive_packet(&mut self) -> Receive {
        match self.pending.pop_front() {
            Some(packet) => Receive::Packet(packet),
            None => Receive::Again,
        }
    }
}

/// Codec backend serving OpenH264
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenH264Backend;

impl CodecBackend for OpenH264Backend {
    fn has_encoder(&self, name: &str) -> bool {
        name == LIBOPENH264
    }

    fn open(&self, name: &str, params: &CodecParams) -> Result<Box<dyn NativeEncoder>, NativeError> {
        if name != LIBOPENH264 {
            return Err(NativeError::new(EINVAL, format!("unknown encoder {}", name)));
        }
        Ok(Box::new(OpenH264Encoder::new(params)?))
    }
}
