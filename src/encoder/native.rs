//! Native encoder collaborator
//!
//! The session drives an encoder through the send/receive split common to
//! native video libraries: one frame in, zero or more packets out. The
//! receive side distinguishes "needs more input" and "end of stream" (both
//! end a drain normally) from hard errors.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use crate::device::ColorSpaceConfig;
use crate::frame::{HwFramesContext, PixelFormat, VideoFrame};

/// Error reported by a native encoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A compressed access unit straight from the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: i64,
    pub keyframe: bool,
}

/// Outcome of one receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive {
    Packet(EncodedPacket),
    /// Encoder needs another frame before it can emit more
    Again,
    /// Encoder has been flushed
    Eof,
    Error(NativeError),
}

/// Rate control configured on the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateControl {
    /// Rates in bits per second
    ConstantBitrate {
        bitrate: u64,
        max_rate: u64,
        min_rate: u64,
        buffer_size: u64,
    },
    /// Fixed quantizer set through a profile option
    ConstantQp { option: String, qp: u32 },
}

/// Everything an encoder is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParams {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub profile: i32,
    pub max_b_frames: u32,
    pub gop_size: i32,
    pub keyint_min: i32,
    /// 0 lets the encoder decide
    pub refs: u32,
    pub closed_gop: bool,
    pub low_delay: bool,
    pub color: ColorSpaceConfig,
    /// Format handed to the encoder
    pub pix_fmt: PixelFormat,
    /// Software format behind `pix_fmt`
    pub sw_pix_fmt: PixelFormat,
    pub slices: u32,
    pub thread_count: u32,
    pub rate_control: RateControl,
    pub options: Vec<(String, String)>,
    pub hw_frames: Option<HwFramesContext>,
}

impl CodecParams {
    /// Look up an encoder option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An opened encoder instance
#[cfg_attr(test, mockall::automock)]
pub trait NativeEncoder: Send {
    /// Submit one frame
    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), NativeError>;

    /// Retrieve the next ready packet
    fn receive_packet(&mut self) -> Receive;
}

/// A library of encoders, looked up by name
#[cfg_attr(test, mockall::automock)]
pub trait CodecBackend: Send + Sync {
    fn has_encoder(&self, name: &str) -> bool;

    fn open(&self, name: &str, params: &CodecParams) -> Result<Box<dyn NativeEncoder>, NativeError>;
}

impl fmt::Debug for dyn NativeEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeEncoder")
    }
}
