//! Hardware encoder sessions
//!
//! Turns converted frames into compressed packets for one session each.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   probe once    ┌─────────────────────────┐
//! │ EncoderRegistry      │ ──────────────▶ │ Arc<CapabilityDescriptor>│
//! │ (candidates, backend)│                 │ (read-only, shared)      │
//! └──────────────────────┘                 └────────────┬────────────┘
//!                                                       │ make_session()
//!            ConversionDevice ──frame──▶ ┌──────────────▼──────────────┐
//!                                        │ HardwareEncoderSession      │
//!                                        │  NativeEncoder (send/recv)  │
//!                                        │  rewrite table, injection   │
//!                                        └──────────────┬──────────────┘
//!                                                       │ encode()
//!                                                       ▼
//!                                        Queue<Packet> (refcounted payloads)
//! ```
//!
//! Native encoders sit behind [`CodecBackend`] / [`NativeEncoder`]. The crate
//! ships the raw reference codecs and, with the `h264` feature, OpenH264.

mod capability;
mod config;
mod error;
mod native;
#[cfg(feature = "h264")]
pub mod openh264;
mod packet;
pub mod raw;
mod registry;
mod session;
mod stats;

pub use capability::{
    device_handle_context, CapabilityDescriptor, CodecProfile, DescriptorFlag, DeviceType,
    HwContextFactory, ProfileFlag, ProfileIds,
};
pub use config::{EncoderTuning, SessionConfig, VideoFormat};
pub use error::{EncodeResult, EncoderError};
pub use native::{
    CodecBackend, CodecParams, EncodedPacket, NativeEncoder, NativeError, RateControl, Receive,
};
pub use packet::{ChannelData, Packet};
pub use raw::RawCodecBackend;
pub use registry::{BuiltinCodecs, EncoderRegistry};
pub use session::{codec_params, make_session, HardwareEncoderSession, Injection};
pub use stats::{EncodeTimer, SessionStats};
