//! Encoder probing
//!
//! At startup every candidate descriptor is validated by test-opening its
//! H.264 and HEVC profiles (and HDR where claimed) and encoding one black
//! frame. Profiles that work get [`ProfileFlag::Passed`]; the probed
//! descriptors are frozen behind `Arc` and shared with every session.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::capability::{CapabilityDescriptor, ProfileFlag};
use super::config::{EncoderTuning, SessionConfig, VideoFormat};
use super::native::{CodecBackend, CodecParams, NativeEncoder, NativeError, Receive};
use super::raw::RawCodecBackend;
use super::session::codec_params;
use crate::frame::VideoFrame;

/// Every codec built into this crate
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCodecs {
    raw: RawCodecBackend,
    #[cfg(feature = "h264")]
    openh264: super::openh264::OpenH264Backend,
}

impl CodecBackend for BuiltinCodecs {
    fn has_encoder(&self, name: &str) -> bool {
        #[cfg(feature = "h264")]
        if self.openh264.has_encoder(name) {
            return true;
        }
        self.raw.has_encoder(name)
    }

    fn open(&self, name: &str, params: &CodecParams) -> Result<Box<dyn NativeEncoder>, NativeError> {
        #[cfg(feature = "h264")]
        if self.openh264.has_encoder(name) {
            return self.openh264.open(name, params);
        }
        self.raw.open(name, params)
    }
}

/// Probed, immutable encoder descriptors
#[derive(Debug, Clone, Default)]
pub struct EncoderRegistry {
    descriptors: Vec<Arc<CapabilityDescriptor>>,
}

impl EncoderRegistry {
    /// Known descriptors in order of preference
    pub fn candidates() -> Vec<CapabilityDescriptor> {
        let mut candidates = vec![CapabilityDescriptor::nvenc(), CapabilityDescriptor::amf()];
        #[cfg(feature = "h264")]
        candidates.push(super::openh264::descriptor());
        candidates.push(CapabilityDescriptor::software());
        candidates
    }

    /// Validate every candidate against `backend`
    pub fn probe(
        backend: &dyn CodecBackend,
        candidates: Vec<CapabilityDescriptor>,
        tuning: &EncoderTuning,
    ) -> Self {
        let descriptors = candidates
            .into_iter()
            .map(|mut descriptor| {
                probe_profile(&mut descriptor, backend, tuning, VideoFormat::H264);
                probe_profile(&mut descriptor, backend, tuning, VideoFormat::Hevc);
                info!(
                    "Encoder {}: H.264 {}, HEVC {}",
                    descriptor.name,
                    status(&descriptor, VideoFormat::H264),
                    status(&descriptor, VideoFormat::Hevc)
                );
                Arc::new(descriptor)
            })
            .collect();
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[Arc<CapabilityDescriptor>] {
        &self.descriptors
    }

    /// The descriptor named `preferred` if it works, else the first usable one
    pub fn select(&self, preferred: &str) -> Option<Arc<CapabilityDescriptor>> {
        let usable = || self.descriptors.iter().filter(|d| d.is_usable());
        if let Some(found) = usable().find(|d| d.name == preferred) {
            return Some(Arc::clone(found));
        }
        if !preferred.is_empty() {
            warn!("Encoder {} unavailable, falling back", preferred);
        }
        usable().next().cloned()
    }
}

fn status(descriptor: &CapabilityDescriptor, format: VideoFormat) -> &'static str {
    let profile = descriptor.profile(format);
    match (
        profile.has(ProfileFlag::Passed),
        profile.has(ProfileFlag::DynamicRange),
    ) {
        (false, _) => "unsupported",
        (true, true) => "ok (HDR)",
        (true, false) => "ok",
    }
}

fn probe_profile(
    descriptor: &mut CapabilityDescriptor,
    backend: &dyn CodecBackend,
    tuning: &EncoderTuning,
    format: VideoFormat,
) {
    let name = descriptor.profile(format).name.clone();
    if !backend.has_encoder(&name) {
        debug!("{}: encoder {} not available", descriptor.name, name);
        return;
    }

    let mut config = SessionConfig {
        width: 1280,
        height: 720,
        framerate: 60,
        bitrate: 1000,
        video_format: format,
        ..Default::default()
    };

    let mut trial = descriptor.clone();
    set_flag(&mut trial, format, ProfileFlag::Passed, true);
    if !test_open(&trial, backend, tuning, &config) {
        return;
    }
    set_flag(descriptor, format, ProfileFlag::Passed, true);

    if descriptor.profile(format).has(ProfileFlag::DynamicRange) {
        config.dynamic_range = true;
        if !test_open(descriptor, backend, tuning, &config) {
            debug!("{}: {} has no working HDR mode", descriptor.name, format);
            set_flag(descriptor, format, ProfileFlag::DynamicRange, false);
        }
    }
}

fn set_flag(descriptor: &mut CapabilityDescriptor, format: VideoFormat, flag: ProfileFlag, on: bool) {
    let profile = match format {
        VideoFormat::H264 => &mut descriptor.h264,
        VideoFormat::Hevc => &mut descriptor.hevc,
    };
    if on {
        profile.flags.insert(flag);
    } else {
        profile.flags.remove(flag);
    }
}

/// Open the profile and push one black frame through it
fn test_open(
    descriptor: &CapabilityDescriptor,
    backend: &dyn CodecBackend,
    tuning: &EncoderTuning,
    config: &SessionConfig,
) -> bool {
    let params = match codec_params(descriptor, tuning, config, None) {
        Ok(params) => params,
        Err(e) => {
            debug!("{}: {}", descriptor.name, e);
            return false;
        }
    };
    let profile = descriptor.profile(config.video_format);
    let mut encoder = match backend.open(&profile.name, &params) {
        Ok(encoder) => encoder,
        Err(e) => {
            debug!("{}: could not open {}: {}", descriptor.name, profile.name, e);
            return false;
        }
    };

    let mut frame = VideoFrame::new(config.width, config.height, params.sw_pix_fmt);
    frame.force_keyframe = true;
    if let Err(e) = encoder.send_frame(&frame) {
        debug!("{}: test frame rejected: {}", descriptor.name, e);
        return false;
    }
    !matches!(encoder.receive_packet(), Receive::Error(_))
}
