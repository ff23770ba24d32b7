//! Hardware encoder session
//!
//! One session pairs a native encoder with the conversion device whose frame
//! it encodes, plus the parameter-set rewrite table that travels with every
//! packet it produces.
//!
//! # Construction
//!
//! [`make_session`] resolves the codec profile against the descriptor,
//! derives the native parameters (no B-frames, open-ended GOP, closed-GOP and
//! low-delay, slice and rate-control policy), opens the encoder and points
//! the conversion device at the encoder's frame.
//!
//! # Injection
//!
//! Unless the profile already writes a usable VUI, the first packet of a
//! session is scanned for its SPS (and VPS for HEVC); the rewritten units
//! become `{old, new}` entries of the rewrite table. Extraction happens once
//! per session, again only after [`HardwareEncoderSession::request_reinjection`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::capability::{CapabilityDescriptor, DescriptorFlag, ProfileFlag};
use super::config::{EncoderTuning, SessionConfig, VideoFormat};
use super::error::{EncodeResult, EncoderError};
use super::native::{CodecBackend, CodecParams, NativeEncoder, RateControl, Receive};
use super::packet::{ChannelData, Packet};
use super::stats::{EncodeTimer, SessionStats};
use crate::bitstream::{
    make_sps_h264, make_sps_hevc, Replacement, VideoSignal, H264_IDR_PREFIX, HEVC_IDR_PREFIX,
};
use crate::device::{ConversionDevice, DeviceError};
use crate::frame::{HwFramesContext, VideoFrame};
use crate::sync::Queue;

/// Parameter-set extraction still owed by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    None,
    H264,
    Hevc,
}

impl Injection {
    fn for_profile(format: VideoFormat, has_vui: bool) -> Self {
        match (has_vui, format) {
            (true, _) => Self::None,
            (false, VideoFormat::H264) => Self::H264,
            (false, VideoFormat::Hevc) => Self::Hevc,
        }
    }

    /// 0 = nothing to inject, 1 = H.264 SPS, 2 = HEVC VPS + SPS
    pub const fn flag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::H264 => 1,
            Self::Hevc => 2,
        }
    }
}

/// Ordered rewrite table: start-code prefix, VPS, SPS
///
/// Each slot holds at most one entry; a new extraction replaces the old one.
#[derive(Debug, Clone, Default)]
struct ReplacementTable {
    prefix: Option<Replacement>,
    vps: Option<Replacement>,
    sps: Option<Replacement>,
    snapshot: Arc<[Replacement]>,
}

impl ReplacementTable {
    fn set_prefix(&mut self, prefix: Replacement) {
        self.prefix = Some(prefix);
        self.rebuild();
    }

    fn set_parameter_sets(&mut self, vps: Option<Replacement>, sps: Replacement) {
        self.vps = vps;
        self.sps = Some(sps);
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.snapshot = [&self.prefix, &self.vps, &self.sps]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
    }

    fn snapshot(&self) -> Arc<[Replacement]> {
        Arc::clone(&self.snapshot)
    }
}

/// Derive the native parameters for a session
///
/// Fails without touching any native resource when the descriptor cannot
/// serve the request.
pub fn codec_params(
    descriptor: &CapabilityDescriptor,
    tuning: &EncoderTuning,
    config: &SessionConfig,
    hw_frames: Option<HwFramesContext>,
) -> EncodeResult<CodecParams> {
    let format = config.video_format;
    let profile = descriptor.profile(format);

    if !profile.has(ProfileFlag::Passed) {
        return Err(EncoderError::ProfileUnsupported {
            encoder: descriptor.name.clone(),
            codec: format.as_str(),
        });
    }
    if config.dynamic_range && !profile.has(ProfileFlag::DynamicRange) {
        return Err(EncoderError::DynamicRangeUnsupported {
            encoder: descriptor.name.clone(),
            codec: format.as_str(),
        });
    }

    let hardware = descriptor.is_hardware();
    let sw_pix_fmt = descriptor.sw_pix_fmt(config.dynamic_range);

    let refs = if config.num_ref_frames == 0 {
        if profile.has(ProfileFlag::RefFramesAutoselect) {
            0
        } else {
            16
        }
    } else if profile.has(ProfileFlag::RefFramesRestrict) {
        config.num_ref_frames
    } else {
        0
    };

    let mut slices = if hardware {
        config.slices_per_frame
    } else {
        config.slices_per_frame.max(tuning.min_software_threads)
    };
    if !profile.has(ProfileFlag::Slice) {
        slices = 1;
    }

    let rate_control = if profile.has(ProfileFlag::Cbr) {
        let multiplier = if hardware {
            tuning.hardware_bitrate_multiplier
        } else {
            tuning.software_bitrate_multiplier
        };
        let bitrate = config.bitrate as u64 * multiplier;
        RateControl::ConstantBitrate {
            bitrate,
            max_rate: bitrate,
            min_rate: bitrate,
            buffer_size: bitrate / 10,
        }
    } else if let Some(option) = &profile.qp {
        RateControl::ConstantQp {
            option: option.clone(),
            qp: tuning.qp,
        }
    } else {
        return Err(EncoderError::NoRateControl {
            encoder: profile.name.clone(),
        });
    };

    Ok(CodecParams {
        width: config.width,
        height: config.height,
        framerate: config.framerate,
        profile: descriptor.profile_id(config),
        max_b_frames: 0,
        gop_size: if descriptor.has(DescriptorFlag::LimitedGopSize) {
            i16::MAX as i32
        } else {
            i32::MAX
        },
        keyint_min: i32::MAX,
        refs,
        closed_gop: true,
        low_delay: true,
        color: config.colorspace(),
        pix_fmt: if hardware {
            descriptor.dev_pix_fmt
        } else {
            sw_pix_fmt
        },
        sw_pix_fmt,
        slices,
        thread_count: slices,
        rate_control,
        options: profile.options.clone(),
        hw_frames,
    })
}

/// Build a ready-to-encode session
///
/// `device` must already be bound to the display and produce the session's
/// software pixel format.
pub fn make_session(
    descriptor: &CapabilityDescriptor,
    backend: &dyn CodecBackend,
    tuning: &EncoderTuning,
    config: &SessionConfig,
    mut device: Box<dyn ConversionDevice>,
) -> EncodeResult<HardwareEncoderSession> {
    // Reject before creating anything native
    codec_params(descriptor, tuning, config, None)?;

    let profile = descriptor.profile(config.video_format);
    if !backend.has_encoder(&profile.name) {
        return Err(EncoderError::EncoderNotFound {
            name: profile.name.clone(),
        });
    }

    let sw_pix_fmt = descriptor.sw_pix_fmt(config.dynamic_range);
    let hw_frames = if descriptor.is_hardware() {
        let factory = descriptor.hw_context.ok_or_else(|| {
            EncoderError::HwContextFailed(format!(
                "{} has no hardware context factory",
                descriptor.name
            ))
        })?;
        Some(HwFramesContext {
            device: factory(device.as_ref())?,
            sw_format: sw_pix_fmt,
            width: config.width,
            height: config.height,
        })
    } else {
        None
    };

    let params = codec_params(descriptor, tuning, config, hw_frames)?;
    let encoder = backend
        .open(&profile.name, &params)
        .map_err(|source| EncoderError::OpenFailed {
            name: profile.name.clone(),
            source,
        })?;

    let mut frame = VideoFrame::new(config.width, config.height, sw_pix_fmt);
    frame.hw_frames = hw_frames;
    device.set_source_frame(frame)?;
    device.set_colorspace(params.color.colorspace, params.color.range);

    let mut replacements = ReplacementTable::default();
    if !profile.has(ProfileFlag::NaluPrefix5b) {
        let prefix = match config.video_format {
            VideoFormat::H264 => H264_IDR_PREFIX,
            VideoFormat::Hevc => HEVC_IDR_PREFIX,
        };
        replacements.set_prefix(Replacement::start_code_prefix(prefix));
    }

    let inject = Injection::for_profile(config.video_format, profile.has(ProfileFlag::VuiParameters));

    info!(
        "Encoder session opened: {} {}x{}@{} ({}, {}, refs {}, slices {}, inject {})",
        profile.name,
        params.width,
        params.height,
        params.framerate,
        params.color,
        params.pix_fmt,
        params.refs,
        params.slices,
        inject.flag()
    );

    Ok(HardwareEncoderSession {
        encoder,
        device,
        format: config.video_format,
        has_vui: profile.has(ProfileFlag::VuiParameters),
        signal: params.color.video_signal(),
        replacements,
        inject,
        stats: SessionStats::new(&profile.name, config.bitrate),
    })
}

/// A native encoder bound to its conversion device
pub struct HardwareEncoderSession {
    encoder: Box<dyn NativeEncoder>,
    device: Box<dyn ConversionDevice>,
    format: VideoFormat,
    has_vui: bool,
    signal: VideoSignal,
    replacements: ReplacementTable,
    inject: Injection,
    stats: SessionStats,
}

impl fmt::Debug for HardwareEncoderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareEncoderSession")
            .field("device", &self.device.name())
            .field("format", &self.format)
            .field("inject", &self.inject)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl HardwareEncoderSession {
    /// Encode the device's current frame as `frame_nr` and push every packet
    /// the encoder emits
    pub fn encode(
        &mut self,
        frame_nr: i64,
        packets: &Queue<Packet>,
        channel: &ChannelData,
    ) -> EncodeResult<()> {
        let timer = EncodeTimer::start();

        let frame = self
            .device
            .frame_mut()
            .ok_or(EncoderError::Device(DeviceError::FrameNotSet))?;
        frame.pts = frame_nr;
        self.encoder
            .send_frame(frame)
            .map_err(EncoderError::SendFailed)?;

        loop {
            let encoded = match self.encoder.receive_packet() {
                Receive::Packet(encoded) => encoded,
                Receive::Again | Receive::Eof => return Ok(()),
                Receive::Error(e) => return Err(EncoderError::ReceiveFailed(e)),
            };

            if self.inject != Injection::None {
                self.extract_parameter_sets(&encoded.data);
            }

            self.stats
                .record_frame(timer.elapsed_ms(), encoded.data.len(), encoded.keyframe);

            let packet = Packet {
                data: encoded.data,
                pts: encoded.pts,
                keyframe: encoded.keyframe,
                replacements: self.replacements.snapshot(),
                channel: Arc::clone(channel),
            };
            if packets.push(packet).is_err() {
                debug!("Packet queue stopped, dropping frame {}", frame_nr);
            }
        }
    }

    fn extract_parameter_sets(&mut self, data: &[u8]) {
        let extracted = match self.inject {
            Injection::None => return,
            Injection::H264 => make_sps_h264(data, &self.signal).map(|sps| (None, sps)),
            Injection::Hevc => make_sps_hevc(data, &self.signal).map(|sets| (Some(sets.vps), sets.sps)),
        };
        match extracted {
            Ok((vps, sps)) => {
                debug!(
                    "Injected {} parameter sets: SPS {} → {} bytes",
                    self.format,
                    sps.old.len(),
                    sps.new.len()
                );
                self.replacements.set_parameter_sets(vps, sps);
            }
            Err(e) => warn!("Parameter set extraction failed, sending as encoded: {}", e),
        }
        self.inject = Injection::None;
    }

    /// Mark the next encoded frame as a forced intra frame (or clear it)
    pub fn set_force_keyframe(&mut self, force: bool) {
        if let Some(frame) = self.device.frame_mut() {
            frame.force_keyframe = force;
        }
    }

    pub fn force_keyframe(&self) -> bool {
        self.device.frame().is_some_and(|frame| frame.force_keyframe)
    }

    /// Extract parameter sets again from the next packet
    pub fn request_reinjection(&mut self) {
        self.inject = Injection::for_profile(self.format, self.has_vui);
    }

    pub fn injection(&self) -> Injection {
        self.inject
    }

    /// The rewrite table attached to packets encoded now
    pub fn replacements(&self) -> Arc<[Replacement]> {
        self.replacements.snapshot()
    }

    pub fn device(&self) -> &dyn ConversionDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn ConversionDevice {
        self.device.as_mut()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Release the encoder and device, returning the final statistics
    pub fn finalize(self) -> SessionStats {
        info!("Encoder session closed: {}", self.stats.summary());
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::h264::tests::sample_sps;
    use crate::device::SoftwareDevice;
    use crate::encoder::capability::DeviceType;
    use crate::encoder::native::{EncodedPacket, MockCodecBackend, MockNativeEncoder, NativeError};
    use crate::frame::{HwDeviceContext, Image, PixelFormat};
    use bytes::Bytes;
    use enumflags2::BitFlags;
    use mockall::Sequence;

    fn passed(mut descriptor: CapabilityDescriptor) -> CapabilityDescriptor {
        descriptor.h264.flags |= ProfileFlag::Passed;
        descriptor.hevc.flags |= ProfileFlag::Passed;
        descriptor
    }

    fn device(format: PixelFormat) -> Box<dyn ConversionDevice> {
        Box::new(SoftwareDevice::bind(64, 36, format, Image::new(64, 36)).unwrap())
    }

    fn config(format: VideoFormat) -> SessionConfig {
        SessionConfig {
            width: 64,
            height: 36,
            bitrate: 5000,
            video_format: format,
            ..Default::default()
        }
    }

    /// Annex-B keyframe: SPS, PPS, IDR slice with a 3-byte start code
    fn h264_keyframe() -> Bytes {
        let mut data = vec![0, 0, 0, 1];
        data.extend(sample_sps(4, false));
        data.extend([0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]);
        data.extend([0, 0, 1, 0x65, 0x88, 0x84]);
        Bytes::from(data)
    }

    fn packet(data: Bytes, pts: i64, keyframe: bool) -> Receive {
        Receive::Packet(EncodedPacket { data, pts, keyframe })
    }

    /// Encoder that emits one packet per frame and records submitted frames
    fn echoing_encoder(
        frames: Arc<parking_lot::Mutex<Vec<(i64, bool)>>>,
        payload: Bytes,
    ) -> MockNativeEncoder {
        let mut encoder = MockNativeEncoder::new();
        let pending = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sent = Arc::clone(&pending);
        encoder.expect_send_frame().returning(move |frame| {
            frames.lock().push((frame.pts, frame.force_keyframe));
            sent.lock().push((frame.pts, frame.force_keyframe));
            Ok(())
        });
        encoder.expect_receive_packet().returning(move || {
            match pending.lock().pop() {
                Some((pts, key)) => packet(payload.clone(), pts, key),
                None => Receive::Again,
            }
        });
        encoder
    }

    fn backend_with(encoder: MockNativeEncoder) -> MockCodecBackend {
        let mut backend = MockCodecBackend::new();
        backend.expect_has_encoder().return_const(true);
        let mut slot = Some(encoder);
        backend.expect_open().times(1).returning(move |_, _| {
            slot.take()
                .map(|e| Box::new(e) as Box<dyn NativeEncoder>)
                .ok_or_else(|| NativeError::new(-1, "opened twice"))
        });
        backend
    }

    fn capture_params(backend: &mut MockCodecBackend) -> Arc<parking_lot::Mutex<Option<CodecParams>>> {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        backend.expect_has_encoder().return_const(true);
        backend.expect_open().returning(move |_, params| {
            *slot.lock() = Some(params.clone());
            let mut encoder = MockNativeEncoder::new();
            encoder.expect_send_frame().returning(|_| Ok(()));
            encoder.expect_receive_packet().returning(|| Receive::Again);
            Ok(Box::new(encoder) as Box<dyn NativeEncoder>)
        });
        seen
    }

    #[test]
    fn test_rejects_unprobed_profile() {
        let descriptor = CapabilityDescriptor::software();
        let backend = MockCodecBackend::new();
        let result = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        );
        let err = result.err().unwrap();
        assert!(matches!(err, EncoderError::ProfileUnsupported { .. }));
        assert!(err.is_configuration_rejected());
    }

    #[test]
    fn test_rejects_dynamic_range_without_support() {
        let mut descriptor = passed(CapabilityDescriptor::software());
        descriptor.hevc.flags.remove(ProfileFlag::DynamicRange);
        let mut cfg = config(VideoFormat::Hevc);
        cfg.dynamic_range = true;

        let result = make_session(
            &descriptor,
            &MockCodecBackend::new(),
            &EncoderTuning::default(),
            &cfg,
            device(PixelFormat::P010),
        );
        assert!(matches!(
            result.err().unwrap(),
            EncoderError::DynamicRangeUnsupported { codec: "HEVC", .. }
        ));
    }

    #[test]
    fn test_rejects_missing_rate_control() {
        let mut descriptor = passed(CapabilityDescriptor::software());
        descriptor.h264.flags.remove(ProfileFlag::Cbr);
        descriptor.h264.qp = None;

        let result = make_session(
            &descriptor,
            &MockCodecBackend::new(),
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        );
        assert!(matches!(result.err().unwrap(), EncoderError::NoRateControl { .. }));
    }

    #[test]
    fn test_missing_encoder() {
        let descriptor = passed(CapabilityDescriptor::software());
        let mut backend = MockCodecBackend::new();
        backend.expect_has_encoder().return_const(false);
        backend.expect_open().never();

        let result = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        );
        assert!(matches!(result.err().unwrap(), EncoderError::EncoderNotFound { .. }));
    }

    #[test]
    fn test_open_failure() {
        let descriptor = passed(CapabilityDescriptor::software());
        let mut backend = MockCodecBackend::new();
        backend.expect_has_encoder().return_const(true);
        backend
            .expect_open()
            .returning(|_, _| Err(NativeError::new(-12, "out of memory")));

        let result = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        );
        assert!(matches!(result.err().unwrap(), EncoderError::OpenFailed { .. }));
    }

    #[test]
    fn test_software_params() {
        let descriptor = passed(CapabilityDescriptor::software());
        let mut backend = MockCodecBackend::new();
        let seen = capture_params(&mut backend);
        let mut cfg = config(VideoFormat::H264);
        cfg.num_ref_frames = 4;
        cfg.encoder_csc_mode = 3;

        let session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &cfg,
            device(PixelFormat::Nv12),
        )
        .unwrap();

        let params = seen.lock().clone().unwrap();
        assert_eq!(params.max_b_frames, 0);
        assert_eq!(params.gop_size, i32::MAX);
        assert_eq!(params.keyint_min, i32::MAX);
        assert!(params.closed_gop && params.low_delay);
        assert_eq!(params.refs, 4);
        // Software: slices raised to the thread floor
        assert_eq!(params.slices, 2);
        assert_eq!(params.thread_count, 2);
        assert_eq!(
            params.rate_control,
            RateControl::ConstantBitrate {
                bitrate: 4_000_000,
                max_rate: 4_000_000,
                min_rate: 4_000_000,
                buffer_size: 400_000,
            }
        );
        assert_eq!(params.pix_fmt, PixelFormat::Nv12);
        assert!(params.hw_frames.is_none());
        assert!(params.color.is_full_range());

        let frame = session.device().frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 36));
        assert_eq!(session.injection(), Injection::H264);
        assert_eq!(session.replacements().len(), 1);
    }

    #[test]
    fn test_reference_frame_policy() {
        let cases = [
            (0, ProfileFlag::RefFramesAutoselect.into(), 0),
            (0, BitFlags::empty(), 16),
            (3, ProfileFlag::RefFramesRestrict.into(), 3),
            (3, BitFlags::empty(), 0),
        ];
        for (requested, policy, expected) in cases {
            let mut descriptor = passed(CapabilityDescriptor::software());
            descriptor.h264.flags = ProfileFlag::Passed | ProfileFlag::Cbr | policy;
            let mut cfg = config(VideoFormat::H264);
            cfg.num_ref_frames = requested;
            let params = codec_params(&descriptor, &EncoderTuning::default(), &cfg, None).unwrap();
            assert_eq!(params.refs, expected, "requested {} with {:?}", requested, policy);
            // No slice support: always one slice
            assert_eq!(params.slices, 1);
        }
    }

    #[test]
    fn test_hardware_params() {
        fn fake_context(_: &dyn ConversionDevice) -> EncodeResult<HwDeviceContext> {
            Ok(HwDeviceContext {
                device_type: DeviceType::D3d11,
                handle: 0xD3D,
            })
        }
        let mut descriptor = passed(CapabilityDescriptor::amf());
        descriptor.hw_context = Some(fake_context);
        descriptor.h264.flags |= ProfileFlag::Slice;

        let mut backend = MockCodecBackend::new();
        let seen = capture_params(&mut backend);
        let mut cfg = config(VideoFormat::H264);
        cfg.slices_per_frame = 1;

        let session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &cfg,
            device(PixelFormat::Nv12),
        )
        .unwrap();

        let params = seen.lock().clone().unwrap();
        assert_eq!(params.gop_size, i16::MAX as i32);
        assert_eq!(params.slices, 1);
        assert!(matches!(
            params.rate_control,
            RateControl::ConstantBitrate { bitrate: 5_000_000, .. }
        ));
        let hw = params.hw_frames.unwrap();
        assert_eq!(hw.device.handle, 0xD3D);
        assert_eq!(hw.sw_format, PixelFormat::Nv12);
        assert_eq!(session.device().frame().unwrap().hw_frames, Some(hw));
        // VUI already present: nothing to inject
        assert_eq!(session.injection(), Injection::None);
    }

    #[test]
    fn test_constant_qp_fallback() {
        let mut descriptor = passed(CapabilityDescriptor::software());
        descriptor.hevc.flags.remove(ProfileFlag::Cbr);
        let tuning = EncoderTuning {
            qp: 31,
            ..Default::default()
        };
        let params = codec_params(&descriptor, &tuning, &config(VideoFormat::Hevc), None).unwrap();
        assert_eq!(
            params.rate_control,
            RateControl::ConstantQp {
                option: "qp".into(),
                qp: 31
            }
        );
    }

    #[test]
    fn test_make_session_leaves_descriptor_untouched() {
        let descriptor = passed(CapabilityDescriptor::software());
        let before = descriptor.clone();
        for format in [VideoFormat::H264, VideoFormat::Hevc] {
            let mut backend = MockCodecBackend::new();
            let _seen = capture_params(&mut backend);
            let _session = make_session(
                &descriptor,
                &backend,
                &EncoderTuning::default(),
                &config(format),
                device(PixelFormat::Nv12),
            )
            .unwrap();
        }
        assert_eq!(descriptor, before);
    }

    #[test]
    fn test_prefix_seed_skipped_for_5_byte_prefix() {
        let mut descriptor = passed(CapabilityDescriptor::software());
        descriptor.hevc.flags |= ProfileFlag::NaluPrefix5b | ProfileFlag::VuiParameters;
        let mut backend = MockCodecBackend::new();
        let _seen = capture_params(&mut backend);
        let session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::Hevc),
            device(PixelFormat::Nv12),
        )
        .unwrap();
        assert!(session.replacements().is_empty());
        assert_eq!(session.injection().flag(), 0);
    }

    #[test]
    fn test_encode_injects_once() {
        let descriptor = passed(CapabilityDescriptor::software());
        let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let backend = backend_with(echoing_encoder(Arc::clone(&frames), h264_keyframe()));
        let mut session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        )
        .unwrap();

        let queue = Queue::new();
        let channel: ChannelData = Arc::new("viewer");
        session.encode(1, &queue, &channel).unwrap();
        session.encode(2, &queue, &channel).unwrap();

        let first = queue.pop().unwrap();
        assert_eq!(first.pts, 1);
        assert_eq!(first.replacements.len(), 2);
        assert_eq!(first.channel_as::<&str>(), Some(&"viewer"));
        assert_eq!(session.injection(), Injection::None);

        // Second packet shares the same table, no second extraction
        let second = queue.pop().unwrap();
        assert!(Arc::ptr_eq(&first.replacements, &second.replacements));

        let patched = first.apply_replacements();
        assert!(patched.len() > first.data.len());
        assert!(patched.windows(5).any(|w| w == H264_IDR_PREFIX));
        assert_eq!(session.stats().frames_encoded, 2);
    }

    #[test]
    fn test_reinjection_replaces_entries() {
        let descriptor = passed(CapabilityDescriptor::software());
        let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let backend = backend_with(echoing_encoder(frames, h264_keyframe()));
        let mut session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        )
        .unwrap();
        let queue = Queue::new();
        let channel: ChannelData = Arc::new(());

        for frame_nr in 1..=3 {
            session.request_reinjection();
            session.encode(frame_nr, &queue, &channel).unwrap();
            let table = session.replacements();
            assert_eq!(table.len(), 2, "prefix + one SPS after pass {}", frame_nr);
        }
    }

    #[test]
    fn test_hevc_injection_records_vps_and_sps() {
        use crate::encoder::raw::{hevc_sps, hevc_vps};

        let mut data = Vec::new();
        for nal in [hevc_vps(false), hevc_sps(64, 36, false, 1)] {
            data.extend([0, 0, 0, 1]);
            data.extend(nal);
        }
        data.extend([0, 0, 1, 0x28, 0x01, 0xAF]);

        let descriptor = passed(CapabilityDescriptor::software());
        let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let backend = backend_with(echoing_encoder(frames, Bytes::from(data)));
        let mut session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::Hevc),
            device(PixelFormat::Nv12),
        )
        .unwrap();
        assert_eq!(session.injection().flag(), 2);

        let queue = Queue::new();
        let channel: ChannelData = Arc::new(());
        session.encode(1, &queue, &channel).unwrap();
        let table = session.replacements();
        assert_eq!(table.len(), 3);
        assert_eq!(&table[0].new[..], HEVC_IDR_PREFIX);
    }

    #[test]
    fn test_force_keyframe_is_passed_through() {
        let descriptor = passed(CapabilityDescriptor::software());
        let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let backend = backend_with(echoing_encoder(Arc::clone(&frames), h264_keyframe()));
        let mut session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        )
        .unwrap();
        let queue = Queue::new();
        let channel: ChannelData = Arc::new(());

        session.set_force_keyframe(true);
        session.encode(1, &queue, &channel).unwrap();
        session.set_force_keyframe(false);
        session.encode(2, &queue, &channel).unwrap();

        assert_eq!(*frames.lock(), vec![(1, true), (2, false)]);
        assert!(!session.force_keyframe());
    }

    #[test]
    fn test_drain_loop_ends_on_eof_and_fails_on_error() {
        let descriptor = passed(CapabilityDescriptor::software());
        let mut encoder = MockNativeEncoder::new();
        let mut seq = Sequence::new();
        encoder.expect_send_frame().returning(|_| Ok(()));
        encoder
            .expect_receive_packet()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| packet(h264_keyframe(), 1, true));
        encoder
            .expect_receive_packet()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Receive::Eof);
        encoder
            .expect_receive_packet()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Receive::Error(NativeError::new(-5, "device lost")));

        let backend = backend_with(encoder);
        let mut session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        )
        .unwrap();
        let queue = Queue::new();
        let channel: ChannelData = Arc::new(());

        session.encode(1, &queue, &channel).unwrap();
        assert_eq!(queue.len(), 1);
        let err = session.encode(2, &queue, &channel).unwrap_err();
        assert!(matches!(err, EncoderError::ReceiveFailed(_)));
    }

    #[test]
    fn test_send_failure() {
        let descriptor = passed(CapabilityDescriptor::software());
        let mut encoder = MockNativeEncoder::new();
        encoder
            .expect_send_frame()
            .returning(|_| Err(NativeError::new(-22, "bad frame")));
        encoder.expect_receive_packet().never();

        let backend = backend_with(encoder);
        let mut session = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &config(VideoFormat::H264),
            device(PixelFormat::Nv12),
        )
        .unwrap();
        let channel: ChannelData = Arc::new(());
        let err = session.encode(1, &Queue::new(), &channel).unwrap_err();
        assert!(matches!(err, EncoderError::SendFailed(_)));
    }

    #[test]
    fn test_device_format_mismatch() {
        let descriptor = passed(CapabilityDescriptor::software());
        let mut backend = MockCodecBackend::new();
        let _seen = capture_params(&mut backend);
        let mut cfg = config(VideoFormat::Hevc);
        cfg.dynamic_range = true;

        // P010 session on an NV12 device
        let result = make_session(
            &descriptor,
            &backend,
            &EncoderTuning::default(),
            &cfg,
            device(PixelFormat::Nv12),
        );
        assert!(matches!(result.err().unwrap(), EncoderError::Device(_)));
    }
}
