//! Sync session contexts and live sessions
//!
//! A [`SyncSessionContext`] is the owner-side description of a session: its
//! signals, packet queue and configuration. It outlives display
//! reinitialization. A [`SyncSession`] is the capture-thread pairing of a
//! context with its conversion device and encoder, rebuilt on every
//! activation.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::error::SessionError;
use crate::device::DeviceFactory;
use crate::encoder::{
    make_session, CapabilityDescriptor, ChannelData, CodecBackend, EncodeResult, EncoderError,
    EncoderTuning, HardwareEncoderSession, Packet, SessionConfig, SessionStats,
};
use crate::frame::Image;
use crate::sync::{Event, Queue};

/// Stable identifier of an admitted session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Owner-side state of one session, shared with the capture thread
#[derive(Debug)]
pub struct SyncSessionContext {
    pub id: SessionId,
    pub config: SessionConfig,
    /// Raised by the owner (or the capture thread on failure) to end the session
    pub shutdown: Arc<Event>,
    /// Keyframe request, consumed by the next tick
    pub idr: Event,
    /// Raised once the capture thread has released the session
    pub join: Event,
    pub packets: Arc<Queue<Packet>>,
    pub channel: ChannelData,
    frame_nr: AtomicI64,
    failure: Mutex<Option<String>>,
}

impl SyncSessionContext {
    /// New context whose first frame is a keyframe
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        shutdown: Arc<Event>,
        packets: Arc<Queue<Packet>>,
        channel: ChannelData,
    ) -> Self {
        Self {
            id,
            config,
            shutdown,
            idr: Event::raised(),
            join: Event::new(),
            packets,
            channel,
            frame_nr: AtomicI64::new(1),
            failure: Mutex::new(None),
        }
    }

    /// Ask for a forced intra frame on the next tick
    pub fn request_keyframe(&self) {
        self.idr.raise();
    }

    /// Next presentation timestamp
    fn next_frame_nr(&self) -> i64 {
        self.frame_nr.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of frames submitted so far
    pub fn frames_submitted(&self) -> i64 {
        self.frame_nr.load(Ordering::Relaxed) - 1
    }

    /// Record why the capture thread ended this session; the first reason wins
    pub fn fail(&self, reason: impl Into<String>) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(reason.into());
        }
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Tear down from the capture thread's side
    ///
    /// A reason is recorded only if the owner had not already asked to stop.
    pub fn release(&self, reason: &str) {
        if !self.shutdown.is_raised() {
            self.fail(reason);
            self.shutdown.raise();
        }
        self.join.raise();
    }

    /// Block until the capture thread has released the session
    pub fn wait(&self) -> Result<(), SessionError> {
        self.join.wait();
        match self.failure() {
            Some(reason) => Err(SessionError::Failed {
                session: self.id,
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// A context paired with its live encoder
#[derive(Debug)]
pub struct SyncSession {
    ctx: Arc<SyncSessionContext>,
    encoder: HardwareEncoderSession,
}

impl SyncSession {
    /// Bind a device from `factory` and open the encoder for `ctx`
    pub fn build(
        ctx: Arc<SyncSessionContext>,
        descriptor: &CapabilityDescriptor,
        codecs: &dyn CodecBackend,
        tuning: &EncoderTuning,
        factory: &dyn DeviceFactory,
    ) -> EncodeResult<Self> {
        let format = descriptor.sw_pix_fmt(ctx.config.dynamic_range);
        let device = factory.make_device(format).map_err(EncoderError::Device)?;
        let encoder = make_session(descriptor, codecs, tuning, &ctx.config, device)?;
        info!(session = %ctx.id, "Sync session built with {}", descriptor.name);
        Ok(Self { ctx, encoder })
    }

    pub fn ctx(&self) -> &Arc<SyncSessionContext> {
        &self.ctx
    }

    pub fn encoder(&self) -> &HardwareEncoderSession {
        &self.encoder
    }

    /// Convert and encode one captured image
    ///
    /// A pending keyframe request marks this frame forced-intra; the marker
    /// is cleared again whatever the outcome.
    pub fn process(&mut self, image: &Image) -> EncodeResult<()> {
        if self.ctx.idr.take() {
            debug!(session = %self.ctx.id, "Forcing keyframe");
            self.encoder.set_force_keyframe(true);
        }

        let result = self.convert_and_encode(image);
        self.encoder.set_force_keyframe(false);
        result
    }

    fn convert_and_encode(&mut self, image: &Image) -> EncodeResult<()> {
        self.encoder.device_mut().convert(image)?;
        let frame_nr = self.ctx.next_frame_nr();
        self.encoder
            .encode(frame_nr, &self.ctx.packets, &self.ctx.channel)
    }

    /// Release the encoder and device; the context stays with the caller
    pub fn finalize(self) -> (Arc<SyncSessionContext>, SessionStats) {
        let stats = self.encoder.finalize();
        (self.ctx, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDeviceFactory;
    use crate::encoder::{EncoderRegistry, ProfileFlag, RawCodecBackend, VideoFormat};

    fn context(config: SessionConfig) -> Arc<SyncSessionContext> {
        Arc::new(SyncSessionContext::new(
            SessionId::new(1),
            config,
            Arc::new(Event::new()),
            Arc::new(Queue::new()),
            Arc::new(7u32),
        ))
    }

    fn small_config(video_format: VideoFormat) -> SessionConfig {
        SessionConfig {
            width: 64,
            height: 32,
            video_format,
            ..Default::default()
        }
    }

    fn software() -> Arc<CapabilityDescriptor> {
        EncoderRegistry::probe(
            &RawCodecBackend,
            vec![CapabilityDescriptor::software()],
            &EncoderTuning::default(),
        )
        .select("software")
        .unwrap()
    }

    #[test]
    fn test_first_frame_is_keyframe_then_single_shot() {
        let ctx = context(small_config(VideoFormat::H264));
        let factory = SoftwareDeviceFactory::new(64, 32, Image::new(64, 32));
        let descriptor = software();
        let mut session = SyncSession::build(
            Arc::clone(&ctx),
            &descriptor,
            &RawCodecBackend,
            &EncoderTuning::default(),
            &factory,
        )
        .unwrap();

        let image = Image::new(64, 32);
        for _ in 0..3 {
            session.process(&image).unwrap();
            assert!(!session.encoder().force_keyframe());
        }

        let packets = ctx.packets.drain();
        assert_eq!(packets.len(), 3);
        assert!(packets[0].keyframe);
        assert!(!packets[1].keyframe && !packets[2].keyframe);
        assert_eq!(
            packets.iter().map(|p| p.pts).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(packets[0].channel_as::<u32>(), Some(&7));
        assert_eq!(ctx.frames_submitted(), 3);

        ctx.request_keyframe();
        session.process(&image).unwrap();
        assert!(ctx.packets.pop().unwrap().keyframe);
    }

    #[test]
    fn test_conversion_failure_clears_marker() {
        let ctx = context(small_config(VideoFormat::H264));
        let factory = SoftwareDeviceFactory::new(64, 32, Image::new(64, 32));
        let mut session = SyncSession::build(
            Arc::clone(&ctx),
            &software(),
            &RawCodecBackend,
            &EncoderTuning::default(),
            &factory,
        )
        .unwrap();

        // Display geometry changed under the device
        let err = session.process(&Image::new(32, 32)).unwrap_err();
        assert!(matches!(err, EncoderError::Device(_)));
        assert!(!session.encoder().force_keyframe());
        assert!(ctx.packets.is_empty());
    }

    #[test]
    fn test_build_rejects_unsupported_hdr() {
        let mut config = small_config(VideoFormat::H264);
        config.dynamic_range = true;
        let descriptor = software();
        assert!(!descriptor.h264.has(ProfileFlag::DynamicRange));

        let factory = SoftwareDeviceFactory::new(64, 32, Image::new(64, 32));
        let err = SyncSession::build(
            context(config),
            &descriptor,
            &RawCodecBackend,
            &EncoderTuning::default(),
            &factory,
        )
        .unwrap_err();
        assert!(err.is_configuration_rejected());
    }

    #[test]
    fn test_release_records_reason_only_when_unrequested() {
        let ctx = context(SessionConfig::default());
        ctx.release("display lost");
        assert!(ctx.shutdown.is_raised());
        assert!(matches!(ctx.wait(), Err(SessionError::Failed { .. })));

        let ctx = context(SessionConfig::default());
        ctx.shutdown.raise();
        ctx.release("pipeline stopped");
        assert!(ctx.wait().is_ok());
    }
}
