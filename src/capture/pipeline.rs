//! Session admission front door
//!
//! [`CapturePipeline`] owns the admission queue and the capture thread.
//! Session owners call [`CapturePipeline::capture`] from their own threads;
//! the call returns once the capture thread has released the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::context::{SessionId, SyncSessionContext};
use super::coordinator::{AdmissionQueue, CaptureCoordinator, CaptureSettings};
use super::display::DisplayBackend;
use super::error::{CaptureError, SessionError};
use crate::encoder::{CapabilityDescriptor, ChannelData, CodecBackend, Packet, SessionConfig};
use crate::sync::{Event, Queue};

/// Shared capture thread serving every admitted session
pub struct CapturePipeline {
    displays: Arc<dyn DisplayBackend>,
    codecs: Arc<dyn CodecBackend>,
    descriptor: Arc<CapabilityDescriptor>,
    settings: CaptureSettings,
    admissions: Arc<AdmissionQueue>,
    running: Arc<Mutex<bool>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl CapturePipeline {
    pub fn new(
        displays: Arc<dyn DisplayBackend>,
        codecs: Arc<dyn CodecBackend>,
        descriptor: Arc<CapabilityDescriptor>,
        settings: CaptureSettings,
    ) -> Self {
        info!(
            "Capture pipeline ready: encoder {} ({})",
            descriptor.name, descriptor.device_type
        );
        Self {
            displays,
            codecs,
            descriptor,
            settings,
            admissions: Arc::new(Queue::new()),
            running: Arc::new(Mutex::new(false)),
            thread: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn descriptor(&self) -> &Arc<CapabilityDescriptor> {
        &self.descriptor
    }

    /// Queue a session without waiting for it to end
    ///
    /// The returned context carries the keyframe request and join signal;
    /// [`SyncSessionContext::wait`] blocks like [`Self::capture`] does.
    pub fn admit(
        &self,
        shutdown: Arc<Event>,
        packets: Arc<Queue<Packet>>,
        config: SessionConfig,
        channel: ChannelData,
    ) -> Result<Arc<SyncSessionContext>, SessionError> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let ctx = Arc::new(SyncSessionContext::new(id, config, shutdown, packets, channel));

        let mut running = self.running.lock();
        if self.admissions.push(Arc::clone(&ctx)).is_err() {
            return Err(SessionError::PipelineStopped);
        }
        debug!(
            session = %id,
            "Queued for admission: {}x{}@{} {}",
            config.width,
            config.height,
            config.framerate,
            config.video_format
        );

        if !*running {
            if let Err(err) = self.spawn() {
                // Nothing else will ever pop it
                self.admissions.drain();
                return Err(err.into());
            }
            *running = true;
        }
        Ok(ctx)
    }

    /// Admit a session and block until the capture thread releases it
    ///
    /// The first frame of the session is always a keyframe. Raise `shutdown`
    /// to end the session; `Ok` means it ended on request.
    pub fn capture(
        &self,
        shutdown: Arc<Event>,
        packets: Arc<Queue<Packet>>,
        config: SessionConfig,
        channel: ChannelData,
    ) -> Result<(), SessionError> {
        self.admit(shutdown, packets, config, channel)?.wait()
    }

    /// Whether a capture thread is currently serving sessions
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Stop admitting, end the capture thread and release every session
    pub fn shutdown(&self) {
        self.admissions.stop();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
            info!("Capture pipeline shut down");
        }
        // Contexts that never reached a thread
        for ctx in self.admissions.drain() {
            ctx.release("pipeline stopped");
        }
    }

    /// Start a capture thread; the caller holds the `running` lock
    fn spawn(&self) -> Result<(), CaptureError> {
        let mut slot = self.thread.lock();
        if let Some(previous) = slot.take() {
            // Already past its exit decision
            if previous.join().is_err() {
                warn!("Previous capture thread panicked");
            }
        }

        let coordinator = CaptureCoordinator::new(
            Arc::clone(&self.displays),
            Arc::clone(&self.codecs),
            Arc::clone(&self.descriptor),
            self.settings.clone(),
            Arc::clone(&self.admissions),
            Arc::clone(&self.running),
        );
        let handle = thread::Builder::new()
            .name("capture-sync".to_string())
            .spawn(move || coordinator.run())
            .map_err(CaptureError::ThreadSpawn)?;
        *slot = Some(handle);
        Ok(())
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
