//! Capture Coordinator
//!
//! Runs on the capture thread. Each activation resolves a display, admits the
//! pending sessions, acquires the display and then lets the display drive
//! [`CaptureCoordinator::on_image_snapshot`] once per captured frame.
//!
//! # State Machine
//!
//! ```text
//!            ┌─────────────────────────── reinit ──────────────────────┐
//!            ▼                                                         │
//!   ┌─────────────────┐   ┌──────────────┐   ┌───────────────┐   ┌─────┴─────┐
//!   │ resolve display │──▶│ admit pending│──▶│ acquire (x N) │──▶│  capture  │◀─┐
//!   └─────────────────┘   └──────────────┘   └───────┬───────┘   └─────┬─────┘  │
//!                                                    │ unavailable     ├─────────┘
//!                                                    ▼                 │ timeout
//!                                               release all ◀──── thread exit
//!                                                               ok / error
//! ```
//!
//! Sessions are built once the display is acquired, since their conversion
//! devices bind to it. A session that fails to build while activating ends
//! the activation and every other pending session is released with it; one
//! that fails as a late joiner is rejected on its own. Contexts survive a reinit and are rebuilt with a keyframe request on the
//! next activation. A timeout only resumes capture on the same display with
//! the same encoders.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::context::{SyncSession, SyncSessionContext};
use super::display::{AcquirePolicy, CaptureStatus, Display, DisplayBackend, Snapshot};
use super::error::CaptureError;
use crate::device::DeviceFactory;
use crate::encoder::{CapabilityDescriptor, CodecBackend, DeviceType, EncoderTuning};
use crate::frame::Image;
use crate::sync::Queue;

/// Pending contexts waiting for the capture thread
pub type AdmissionQueue = Queue<Arc<SyncSessionContext>>;

/// Everything an activation needs besides the sessions
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Preferred display; empty selects the first one
    pub output_name: String,
    pub acquire: AcquirePolicy,
    pub tuning: EncoderTuning,
    /// Used when the first session asks for 0 fps
    pub framerate_fallback: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_name: String::new(),
            acquire: AcquirePolicy::default(),
            tuning: EncoderTuning::default(),
            framerate_fallback: 60,
        }
    }
}

/// Owns the capture loop for one capture thread
pub struct CaptureCoordinator {
    displays: Arc<dyn DisplayBackend>,
    codecs: Arc<dyn CodecBackend>,
    descriptor: Arc<CapabilityDescriptor>,
    settings: CaptureSettings,
    admissions: Arc<AdmissionQueue>,
    /// Cleared under lock when the thread decides to exit
    running: Arc<Mutex<bool>>,
    /// Contexts kept across activations
    carried: Vec<Arc<SyncSessionContext>>,
    last_error: Option<CaptureError>,
}

impl CaptureCoordinator {
    pub fn new(
        displays: Arc<dyn DisplayBackend>,
        codecs: Arc<dyn CodecBackend>,
        descriptor: Arc<CapabilityDescriptor>,
        settings: CaptureSettings,
        admissions: Arc<AdmissionQueue>,
        running: Arc<Mutex<bool>>,
    ) -> Self {
        Self {
            displays,
            codecs,
            descriptor,
            settings,
            admissions,
            running,
            carried: Vec::new(),
            last_error: None,
        }
    }

    /// Thread body: activate until the loop ends, then release every context
    pub fn run(mut self) {
        info!("Capture thread started with encoder {}", self.descriptor.name);

        loop {
            let status = self.activate();
            match status {
                CaptureStatus::Reinit => {
                    info!("Reinitializing capture");
                    continue;
                }
                CaptureStatus::Ok | CaptureStatus::Timeout | CaptureStatus::Error => {}
            }

            // Decide to exit atomically with respect to new admissions
            let mut running = self.running.lock();
            if self.admissions.is_running() && !self.admissions.is_empty() {
                debug!("Sessions queued while stopping, activating again");
                continue;
            }
            *running = false;
            drop(running);

            info!("Capture thread exiting ({})", status);
            break;
        }

        let reason = match (&self.last_error, self.admissions.is_running()) {
            (Some(err), _) => err.to_string(),
            (None, true) => "capture stopped".to_string(),
            (None, false) => "pipeline stopped".to_string(),
        };
        // While admitting, anything queued from now on belongs to the next thread
        let pending = if self.admissions.is_running() {
            Vec::new()
        } else {
            self.admissions.drain()
        };
        for ctx in self.carried.drain(..).chain(pending) {
            debug!(session = %ctx.id, "Releasing: {}", reason);
            ctx.release(&reason);
        }
    }

    /// One pass from display resolution to the end of capture
    pub fn activate(&mut self) -> CaptureStatus {
        self.last_error = None;
        let device_type = self.descriptor.device_type;

        let name = self.resolve_display(device_type);

        let mut contexts = std::mem::take(&mut self.carried);
        if contexts.is_empty() {
            match self.admissions.pop() {
                Some(ctx) => contexts.push(ctx),
                None => {
                    debug!("Admission queue stopped while idle");
                    return CaptureStatus::Error;
                }
            }
        }
        contexts.extend(self.admissions.drain());
        contexts.retain(|ctx| {
            if ctx.shutdown.is_raised() {
                ctx.release("shut down before capture");
                return false;
            }
            true
        });
        let Some(framerate) = contexts.first().map(|ctx| ctx.config.framerate) else {
            return CaptureStatus::Ok;
        };
        let framerate = match framerate {
            0 => self.settings.framerate_fallback,
            fps => fps,
        };

        let Some(mut output) = self.acquire(device_type, &name, framerate) else {
            let err = CaptureError::DisplayUnavailable {
                name,
                attempts: self.settings.acquire.attempts,
            };
            error!("{}", err);
            self.carried = contexts;
            self.last_error = Some(err);
            return CaptureStatus::Error;
        };

        let mut image = output.alloc_image();
        if let Err(err) = output.dummy_image(&mut image) {
            error!("{}", err);
            self.carried = contexts;
            self.last_error = Some(err);
            return CaptureStatus::Error;
        }
        let factory = output.device_factory();

        let mut sessions = Vec::with_capacity(contexts.len());
        let mut pending = contexts.into_iter();
        while let Some(ctx) = pending.next() {
            match self.build(Arc::clone(&ctx), factory.as_ref()) {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    error!(session = %ctx.id, "{}", err);
                    ctx.release(&err.to_string());
                    let reason = CaptureError::ActivationAborted { session: ctx.id }.to_string();
                    for other in finalize_all(sessions).into_iter().chain(pending) {
                        debug!(session = %other.id, "Releasing: {}", reason);
                        other.release(&reason);
                    }
                    self.last_error = Some(err);
                    return CaptureStatus::Error;
                }
            }
        }
        for session in &sessions {
            // Rebuilt encoders start from scratch
            session.ctx().request_keyframe();
        }

        let output_name = output.name().to_string();
        let (width, height) = (output.width(), output.height());
        info!(
            "Capturing {} ({}x{}) at {} fps for {} session(s)",
            output_name,
            width,
            height,
            framerate,
            sessions.len()
        );

        let status = loop {
            let status = {
                let mut on_snapshot =
                    |img: &Image| self.on_image_snapshot(&mut sessions, factory.as_ref(), img);
                output.capture(&mut on_snapshot, &mut image, true)
            };
            if status != CaptureStatus::Timeout {
                break status;
            }
            // Nothing new on screen; keep the encoders and their GOP
            debug!("Capture on {} timed out, resuming", output_name);
        };

        debug!("Capture returned {}", status);
        self.carried = finalize_all(sessions);
        status
    }

    /// Per-tick fan-out of one captured image to every active session
    pub fn on_image_snapshot(
        &self,
        sessions: &mut Vec<SyncSession>,
        factory: &dyn DeviceFactory,
        image: &Image,
    ) -> Snapshot {
        if !self.admissions.is_running() {
            debug!("Admission queue stopped, ending activation");
            return Snapshot::Stop(CaptureStatus::Error);
        }

        for ctx in self.admissions.drain() {
            if ctx.shutdown.is_raised() {
                ctx.release("shut down before capture");
                continue;
            }
            match self.build(Arc::clone(&ctx), factory) {
                Ok(session) => {
                    info!(session = %ctx.id, "Late joiner admitted");
                    sessions.push(session);
                }
                Err(err) => {
                    warn!(session = %ctx.id, "Late joiner rejected: {}", err);
                    ctx.release(&err.to_string());
                }
            }
        }

        let active = sessions.len();
        let mut index = 0;
        while index < sessions.len() {
            if sessions[index].ctx().shutdown.is_raised() {
                let (ctx, stats) = sessions.remove(index).finalize();
                info!(
                    session = %ctx.id,
                    "Session left after {} frames",
                    stats.frames_encoded
                );
                ctx.join.raise();
                continue;
            }

            let session = &mut sessions[index];
            if let Err(err) = session.process(image) {
                warn!(session = %session.ctx().id, "Session failed: {}", err);
                session.ctx().fail(err.to_string());
                session.ctx().shutdown.raise();
            }
            index += 1;
        }

        if active > 0 && sessions.is_empty() {
            info!("Last session left, ending activation");
            return Snapshot::Stop(CaptureStatus::Error);
        }
        Snapshot::Continue
    }

    /// Display names for the descriptor's device, falling back to the configured one
    fn resolve_display(&self, device_type: DeviceType) -> String {
        let output_name = &self.settings.output_name;
        let names = match self.displays.enumerate_names(device_type) {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                warn!("No displays reported, using configured output {:?}", output_name);
                return output_name.clone();
            }
            Err(err) => {
                warn!("{}, using configured output {:?}", err, output_name);
                return output_name.clone();
            }
        };

        let index = names.iter().position(|n| n == output_name).unwrap_or(0);
        debug!("Selected display {} of {:?}", index, names);
        names.into_iter().nth(index).unwrap_or_default()
    }

    /// Acquire the display with bounded retries
    fn acquire(&self, device_type: DeviceType, name: &str, framerate: u32) -> Option<Box<dyn Display>> {
        let AcquirePolicy { attempts, backoff } = self.settings.acquire;
        for attempt in 1..=attempts {
            if let Some(display) = self.displays.acquire(device_type, name, framerate) {
                return Some(display);
            }
            warn!("Display {:?} not ready (attempt {}/{})", name, attempt, attempts);
            if attempt < attempts {
                thread::sleep(backoff);
            }
        }
        None
    }

    fn build(
        &self,
        ctx: Arc<SyncSessionContext>,
        factory: &dyn DeviceFactory,
    ) -> Result<SyncSession, CaptureError> {
        let session = ctx.id;
        SyncSession::build(
            ctx,
            &self.descriptor,
            self.codecs.as_ref(),
            &self.settings.tuning,
            factory,
        )
        .map_err(|source| CaptureError::SessionBuild { session, source })
    }

    /// Contexts carried into the next activation
    pub fn carried(&self) -> &[Arc<SyncSessionContext>] {
        &self.carried
    }

    pub fn last_error(&self) -> Option<&CaptureError> {
        self.last_error.as_ref()
    }
}

fn finalize_all(sessions: Vec<SyncSession>) -> Vec<Arc<SyncSessionContext>> {
    sessions
        .into_iter()
        .map(|session| session.finalize().0)
        .collect()
}
