//! Synchronized capture
//!
//! One capture thread owns the display and every session's encoder. Session
//! owners only ever touch their [`SyncSessionContext`]: its signals and its
//! packet queue.
//!
//! ```text
//!  owner thread                      capture thread
//!  ────────────                      ──────────────
//!  CapturePipeline::capture ──ctx──▶ admission queue ──▶ CaptureCoordinator
//!        │                                                  │ per tick:
//!        │                                                  ├─ admit late joiners
//!        │                                                  ├─ shutdown? finalize + join
//!        │                                                  ├─ idr? force keyframe
//!        │                                                  ├─ convert (device)
//!        │                                                  └─ encode ──▶ Queue<Packet>
//!        ▼
//!  blocks on join ◀───────────────────────── raised on release
//! ```
//!
//! Displays come from a [`DisplayBackend`]; [`SyntheticBackend`] generates a
//! test pattern with scriptable failures.

mod context;
mod coordinator;
mod display;
mod error;
mod pipeline;
mod synthetic;

pub use context::{SessionId, SyncSession, SyncSessionContext};
pub use coordinator::{AdmissionQueue, CaptureCoordinator, CaptureSettings};
pub use display::{AcquirePolicy, CaptureStatus, Display, DisplayBackend, Snapshot, SnapshotCallback};
pub use error::{CaptureError, CaptureResult, SessionError};
pub use pipeline::CapturePipeline;
pub use synthetic::{SyntheticBackend, SyntheticDisplay, SyntheticScript};
