//! # lamco-capture-sync
//!
//! Synchronized multi-session desktop capture, conversion and encode.
//!
//! One capture thread owns the display. Every tick it hands the same
//! captured image to each admitted session, which converts it on its own
//! device into its encoder's pixel format and encodes it into that session's
//! packet queue.
//!
//! # Architecture
//!
//! ```text
//! lamco-capture-sync
//!   ├─> capture   (display backends, coordinator, admission front door)
//!   ├─> device    (BGRA → NV12/P010 conversion with aspect-fit viewport)
//!   ├─> encoder   (capability descriptors, probing, sessions, packets)
//!   ├─> bitstream (Annex-B scanning, SPS/VPS rewriting)
//!   └─> sync      (events and blocking queues between threads)
//! ```
//!
//! # Data Flow
//!
//! **Video Path:** Display → Coordinator → Conversion Device → Encoder → Packet Queue → Consumer
//!
//! **Control Path:** Owner → admission queue / shutdown / keyframe events → Coordinator
//!
//! **Release Path:** Coordinator → join event → Owner

#![warn(clippy::all)]

/// Annex-B parsing and parameter-set rewriting
pub mod bitstream;

/// Display capture, session admission and the capture thread
pub mod capture;

/// Configuration loading and validation
pub mod config;

/// Conversion devices (captured image → encoder frame)
pub mod device;

/// Encoder capability, probing and per-session encoding
pub mod encoder;

/// Image and frame buffers
pub mod frame;

/// Cross-thread events and queues
pub mod sync;

/// Utility functions
pub mod utils;
