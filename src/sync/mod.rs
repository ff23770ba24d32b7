//! Cross-thread signalling primitives
//!
//! The capture thread never shares mutable state with session owners.
//! Everything that crosses a thread boundary goes through one of these:
//!
//! ```text
//!  session owner ──push ctx──▶ Queue<Arc<SyncSessionContext>> ──▶ capture thread
//!  session owner ──raise────▶ Event (shutdown / keyframe)      ──▶ capture thread
//!  capture thread ──raise───▶ Event (join)                     ──▶ session owner
//!  capture thread ──push────▶ Queue<Packet>                    ──▶ packet consumer
//! ```

mod event;
mod queue;

pub use event::Event;
pub use queue::Queue;
