//! Per-session encoder statistics
//!
//! Updated by the capture thread after every drained packet and logged when
//! the session is finalized.

use std::time::{Duration, Instant};

/// Running totals for one encoder session
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Native encoder name
    pub encoder: String,

    /// Total packets drained from the encoder
    pub frames_encoded: u64,

    /// Total bytes of encoded output
    pub bytes_encoded: u64,

    /// Packets flagged as keyframes
    pub keyframes_encoded: u64,

    /// Average submit-to-packet time in milliseconds (EMA)
    pub avg_encode_time_ms: f32,

    pub min_encode_time_ms: f32,

    pub max_encode_time_ms: f32,

    /// Target bitrate from the session configuration (kbps)
    pub target_bitrate_kbps: u32,

    pub created_at: Instant,
}

impl SessionStats {
    pub fn new(encoder: &str, target_bitrate_kbps: u32) -> Self {
        Self {
            encoder: encoder.to_string(),
            frames_encoded: 0,
            bytes_encoded: 0,
            keyframes_encoded: 0,
            avg_encode_time_ms: 0.0,
            min_encode_time_ms: f32::MAX,
            max_encode_time_ms: 0.0,
            target_bitrate_kbps,
            created_at: Instant::now(),
        }
    }

    /// Update after a packet was drained
    pub fn record_frame(&mut self, encode_time_ms: f32, bytes: usize, is_keyframe: bool) {
        self.frames_encoded += 1;
        self.bytes_encoded += bytes as u64;

        if self.frames_encoded == 1 {
            self.avg_encode_time_ms = encode_time_ms;
        } else {
            // Exponential moving average (α = 0.1)
            self.avg_encode_time_ms = self.avg_encode_time_ms * 0.9 + encode_time_ms * 0.1;
        }
        self.min_encode_time_ms = self.min_encode_time_ms.min(encode_time_ms);
        self.max_encode_time_ms = self.max_encode_time_ms.max(encode_time_ms);

        if is_keyframe {
            self.keyframes_encoded += 1;
        }
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Output bitrate over the session lifetime (kbps)
    pub fn bitrate_kbps(&self) -> u32 {
        let secs = self.uptime().as_secs_f32();
        if secs > 0.5 {
            ((self.bytes_encoded * 8) as f32 / secs / 1000.0) as u32
        } else {
            0
        }
    }

    pub fn fps(&self) -> f32 {
        let secs = self.uptime().as_secs_f32();
        if secs > 0.0 {
            self.frames_encoded as f32 / secs
        } else {
            0.0
        }
    }

    pub fn keyframe_percentage(&self) -> f32 {
        if self.frames_encoded > 0 {
            (self.keyframes_encoded as f32 / self.frames_encoded as f32) * 100.0
        } else {
            0.0
        }
    }

    /// Format stats for logging
    pub fn summary(&self) -> String {
        format!(
            "{}: {} frames ({} keyframes), {:.1} fps, {} kbps (target {}), avg {:.2}ms/frame",
            self.encoder,
            self.frames_encoded,
            self.keyframes_encoded,
            self.fps(),
            self.bitrate_kbps(),
            self.target_bitrate_kbps,
            self.avg_encode_time_ms
        )
    }
}

/// Timing helper for measuring encode operations
pub struct EncodeTimer {
    start: Instant,
}

impl EncodeTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f32() * 1000.0
    }
}
