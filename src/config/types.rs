//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::AcquirePolicy;
use crate::encoder::{EncoderTuning, SessionConfig, VideoFormat};

/// Display capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Display to capture; empty selects the first one
    pub output_name: String,

    /// Acquisition attempts per activation
    pub acquire_attempts: u32,

    /// Delay between acquisition attempts in milliseconds
    pub acquire_backoff_ms: u64,

    /// Framerate used when a session does not specify one
    pub framerate_fallback: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let policy = AcquirePolicy::default();
        Self {
            output_name: String::new(),
            acquire_attempts: policy.attempts,
            acquire_backoff_ms: policy.backoff.as_millis() as u64,
            framerate_fallback: 60,
        }
    }
}

impl CaptureConfig {
    pub fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy {
            attempts: self.acquire_attempts,
            backoff: Duration::from_millis(self.acquire_backoff_ms),
        }
    }
}

/// Encoder selection and tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Preferred encoder ("nvenc", "amf", "openh264", "software")
    pub encoder: String,

    /// kbps to bps multiplier for hardware encoders
    pub hardware_bitrate_multiplier: u64,

    /// kbps to bps multiplier for software encoders
    pub software_bitrate_multiplier: u64,

    /// Minimum slice/thread count for software encoders
    pub min_software_threads: u32,

    /// Constant quantizer for encoders without CBR
    pub qp: u32,

    /// 0 = auto, 1 = H.264 only, 2 = HEVC SDR, 3 = HEVC SDR and HDR
    pub hevc_mode: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        let tuning = EncoderTuning::default();
        Self {
            encoder: "software".to_string(),
            hardware_bitrate_multiplier: tuning.hardware_bitrate_multiplier,
            software_bitrate_multiplier: tuning.software_bitrate_multiplier,
            min_software_threads: tuning.min_software_threads,
            qp: tuning.qp,
            hevc_mode: 0,
        }
    }
}

impl EncoderConfig {
    pub fn tuning(&self) -> EncoderTuning {
        EncoderTuning {
            hardware_bitrate_multiplier: self.hardware_bitrate_multiplier,
            software_bitrate_multiplier: self.software_bitrate_multiplier,
            min_software_threads: self.min_software_threads,
            qp: self.qp,
        }
    }

    /// Whether `hevc_mode` allows a session with this codec and range
    pub fn permits(&self, session: &SessionConfig) -> bool {
        match (self.hevc_mode, session.video_format) {
            (0, _) => true,
            (_, VideoFormat::H264) => true,
            (1, VideoFormat::Hevc) => false,
            (2, VideoFormat::Hevc) => !session.dynamic_range,
            (_, VideoFormat::Hevc) => true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    pub format: String,

    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}
