//! Per-session encode parameters

use serde::{Deserialize, Serialize};

use crate::device::ColorSpaceConfig;

/// Codec selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    H264,
    Hevc,
}

impl VideoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::Hevc => "HEVC",
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters a client negotiated for its stream
///
/// Copied into the session context at admission and never changed
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Target bitrate in kbps
    pub bitrate: u32,
    pub slices_per_frame: u32,
    /// 0 lets the encoder decide
    pub num_ref_frames: u32,
    /// Bit 0: full range. Bits 1..: 0 = Rec.601, 1 = Rec.709, 2 = Rec.2020
    pub encoder_csc_mode: u32,
    pub video_format: VideoFormat,
    /// 10-bit HDR output
    pub dynamic_range: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate: 60,
            bitrate: 20_000,
            slices_per_frame: 1,
            num_ref_frames: 0,
            encoder_csc_mode: 0,
            video_format: VideoFormat::H264,
            dynamic_range: false,
        }
    }
}

impl SessionConfig {
    /// Colour description selected by `encoder_csc_mode`
    pub fn colorspace(&self) -> ColorSpaceConfig {
        ColorSpaceConfig::from_csc_mode(self.encoder_csc_mode, self.dynamic_range)
    }
}

/// Process-wide encoder tuning shared by every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderTuning {
    /// kbps → bps for hardware encoders
    pub hardware_bitrate_multiplier: u64,
    /// kbps → bps for software encoders, which overshoot their target
    pub software_bitrate_multiplier: u64,
    /// Lower bound on software encoder slices (and threads)
    pub min_software_threads: u32,
    /// Quantizer for profiles without constant bitrate
    pub qp: u32,
}

impl Default for EncoderTuning {
    fn default() -> Self {
        Self {
            hardware_bitrate_multiplier: 1000,
            software_bitrate_multiplier: 800,
            min_software_threads: 2,
            qp: 28,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ColorRange, Colorspace};

    #[test]
    fn test_session_config_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            width = 1280
            height = 720
            video_format = "hevc"
            dynamic_range = true
            encoder_csc_mode = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.width, 1280);
        assert_eq!(config.framerate, 60);
        assert_eq!(config.video_format, VideoFormat::Hevc);

        let color = config.colorspace();
        assert_eq!(color.colorspace, Colorspace::Rec2020);
        assert_eq!(color.range, ColorRange::Full);
    }
}
