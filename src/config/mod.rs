//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod types;

pub use types::{CaptureConfig, EncoderConfig, LoggingConfig};

use crate::capture::CaptureSettings;
use crate::encoder::SessionConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display capture configuration
    pub capture: CaptureConfig,
    /// Encoder selection and tuning
    pub encoder: EncoderConfig,
    /// Session parameters used by the demo sessions
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Acquisition must try at least once
        if self.capture.acquire_attempts == 0 {
            anyhow::bail!("capture.acquire_attempts must be at least 1");
        }
        if self.capture.framerate_fallback == 0 {
            anyhow::bail!("capture.framerate_fallback must be positive");
        }

        match self.encoder.encoder.as_str() {
            "nvenc" | "amf" | "openh264" | "software" => {}
            _ => anyhow::bail!("Invalid encoder: {}", self.encoder.encoder),
        }

        if self.encoder.hevc_mode > 3 {
            anyhow::bail!("Invalid hevc_mode: {} (expected 0-3)", self.encoder.hevc_mode);
        }

        if self.encoder.hardware_bitrate_multiplier == 0
            || self.encoder.software_bitrate_multiplier == 0
        {
            anyhow::bail!("Bitrate multipliers must be positive");
        }

        if self.encoder.qp > 51 {
            anyhow::bail!("qp ({}) must be between 0 and 51", self.encoder.qp);
        }

        let session = &self.session;
        if session.width == 0 || session.height == 0 {
            anyhow::bail!(
                "Invalid session size: {}x{}",
                session.width,
                session.height
            );
        }
        if session.width % 2 != 0 || session.height % 2 != 0 {
            anyhow::bail!(
                "Session size {}x{} must be even for 4:2:0 output",
                session.width,
                session.height
            );
        }
        if session.bitrate == 0 {
            anyhow::bail!("session.bitrate must be positive");
        }

        if !self.encoder.permits(session) {
            anyhow::bail!(
                "hevc_mode {} does not allow {}{} sessions",
                self.encoder.hevc_mode,
                session.video_format,
                if session.dynamic_range { " HDR" } else { "" }
            );
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, encoder: Option<String>, output_name: Option<String>) -> Self {
        if let Some(encoder) = encoder {
            self.encoder.encoder = encoder;
        }
        if let Some(output_name) = output_name {
            self.capture.output_name = output_name;
        }
        self
    }

    /// Settings handed to the capture pipeline
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            output_name: self.capture.output_name.clone(),
            acquire: self.capture.acquire_policy(),
            tuning: self.encoder.tuning(),
            framerate_fallback: self.capture.framerate_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::VideoFormat;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.encoder.encoder, "software");
        assert_eq!(config.capture.acquire_attempts, 2);
        assert_eq!(config.session.framerate, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[capture]
output_name = "HDMI-1"
acquire_backoff_ms = 50

[encoder]
software_bitrate_multiplier = 750

[session]
width = 1280
height = 720
video_format = "hevc"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.capture.output_name, "HDMI-1");
        assert_eq!(config.session.video_format, VideoFormat::Hevc);
        assert_eq!(config.session.framerate, 60);
        assert_eq!(config.logging.format, "json");

        let settings = config.capture_settings();
        assert_eq!(settings.acquire.attempts, 2);
        assert_eq!(settings.acquire.backoff, Duration::from_millis(50));
        assert_eq!(settings.tuning.software_bitrate_multiplier, 750);
        assert_eq!(settings.tuning.hardware_bitrate_multiplier, 1000);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[encoder]\nencoder = \"quicksync\"").unwrap();
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default_config();
        config.session.width = 1279;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.capture.acquire_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.encoder.hevc_mode = 1;
        config.session.video_format = VideoFormat::Hevc;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default_config()
            .with_overrides(Some("nvenc".to_string()), Some("DP-2".to_string()));
        assert_eq!(config.encoder.encoder, "nvenc");
        assert_eq!(config.capture.output_name, "DP-2");

        let config = Config::default_config().with_overrides(None, None);
        assert_eq!(config, Config::default_config());
    }
}
