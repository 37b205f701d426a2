//! Persistent session configuration
//!
//! Stores the stream format, buffer size and device selection in a JSON
//! file at `<data_dir>/ringsync/config.json`. Missing fields take their
//! defaults so older files keep loading.

use crate::buffer::state::BYTES_PER_SAMPLE;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_frame_rate() -> u32 {
    crate::DEFAULT_FRAME_RATE
}

fn default_channels() -> u16 {
    crate::DEFAULT_CHANNELS
}

fn default_bytes_per_buffer() -> usize {
    crate::DEFAULT_BUFFER_BYTES
}

/// Stream format and device selection for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Interleaved channels per frame
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Size of each looped buffer in bytes, a whole number of frames
    #[serde(default = "default_bytes_per_buffer")]
    pub bytes_per_buffer: usize,
    /// Output device name (None = system default)
    #[serde(default)]
    pub output_device: Option<String>,
    /// Capture device name (None = system default)
    #[serde(default)]
    pub input_device: Option<String>,
    /// Whether to open the capture side at all
    #[serde(default)]
    pub enable_input: bool,
    /// Producer poll interval in milliseconds (None = a quarter buffer)
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            channels: default_channels(),
            bytes_per_buffer: default_bytes_per_buffer(),
            output_device: None,
            input_device: None,
            enable_input: false,
            poll_interval_ms: None,
        }
    }
}

impl SessionConfig {
    /// Config file path: `<data_dir>/ringsync/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ringsync")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_or_default(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config from disk");
                config
            }
            Err(e) if path.exists() => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Strictly load and validate config from `path`
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Reject formats no buffer can be created for
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.frame_rate == 0 {
            bail!("frame_rate must be positive");
        }
        if self.channels == 0 {
            bail!("channels must be positive");
        }
        if self.bytes_per_buffer == 0 || self.bytes_per_buffer % self.frame_size() != 0 {
            bail!(
                "bytes_per_buffer {} is not a positive multiple of the {}-byte frame",
                self.bytes_per_buffer,
                self.frame_size()
            );
        }
        if self.poll_interval_ms == Some(0) {
            bail!("poll_interval_ms must be positive");
        }
        Ok(())
    }

    /// Length of one buffer cycle
    pub fn buffer_duration(&self) -> Duration {
        let frames = (self.bytes_per_buffer / self.frame_size().max(1)) as u64;
        Duration::from_nanos(frames * 1_000_000_000 / self.frame_rate.max(1) as u64)
    }

    /// How often a producer should poll, a quarter buffer unless overridden
    pub fn poll_interval(&self) -> Duration {
        match self.poll_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.buffer_duration() / 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.frame_rate, 44100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.bytes_per_buffer, 8192);
        assert_eq!(config.output_device, None);
        assert!(!config.enable_input);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"output_device": "Speakers", "channels": 1}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_device, Some("Speakers".to_string()));
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_rate, 44100);
        assert_eq!(config.frame_size(), 2);
    }

    #[test]
    fn test_validate_rejects_partial_frames() {
        let config = SessionConfig {
            bytes_per_buffer: 8190,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_defaults_to_quarter_buffer() {
        let config = SessionConfig::default();
        // 2048 frames at 44.1 kHz
        assert_eq!(config.buffer_duration().as_micros(), 46439);
        assert_eq!(config.poll_interval(), config.buffer_duration() / 4);

        let config = SessionConfig {
            poll_interval_ms: Some(5),
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = SessionConfig {
            frame_rate: 48000,
            output_device: Some("Test Device".to_string()),
            enable_input: true,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = SessionConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"bytes_per_buffer": 3}"#).unwrap();

        assert!(SessionConfig::load_from(&path).is_err());
        assert_eq!(SessionConfig::load_or_default(&path), SessionConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(config, SessionConfig::default());
    }
}
