//! Application configuration
//!
//! Stored as TOML in the platform config directory. Every field has a
//! default, so a partial file (or none at all) is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::buffer::OverflowPolicy;
use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bound on waiting for each worker during stop
    pub shutdown_timeout_ms: u64,
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub queue: QueueConfig,
}

/// Audio device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per frame
    pub frame_size: usize,
    /// Input device index; host default when unset
    pub input_device: Option<usize>,
    /// Output device index; host default when unset
    pub output_device: Option<usize>,
}

/// UDP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local port, used when a call request does not name one
    pub local_port: u16,
    /// Receive buffer size; the transport never goes below 4096 bytes
    pub max_datagram_size: usize,
    /// Sleep between polls when no datagram is waiting
    pub poll_interval_ms: u64,
}

/// Frame queue sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Frames per queue; 0 for unbounded
    pub max_frames: usize,
    pub overflow: OverflowPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            audio: AudioConfig::default(),
            network: NetworkConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
            input_device: None,
            output_device: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_port: DEFAULT_UDP_PORT,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl QueueConfig {
    pub fn capacity(&self) -> Option<usize> {
        (self.max_frames > 0).then_some(self.max_frames)
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Default location of the config file, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "udp-voice-link").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });

        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate", "must be positive".into());
        }
        if self.audio.channels == 0 {
            return invalid("audio.channels", "must be positive".into());
        }
        if self.audio.frame_size == 0 {
            return invalid("audio.frame_size", "must be positive".into());
        }
        if self.network.poll_interval_ms == 0 {
            return invalid("network.poll_interval_ms", "must be positive".into());
        }

        // One mu-law byte per sample, and a frame must fit one datagram
        let frame_bytes = self.audio.frame_size * self.audio.channels as usize;
        if self.network.max_datagram_size < frame_bytes {
            return invalid(
                "network.max_datagram_size",
                format!(
                    "{} bytes cannot hold a {}-byte encoded frame",
                    self.network.max_datagram_size, frame_bytes
                ),
            );
        }

        Ok(())
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the default config file, falling back to defaults if it is
    /// missing or unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring config file");
                Self::default()
            }
        }
    }

    /// Write a config file, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, text).map_err(write_err)
    }
}
