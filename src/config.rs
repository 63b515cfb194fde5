//! Application configuration
//!
//! All sections deserialize from TOML with defaults for every missing key,
//! so a partial file (or no file at all) yields a usable configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;
use crate::proximity::ProximityThresholds;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub audio: AudioConfig,
    pub telemetry: TelemetryConfig,
    pub proximity: ProximityConfig,
    pub privacy: PrivacySettings,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "proximity-relay", "proximity-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the platform default), falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        tracing::info!("Loading config from {}", path.display());
        Self::load(&path)
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.telemetry.cadence.validate()?;
        self.proximity.thresholds()?;
        Ok(())
    }
}

/// Relay endpoints, one per modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub audio_endpoint: String,
    pub telemetry_endpoint: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            audio_endpoint: "ws://127.0.0.1:8080/audio".to_string(),
            telemetry_endpoint: "ws://127.0.0.1:8080/location".to_string(),
        }
    }
}

/// Raw PCM capture/playback format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    pub frame_duration_ms: u32,
    /// Inbound frames buffered ahead of the playback sink
    pub playback_queue_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bytes_per_sample: DEFAULT_BYTES_PER_SAMPLE,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            playback_queue_frames: DEFAULT_PLAYBACK_QUEUE_FRAMES,
        }
    }
}

impl AudioConfig {
    /// Samples per channel in one frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }

    /// Size in bytes of one raw capture frame
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * self.channels as usize * self.bytes_per_sample as usize
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_bytes() == 0 {
            return Err(ConfigError::Invalid("audio frame size is zero".to_string()));
        }
        if self.playback_queue_frames == 0 {
            return Err(ConfigError::Invalid("playback queue must hold at least one frame".to_string()));
        }
        Ok(())
    }
}

/// Telemetry section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub cadence: TrackingCadence,
    /// Start position tracking when the session opens, until
    /// `stop_tracking` turns it off
    pub track_on_connect: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            cadence: TrackingCadence::default(),
            track_on_connect: true,
        }
    }
}

/// How often the position source should deliver samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingCadence {
    pub interval_ms: u64,
    pub fastest_interval_ms: u64,
}

impl Default for TrackingCadence {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            fastest_interval_ms: DEFAULT_FASTEST_UPDATE_INTERVAL_MS,
        }
    }
}

impl TrackingCadence {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn fastest_interval(&self) -> Duration {
        Duration::from_millis(self.fastest_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 || self.fastest_interval_ms > self.interval_ms {
            return Err(ConfigError::Invalid(format!(
                "tracking cadence {}ms (fastest {}ms) is not usable",
                self.interval_ms, self.fastest_interval_ms
            )));
        }
        Ok(())
    }
}

/// Proximity buckets, alert radius and notification switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub near_m: u32,
    pub medium_m: u32,
    pub far_m: u32,
    /// Radius for "peer entered radius" alerts
    pub alert_threshold_m: u32,
    pub notifications_enabled: bool,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            near_m: DEFAULT_NEAR_M,
            medium_m: DEFAULT_MEDIUM_M,
            far_m: DEFAULT_FAR_M,
            alert_threshold_m: DEFAULT_ALERT_THRESHOLD_M,
            notifications_enabled: true,
        }
    }
}

impl ProximityConfig {
    /// Validated bucket boundaries
    pub fn thresholds(&self) -> Result<ProximityThresholds, ConfigError> {
        ProximityThresholds::new(self.near_m, self.medium_m, self.far_m)
    }
}

/// What the user agreed to share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub audio_sharing_enabled: bool,
    pub location_sharing_enabled: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            audio_sharing_enabled: true,
            location_sharing_enabled: true,
        }
    }
}
