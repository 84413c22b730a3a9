// Configuration management for ARCapture

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Root under which `attempt_<N>/` directories are created
    pub storage_path: PathBuf,

    /// Selects the `attempt_<N>` directory for this run
    #[serde(default = "default_attempt_number")]
    pub attempt_number: u32,

    /// Keep one of every N camera frames
    #[serde(default)]
    pub fps_divider: FpsDivider,

    /// Play the calibration tone during the tone phase
    #[serde(default = "default_true")]
    pub tone_enabled: bool,

    /// Fixed session length before auto-stop
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: f64,

    /// RGB stream format
    #[serde(default)]
    pub rgb_output: RgbOutput,

    /// How long the RGB encoder waits for a busy container sink per frame
    #[serde(default = "default_video_ready_timeout_ms")]
    pub video_ready_timeout_ms: u64,

    /// Descending calibration frequencies (kept last: serialized as a TOML table)
    #[serde(default)]
    pub frequency_sweep: FrequencySweep,
}

/// Saved-frame rate divisor. Capture runs at 60 fps, so these give 60/30/15/5/1 fps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum FpsDivider {
    #[default]
    One,
    Two,
    Four,
    Twelve,
    Sixty,
}

impl FpsDivider {
    pub const ALL: [FpsDivider; 5] = [
        FpsDivider::One,
        FpsDivider::Two,
        FpsDivider::Four,
        FpsDivider::Twelve,
        FpsDivider::Sixty,
    ];

    pub fn value(&self) -> u32 {
        match self {
            FpsDivider::One => 1,
            FpsDivider::Two => 2,
            FpsDivider::Four => 4,
            FpsDivider::Twelve => 12,
            FpsDivider::Sixty => 60,
        }
    }
}

impl TryFrom<u32> for FpsDivider {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|d| d.value() == value)
            .ok_or_else(|| format!("fps_divider must be one of 1, 2, 4, 12, 60 (got {})", value))
    }
}

impl From<FpsDivider> for u32 {
    fn from(divider: FpsDivider) -> Self {
        divider.value()
    }
}

/// Descending frequency list `start, start - step, ..., end`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrequencySweep {
    pub start_hz: u32,
    pub end_hz: u32,
    pub step_hz: u32,
}

impl Default for FrequencySweep {
    fn default() -> Self {
        Self {
            start_hz: 30_000,
            end_hz: 1_000,
            step_hz: 1_000,
        }
    }
}

impl FrequencySweep {
    /// Frequencies from high to low, both ends inclusive when on the step grid
    pub fn frequencies(&self) -> Vec<u32> {
        if self.start_hz < self.end_hz {
            return Vec::new();
        }
        (self.end_hz..=self.start_hz)
            .rev()
            .step_by(self.step_hz.max(1) as usize)
            .collect()
    }
}

/// RGB stream format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RgbOutput {
    /// One PNG per saved frame in `rgb_frames/`
    #[default]
    PngFrames,
    /// A single `rgb.mp4` container
    Video,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: get_default_storage_path(),
            attempt_number: default_attempt_number(),
            fps_divider: FpsDivider::default(),
            frequency_sweep: FrequencySweep::default(),
            tone_enabled: true,
            session_duration_secs: default_session_duration_secs(),
            rgb_output: RgbOutput::default(),
            video_ready_timeout_ms: default_video_ready_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from the default location or return default
    pub fn load_or_default() -> Self {
        Self::load_from_or_default(&get_config_path())
    }

    /// Load config from `config_path` or return default
    pub fn load_from_or_default(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save config to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&get_config_path())
    }

    /// Save config to `config_path`
    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(config_path, contents)?;

        Ok(())
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs_f64(self.session_duration_secs.max(0.0))
    }

    pub fn video_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.video_ready_timeout_ms)
    }
}

/// Get the default storage path for sessions
fn get_default_storage_path() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Documents")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("arcapture")
        .join("config.toml")
}

fn default_attempt_number() -> u32 {
    1
}

fn default_session_duration_secs() -> f64 {
    3.0
}

fn default_video_ready_timeout_ms() -> u64 {
    5000
}

/// Default true value (for serde)
fn default_true() -> bool {
    true
}
