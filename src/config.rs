//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/flim.toml` (base configuration)
//! 2. Environment variables prefixed with `FLIM_`, nested keys separated by
//!    a double underscore (`FLIM_IMAGE__HISTOGRAM_BITS=10`)
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use flim_stream::config::FlimConfig;
//!
//! let config = FlimConfig::load()?;
//! config.validate()?;
//! println!("{} x {}", config.image.n_x, config.image.n_y);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::tracing_setup::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use flim_codec::{MarkerCalibration, MarkerMap, MARKER_INPUTS};
use flim_core::FlimError;
use flim_storage::RecorderConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/flim.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlimConfig {
    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingConfig,
    /// `[pipeline]`
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// `[image]`
    #[serde(default)]
    pub image: ImageConfig,
    /// `[recording]`
    #[serde(default)]
    pub recording: RecorderConfig,
    /// `[markers]`
    #[serde(default)]
    pub markers: MarkerConfig,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// pretty, compact or json
    #[serde(default)]
    pub format: OutputFormat,
}

/// Ring sizing and image-sequence counting for the event processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Buffers in the event ring
    #[serde(default = "default_slots")]
    pub slots: usize,
    /// Events per buffer
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: usize,
    /// Frame markers per image
    #[serde(default = "default_one")]
    pub frames_per_image: u64,
    /// Images per sequence; 0 means unbounded
    #[serde(default = "default_one")]
    pub n_images: u64,
    /// Live mode: image boundaries are not counted
    #[serde(default)]
    pub continuous: bool,
    /// Reader back-off after an empty poll, in microseconds
    #[serde(default = "default_idle_sleep_us")]
    pub idle_sleep_us: u64,
}

/// Image reconstruction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Pixels per line
    #[serde(default = "default_one_usize")]
    pub n_x: usize,
    /// Lines per frame
    #[serde(default = "default_one_usize")]
    pub n_y: usize,
    /// Odd lines run right to left
    #[serde(default)]
    pub bidirectional: bool,
    /// Decay histogram depth; micro times are shifted down to this many bits
    #[serde(default = "default_histogram_bits")]
    pub histogram_bits: u32,
    /// Keep per-pixel decay histograms and queue a snapshot per image
    #[serde(default)]
    pub histogramming: bool,
    /// Snapshots kept for the reader; the oldest is dropped beyond this
    #[serde(default = "default_max_queued_histograms")]
    pub max_queued_histograms: usize,
    /// Frames summed into one image
    #[serde(default = "default_one")]
    pub frame_accumulation: u64,
    /// How often the live decay is published
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

/// Marker wiring and pulse-width calibration for vendor decoders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Hardware marker inputs to canonical kinds (FIFO cards)
    #[serde(default)]
    pub map: MarkerMap,
    /// Pulse-width table for single-input markers (time taggers)
    #[serde(default)]
    pub calibration: MarkerCalibration,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_slots() -> usize {
    1000
}

fn default_slot_capacity() -> usize {
    10_000
}

fn default_one() -> u64 {
    1
}

fn default_one_usize() -> usize {
    1
}

fn default_idle_sleep_us() -> u64 {
    1000
}

fn default_histogram_bits() -> u32 {
    8
}

fn default_max_queued_histograms() -> usize {
    16
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            slot_capacity: default_slot_capacity(),
            frames_per_image: default_one(),
            n_images: default_one(),
            continuous: false,
            idle_sleep_us: default_idle_sleep_us(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            n_x: default_one_usize(),
            n_y: default_one_usize(),
            bidirectional: false,
            histogram_bits: default_histogram_bits(),
            histogramming: false,
            max_queued_histograms: default_max_queued_histograms(),
            frame_accumulation: default_one(),
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl FlimConfig {
    /// Load configuration from `config/flim.toml` and environment variables
    pub fn load() -> Result<Self, FlimError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, FlimError> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| FlimError::ConfigLoad(e.to_string()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FLIM_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.pipeline.slots == 0 || self.pipeline.slot_capacity == 0 {
            return Err(format!(
                "Event ring needs at least one slot of non-zero capacity, got {} x {}",
                self.pipeline.slots, self.pipeline.slot_capacity
            ));
        }
        if self.pipeline.frames_per_image == 0 {
            return Err("frames_per_image must be at least 1".to_string());
        }

        if self.image.n_x == 0 || self.image.n_y == 0 {
            return Err(format!(
                "Image size must be non-zero, got {} x {}",
                self.image.n_x, self.image.n_y
            ));
        }
        if self.image.histogram_bits > 12 {
            return Err(format!(
                "Invalid histogram_bits {}. Must be 0-12",
                self.image.histogram_bits
            ));
        }
        if self.image.frame_accumulation == 0 {
            return Err("frame_accumulation must be at least 1".to_string());
        }

        if self.recording.threaded && self.recording.writer_slots == 0 {
            return Err("Threaded recording needs at least one writer slot".to_string());
        }

        if self.markers.map.inputs.len() > MARKER_INPUTS {
            return Err(format!(
                "Marker map lists {} inputs, hardware has {}",
                self.markers.map.inputs.len(),
                MARKER_INPUTS
            ));
        }
        self.markers.calibration.validate()
    }
}
