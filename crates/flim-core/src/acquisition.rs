//! Timing description of an acquisition.

use serde::{Deserialize, Serialize};

/// What a producer knows about the stream it emits.
///
/// The recorder writes these values into the container header and the
/// reconstructor uses them to convert raw timestamps into picoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameters {
    /// Free-text description of the TCSPC hardware.
    pub tcspc_system: String,
    /// Laser/sync repetition rate.
    pub sync_rate_hz: f64,
    /// Number of micro-time bins per sync period.
    pub n_timebins: u32,
    /// Number of detection channels.
    pub n_channels: u32,
    /// Width of one micro-time bin.
    pub micro_resolution_ps: f64,
    /// Width of one macro-time unit.
    pub macro_resolution_ps: f64,
    /// Whether the stream carries dedicated pixel markers.
    pub using_pixel_markers: bool,
    /// Whether alternate lines are scanned in reverse.
    pub bidirectional: bool,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            tcspc_system: String::from("unknown"),
            sync_rate_hz: 80e6,
            n_timebins: 256,
            n_channels: 1,
            micro_resolution_ps: 48.828_125,
            macro_resolution_ps: 12_500.0,
            using_pixel_markers: false,
            bidirectional: false,
        }
    }
}

impl AcquisitionParameters {
    /// Check that every value can drive a reconstruction.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.micro_resolution_ps > 0.0) {
            return Err(format!(
                "micro_resolution_ps must be positive, got {}",
                self.micro_resolution_ps
            ));
        }
        if !(self.macro_resolution_ps > 0.0) {
            return Err(format!(
                "macro_resolution_ps must be positive, got {}",
                self.macro_resolution_ps
            ));
        }
        if self.n_channels == 0 || self.n_channels > 15 {
            return Err(format!(
                "n_channels must be in 1..=15, got {}",
                self.n_channels
            ));
        }
        if self.n_timebins == 0 || self.n_timebins > 4096 {
            return Err(format!(
                "n_timebins must be in 1..=4096, got {}",
                self.n_timebins
            ));
        }
        if self.sync_rate_hz < 0.0 {
            return Err(format!(
                "sync_rate_hz must not be negative, got {}",
                self.sync_rate_hz
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(AcquisitionParameters::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_resolution() {
        let params = AcquisitionParameters {
            micro_resolution_ps: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let params: AcquisitionParameters =
            toml::from_str("n_channels = 2\nbidirectional = true\n").unwrap();
        assert_eq!(params.n_channels, 2);
        assert!(params.bidirectional);
        assert_eq!(params.n_timebins, 256);
    }
}
