//! Marker classification and hardware marker input mapping.
//!
//! Some hardware has a single marker input and encodes the marker kind in
//! the pulse width. A [`MarkerCalibration`] maps a measured duration to a
//! kind using an ordered table of breakpoints. An [`EdgeClassifier`] pairs
//! rising and falling edges and applies the calibration.

use flim_core::Mark;
use serde::{Deserialize, Serialize};

/// A single canonical marker kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Pixel,
    LineStart,
    LineEnd,
    Frame,
    Image,
}

impl MarkerKind {
    /// Canonical mark bit for this kind.
    pub fn mark(self) -> Mark {
        match self {
            MarkerKind::Pixel => Mark::PIXEL,
            MarkerKind::LineStart => Mark::LINE_START,
            MarkerKind::LineEnd => Mark::LINE_END,
            MarkerKind::Frame => Mark::FRAME,
            MarkerKind::Image => Mark::IMAGE,
        }
    }
}

/// One row of a duration table: pulses shorter than `below_ps` are `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Exclusive upper bound on the pulse duration.
    pub below_ps: f64,
    /// Marker assigned to pulses in range.
    pub kind: MarkerKind,
}

/// Ordered pulse-duration table.
///
/// A duration `d` maps to the first row with `d < below_ps`. Durations at or
/// beyond the last row are unrecognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerCalibration {
    /// Rows in ascending `below_ps` order.
    pub breakpoints: Vec<Breakpoint>,
}

impl Default for MarkerCalibration {
    fn default() -> Self {
        Self::time_tagger()
    }
}

impl MarkerCalibration {
    /// Table for scanners driving a time-tagger marker input.
    ///
    /// Measured pulses are roughly 23 ns (line end), 71 ns (line start) and
    /// 154 ns (frame).
    pub fn time_tagger() -> Self {
        Self {
            breakpoints: vec![
                Breakpoint {
                    below_ps: 30e3,
                    kind: MarkerKind::LineEnd,
                },
                Breakpoint {
                    below_ps: 100e3,
                    kind: MarkerKind::LineStart,
                },
                Breakpoint {
                    below_ps: 200e3,
                    kind: MarkerKind::Frame,
                },
            ],
        }
    }

    /// Check that the table is non-empty with strictly ascending positive
    /// bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.breakpoints.is_empty() {
            return Err("marker calibration has no breakpoints".into());
        }
        let mut last = 0.0;
        for bp in &self.breakpoints {
            if !(bp.below_ps > last) {
                return Err(format!(
                    "marker breakpoints must be ascending and positive, got {} after {}",
                    bp.below_ps, last
                ));
            }
            last = bp.below_ps;
        }
        Ok(())
    }

    /// Marker kind for a pulse of `duration_ps`, if any.
    pub fn classify(&self, duration_ps: f64) -> Option<MarkerKind> {
        if duration_ps < 0.0 {
            return None;
        }
        self.breakpoints
            .iter()
            .find(|bp| duration_ps < bp.below_ps)
            .map(|bp| bp.kind)
    }
}

/// Result of feeding one edge to an [`EdgeClassifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// Rising edge stored; nothing to emit.
    Pending,
    /// Falling edge closed a pulse of a known kind.
    Marker(MarkerKind),
    /// Falling edge with no rising edge, or a pulse outside the table.
    Unrecognized,
}

/// Two-state rising/falling edge matcher.
#[derive(Debug, Clone)]
pub struct EdgeClassifier {
    calibration: MarkerCalibration,
    bin_size_ps: f64,
    rising_at: Option<u64>,
}

impl EdgeClassifier {
    /// `bin_size_ps` converts edge timestamps to picoseconds.
    pub fn new(calibration: MarkerCalibration, bin_size_ps: f64) -> Self {
        Self {
            calibration,
            bin_size_ps,
            rising_at: None,
        }
    }

    /// Feed one edge at `time_bins`.
    pub fn edge(&mut self, time_bins: u64, rising: bool) -> EdgeOutcome {
        if rising {
            self.rising_at = Some(time_bins);
            return EdgeOutcome::Pending;
        }
        let Some(start) = self.rising_at.take() else {
            return EdgeOutcome::Unrecognized;
        };
        let Some(width) = time_bins.checked_sub(start) else {
            return EdgeOutcome::Unrecognized;
        };
        match self.calibration.classify(width as f64 * self.bin_size_ps) {
            Some(kind) => EdgeOutcome::Marker(kind),
            None => EdgeOutcome::Unrecognized,
        }
    }

    /// Drop a pending rising edge.
    pub fn reset(&mut self) {
        self.rising_at = None;
    }
}

/// Marker inputs available on FIFO cards.
pub const MARKER_INPUTS: usize = 4;

/// Assignment of hardware marker inputs to canonical marker kinds.
///
/// Input `i` of the device produces `inputs[i]`. Inputs that are `None` or
/// beyond the end of the list are ignored, as is anything past
/// [`MARKER_INPUTS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerMap {
    /// Marker kind per hardware input.
    pub inputs: Vec<Option<MarkerKind>>,
}

impl Default for MarkerMap {
    /// Pixel, line and frame clocks on inputs 0..3, as wired for FIFO
    /// imaging.
    fn default() -> Self {
        Self {
            inputs: vec![
                Some(MarkerKind::Pixel),
                Some(MarkerKind::LineStart),
                Some(MarkerKind::Frame),
            ],
        }
    }
}

impl MarkerMap {
    /// Combine the kinds for every set bit of `input_bits`.
    ///
    /// Returns an empty set if no set bit maps to a kind.
    pub fn marks(&self, input_bits: u8) -> Mark {
        self.inputs
            .iter()
            .enumerate()
            .take(MARKER_INPUTS)
            .filter(|(i, _)| input_bits & (1 << i) != 0)
            .filter_map(|(_, kind)| kind.map(MarkerKind::mark))
            .fold(Mark::empty(), |acc, m| acc | m)
    }

    /// Whether any input produces pixel markers.
    pub fn has_pixel_clock(&self) -> bool {
        self.inputs.contains(&Some(MarkerKind::Pixel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_boundaries() {
        let cal = MarkerCalibration::time_tagger();
        assert_eq!(cal.classify(30e3 - 1.0), Some(MarkerKind::LineEnd));
        assert_eq!(cal.classify(30e3), Some(MarkerKind::LineStart));
        assert_eq!(cal.classify(100e3 - 1.0), Some(MarkerKind::LineStart));
        assert_eq!(cal.classify(100e3), Some(MarkerKind::Frame));
        assert_eq!(cal.classify(200e3 - 1.0), Some(MarkerKind::Frame));
        assert_eq!(cal.classify(200e3), None);
    }

    #[test]
    fn test_edges() {
        let mut edges = EdgeClassifier::new(MarkerCalibration::time_tagger(), 1000.0);
        assert_eq!(edges.edge(50, false), EdgeOutcome::Unrecognized);
        assert_eq!(edges.edge(1_000, true), EdgeOutcome::Pending);
        // 71 ns at 1 ns/bin
        assert_eq!(
            edges.edge(1_071, false),
            EdgeOutcome::Marker(MarkerKind::LineStart)
        );
        assert_eq!(edges.edge(1_080, false), EdgeOutcome::Unrecognized);
        assert_eq!(edges.edge(2_000, true), EdgeOutcome::Pending);
        assert_eq!(edges.edge(2_300, false), EdgeOutcome::Unrecognized);
    }

    #[test]
    fn test_validate_rejects_unordered() {
        let mut cal = MarkerCalibration::time_tagger();
        cal.breakpoints.swap(0, 1);
        assert!(cal.validate().is_err());
        assert!(MarkerCalibration::time_tagger().validate().is_ok());
    }

    #[test]
    fn test_marker_map() {
        let map = MarkerMap::default();
        assert_eq!(map.marks(0b001), Mark::PIXEL);
        assert_eq!(map.marks(0b110), Mark::LINE_START | Mark::FRAME);
        assert_eq!(map.marks(0b1000), Mark::empty());
        assert!(map.has_pixel_clock());
    }

    #[test]
    fn test_calibration_from_toml() {
        let cal: MarkerCalibration = toml::from_str(
            r#"
            breakpoints = [
                { below_ps = 5e3, kind = "pixel" },
                { below_ps = 9e3, kind = "frame" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(cal.classify(6e3), Some(MarkerKind::Frame));
    }
}
