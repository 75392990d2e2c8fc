//! Sync-period estimation and sync-divider correction.
//!
//! When the sync input is divided down, the fine timer of a hit spans several
//! laser periods. Folding the fine time modulo the measured period recovers
//! the arrival time within the period; the whole periods are added to the
//! macro time instead.

use tracing::debug;

/// Folds fine times into one sync period.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCorrection {
    /// Sync period in fine-timer bins.
    pub period_bins: f64,
    /// Micro-time bins per period after folding.
    pub n_bins: u32,
    /// Per-channel shift in fine-timer bins, applied before wrapping.
    pub time_shift_bins: Vec<f64>,
}

impl SyncCorrection {
    /// Correction for a known period, with no channel shifts.
    pub fn new(period_bins: f64) -> Self {
        Self {
            period_bins,
            n_bins: period_bins.ceil().max(1.0) as u32,
            time_shift_bins: Vec::new(),
        }
    }

    /// Adopt a new period estimate.
    pub fn update(&mut self, estimate: &SyncEstimate) {
        self.period_bins = estimate.period_bins;
        self.n_bins = estimate.n_bins;
    }

    /// Split `fine_bins` into `(micro_time, macro_increment)`.
    ///
    /// `micro_time` is the shifted position within the period, wrapped to
    /// `0..n_bins`. `macro_increment` is the number of fine bins covered by
    /// whole periods.
    pub fn apply(&self, channel: u8, fine_bins: u64) -> (u64, u64) {
        if !(self.period_bins > 0.0) {
            return (fine_bins, 0);
        }
        let periods = fine_bins as f64 / self.period_bins;
        let whole = periods.trunc();
        let shift = self
            .time_shift_bins
            .get(usize::from(channel))
            .copied()
            .unwrap_or(0.0);
        let within = (periods - whole) * self.period_bins + shift;
        let n_bins = i64::from(self.n_bins.max(1));
        let micro = (within.round() as i64).rem_euclid(n_bins) as u64;
        let macro_increment = (whole * self.period_bins).round() as u64;
        (micro, macro_increment)
    }
}

/// Output of a [`SyncRateEstimator`] update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncEstimate {
    /// Sync period in fine bins.
    pub period_bins: f64,
    /// Micro-time bins per period.
    pub n_bins: u32,
    /// Sync rate.
    pub rate_hz: f64,
}

/// Measures the sync period from packet timestamps.
///
/// Every packet is triggered by one divided sync edge. Every
/// `update_every` packets the elapsed time is divided by the number of
/// undivided sync periods it spans.
#[derive(Debug, Clone)]
pub struct SyncRateEstimator {
    update_every: u64,
    sync_divider: u32,
    bin_size_ps: f64,
    packets: u64,
    last_timestamp: Option<u64>,
    latest: Option<SyncEstimate>,
}

impl SyncRateEstimator {
    /// Estimator updating every `update_every` packets.
    pub fn new(update_every: u64, sync_divider: u32, bin_size_ps: f64) -> Self {
        Self {
            update_every: update_every.max(1),
            sync_divider: sync_divider.max(1),
            bin_size_ps,
            packets: 0,
            last_timestamp: None,
            latest: None,
        }
    }

    /// Feed the timestamp of the next packet. Returns a fresh estimate when
    /// one is due.
    pub fn observe(&mut self, timestamp: u64) -> Option<SyncEstimate> {
        let due = self.packets % self.update_every == 0;
        self.packets += 1;
        if !due {
            return None;
        }

        let last = self.last_timestamp.replace(timestamp)?;
        let elapsed = timestamp.checked_sub(last)?;
        if elapsed == 0 {
            return None;
        }

        let syncs = (self.update_every * u64::from(self.sync_divider)) as f64;
        let period_bins = elapsed as f64 / syncs;
        let estimate = SyncEstimate {
            period_bins,
            n_bins: period_bins.ceil().max(1.0) as u32,
            rate_hz: 1e12 / (self.bin_size_ps * period_bins),
        };
        debug!(
            period_bins,
            rate_hz = estimate.rate_hz,
            n_bins = estimate.n_bins,
            "sync period updated"
        );
        self.latest = Some(estimate);
        Some(estimate)
    }

    /// Most recent estimate.
    pub fn latest(&self) -> Option<SyncEstimate> {
        self.latest
    }

    /// Forget the packet count and estimate.
    pub fn reset(&mut self) {
        self.packets = 0;
        self.last_timestamp = None;
        self.latest = None;
    }
}
