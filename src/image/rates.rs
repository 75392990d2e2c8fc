//! Per-channel count rates.
//!
//! The frame rate is counts over frame duration. The peak rate comes from a
//! trailing window of the most recent photon arrival times.

use std::collections::VecDeque;

/// Photons kept for the instantaneous rate estimate.
pub const RATE_WINDOW: usize = 100;

#[derive(Debug, Clone, Default)]
struct ChannelRate {
    counts_this_frame: u64,
    recent_ps: VecDeque<f64>,
    peak_this_frame: f64,
}

/// Rates published at the end of a frame, in counts per second.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateSnapshot {
    /// Counts per second over the closed frame, per channel.
    pub count_rates: Vec<f64>,
    /// Highest trailing-window rate seen during the frame, per channel.
    pub peak_rates: Vec<f64>,
    /// Highest pixel intensity in the image when the frame closed.
    pub max_pixel_count: u32,
}

/// Frame and peak count rates for every channel.
#[derive(Debug, Clone)]
pub struct RateTracker {
    channels: Vec<ChannelRate>,
}

impl RateTracker {
    /// Tracker for `n_channels` channels with empty windows.
    pub fn new(n_channels: usize) -> Self {
        Self {
            channels: vec![ChannelRate::default(); n_channels],
        }
    }

    /// Record a photon on `channel` at absolute time `time_ps`.
    ///
    /// The peak rate only updates once the channel's window is full.
    pub fn photon(&mut self, channel: usize, time_ps: f64) {
        let Some(rate) = self.channels.get_mut(channel) else {
            return;
        };
        rate.counts_this_frame += 1;
        rate.recent_ps.push_back(time_ps);
        if rate.recent_ps.len() > RATE_WINDOW {
            rate.recent_ps.pop_front();
        }
        if rate.recent_ps.len() < RATE_WINDOW {
            return;
        }
        if let Some(&oldest) = rate.recent_ps.front() {
            let span_ps = time_ps - oldest;
            if span_ps > 0.0 {
                let instant = 1e12 * RATE_WINDOW as f64 / span_ps;
                rate.peak_this_frame = rate.peak_this_frame.max(instant);
            }
        }
    }

    /// Close the frame and return per-channel `(count_rate, peak_rate)`.
    ///
    /// A non-positive duration yields zero count rates.
    pub fn close_frame(&mut self, duration_s: f64) -> (Vec<f64>, Vec<f64>) {
        let mut counts = Vec::with_capacity(self.channels.len());
        let mut peaks = Vec::with_capacity(self.channels.len());
        for rate in &mut self.channels {
            counts.push(if duration_s > 0.0 {
                rate.counts_this_frame as f64 / duration_s
            } else {
                0.0
            });
            peaks.push(rate.peak_this_frame);
            rate.counts_this_frame = 0;
            rate.peak_this_frame = 0.0;
        }
        (counts, peaks)
    }
}
