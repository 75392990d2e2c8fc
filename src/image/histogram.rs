//! Decay histograms: per-channel live decays and per-pixel image histograms.

use ndarray::Array3;

/// Largest supported histogram depth; micro times carry 12 bits.
pub const MAX_HISTOGRAM_BITS: u32 = 12;

/// Maps 12-bit micro times onto `2^bits` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramLayout {
    bits: u32,
}

impl HistogramLayout {
    /// Depths above 12 bits are clamped.
    pub fn new(bits: u32) -> Self {
        Self {
            bits: bits.min(MAX_HISTOGRAM_BITS),
        }
    }

    /// Histogram depth in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Bins per histogram.
    pub fn n_bins(&self) -> usize {
        1 << self.bits
    }

    /// Bin of a 12-bit micro time.
    #[inline]
    pub fn bin(&self, micro_time: u16) -> usize {
        usize::from(micro_time >> (MAX_HISTOGRAM_BITS - self.bits))
    }
}

/// Per-channel decay being accumulated between publications.
#[derive(Debug, Clone)]
pub struct DecayAccumulator {
    live: Vec<Vec<u32>>,
}

impl DecayAccumulator {
    /// Zeroed decays for `n_channels` channels.
    pub fn new(n_channels: usize, n_bins: usize) -> Self {
        Self {
            live: vec![vec![0; n_bins]; n_channels],
        }
    }

    /// Count one photon; out-of-range indices are ignored.
    #[inline]
    pub fn add(&mut self, channel: usize, bin: usize) {
        if let Some(count) = self.live.get_mut(channel).and_then(|c| c.get_mut(bin)) {
            *count = count.saturating_add(1);
        }
    }

    /// Move the accumulated counts into `published` and start from zero.
    pub fn publish_into(&mut self, published: &mut Vec<Vec<u32>>) {
        published.clone_from(&self.live);
        for channel in &mut self.live {
            channel.fill(0);
        }
    }
}

/// Per-pixel decay histogram for the current accumulation group.
#[derive(Debug, Clone)]
pub struct PixelHistogram {
    counts: Array3<u16>,
}

impl PixelHistogram {
    /// Shape `(n_x, n_y, n_bins)`.
    pub fn new(n_x: usize, n_y: usize, n_bins: usize) -> Self {
        Self {
            counts: Array3::zeros((n_x, n_y, n_bins)),
        }
    }

    /// Count one photon; out-of-range indices are ignored.
    #[inline]
    pub fn add(&mut self, x: usize, y: usize, bin: usize) {
        if let Some(count) = self.counts.get_mut((x, y, bin)) {
            *count = count.saturating_add(1);
        }
    }

    /// Copy out the current counts and clear them.
    pub fn take_snapshot(&mut self) -> Array3<u16> {
        let snapshot = self.counts.clone();
        self.counts.fill(0);
        snapshot
    }

    /// `(n_x, n_y, n_bins)`
    pub fn dim(&self) -> (usize, usize, usize) {
        self.counts.dim()
    }
}
