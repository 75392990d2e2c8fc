//! Read side of a reconstructed image.

use super::grids::PixelGrids;
use super::rates::RateSnapshot;
use ndarray::{Array2, Array3};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything the reconstructor publishes.
#[derive(Debug)]
pub(crate) struct Published {
    pub(crate) grids: Mutex<PixelGrids>,
    pub(crate) decay: Mutex<Vec<Vec<u32>>>,
    pub(crate) rates: Mutex<RateSnapshot>,
    pub(crate) pixel_histograms: Mutex<VecDeque<Array3<u16>>>,
    pub(crate) frame_index: AtomicU64,
}

/// Consistent copy of the image grids.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSnapshot {
    /// Frames completed when the copy was taken.
    pub frame_index: u64,
    /// Copy of the grids.
    pub grids: PixelGrids,
}

/// Clonable, thread-safe view of an [`ImageReconstructor`](super::ImageReconstructor).
///
/// Getters return copies taken under the lock the reconstructor writes
/// through, so a reader never observes a grid mid-resize.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub(crate) inner: Arc<Published>,
}

impl ImageHandle {
    pub(crate) fn new(n_x: usize, n_y: usize) -> Self {
        Self {
            inner: Arc::new(Published {
                grids: Mutex::new(PixelGrids::new(n_x, n_y)),
                decay: Mutex::new(Vec::new()),
                rates: Mutex::new(RateSnapshot::default()),
                pixel_histograms: Mutex::new(VecDeque::new()),
                frame_index: AtomicU64::new(0),
            }),
        }
    }

    /// `(n_x, n_y)` of the current grids.
    pub fn size(&self) -> (usize, usize) {
        self.inner.grids.lock().dim()
    }

    /// Photon count per pixel.
    pub fn intensity(&self) -> Array2<u32> {
        self.inner.grids.lock().intensity.clone()
    }

    /// Mean arrival time per pixel in picoseconds.
    pub fn mean_arrival_time(&self) -> Array2<f64> {
        self.inner.grids.lock().mean_arrival_ps.clone()
    }

    /// Frame index and grids taken under one lock.
    pub fn snapshot(&self) -> ImageSnapshot {
        let grids = self.inner.grids.lock();
        ImageSnapshot {
            frame_index: self.frame_index(),
            grids: grids.clone(),
        }
    }

    /// Frames completed in the current stream.
    pub fn frame_index(&self) -> u64 {
        self.inner.frame_index.load(Ordering::Relaxed)
    }

    /// Last published decay of `channel`.
    pub fn decay(&self, channel: usize) -> Option<Vec<u32>> {
        self.inner.decay.lock().get(channel).cloned()
    }

    /// Count rates of the last completed frame, per channel.
    pub fn count_rates(&self) -> Vec<f64> {
        self.inner.rates.lock().count_rates.clone()
    }

    /// Peak instantaneous rates of the last completed frame, per channel.
    pub fn peak_rates(&self) -> Vec<f64> {
        self.inner.rates.lock().peak_rates.clone()
    }

    /// Highest pixel count when the last frame closed.
    pub fn max_pixel_count(&self) -> u32 {
        self.inner.rates.lock().max_pixel_count
    }

    /// Take every queued per-pixel histogram, oldest first.
    ///
    /// Each has shape `(n_x, n_y, n_bins)`. The queue holds at most
    /// `max_queued_histograms` snapshots; a reader that falls behind loses
    /// the oldest ones.
    pub fn take_pixel_histograms(&self) -> Vec<Array3<u16>> {
        self.inner.pixel_histograms.lock().drain(..).collect()
    }

    /// Per-pixel histograms waiting to be taken.
    pub fn pending_pixel_histograms(&self) -> usize {
        self.inner.pixel_histograms.lock().len()
    }
}
