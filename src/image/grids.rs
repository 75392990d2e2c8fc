//! Pixel grids shared between the reconstructor and readers.

use ndarray::Array2;

/// Intensity and arrival-time grids, indexed `[[x, y]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrids {
    /// Photon count per pixel.
    pub intensity: Array2<u32>,
    /// Sum of micro times, in micro-time bins.
    pub sum_time: Array2<f64>,
    /// `sum_time / intensity` scaled to picoseconds.
    pub mean_arrival_ps: Array2<f64>,
}

impl PixelGrids {
    /// Zeroed grids of `n_x` by `n_y` pixels.
    pub fn new(n_x: usize, n_y: usize) -> Self {
        Self {
            intensity: Array2::zeros((n_x, n_y)),
            sum_time: Array2::zeros((n_x, n_y)),
            mean_arrival_ps: Array2::zeros((n_x, n_y)),
        }
    }

    /// `(n_x, n_y)`
    pub fn dim(&self) -> (usize, usize) {
        self.intensity.dim()
    }

    /// Count a photon at `(x, y)`; out-of-range pixels are ignored.
    #[inline]
    pub fn add_photon(&mut self, x: usize, y: usize, micro_time: u16, resolution_ps: f64) {
        let (Some(count), Some(sum)) = (
            self.intensity.get_mut((x, y)),
            self.sum_time.get_mut((x, y)),
        ) else {
            return;
        };
        *count = count.saturating_add(1);
        *sum += f64::from(micro_time);
        let mean = *sum / f64::from(*count) * resolution_ps;
        if let Some(m) = self.mean_arrival_ps.get_mut((x, y)) {
            *m = mean;
        }
    }

    /// Zero one pixel.
    pub fn clear_pixel(&mut self, x: usize, y: usize) {
        if let Some(v) = self.intensity.get_mut((x, y)) {
            *v = 0;
        }
        if let Some(v) = self.sum_time.get_mut((x, y)) {
            *v = 0.0;
        }
        if let Some(v) = self.mean_arrival_ps.get_mut((x, y)) {
            *v = 0.0;
        }
    }

    /// Zero every pixel of scan line `y`.
    pub fn clear_line(&mut self, y: usize) {
        let (_, n_y) = self.dim();
        if y >= n_y {
            return;
        }
        self.intensity.column_mut(y).fill(0);
        self.sum_time.column_mut(y).fill(0.0);
        self.mean_arrival_ps.column_mut(y).fill(0.0);
    }

    /// Highest photon count in the grid.
    pub fn max_intensity(&self) -> u32 {
        self.intensity.iter().copied().max().unwrap_or(0)
    }
}
