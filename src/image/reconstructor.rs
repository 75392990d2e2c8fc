//! Event consumer that rebuilds lifetime images from the marker stream.
//!
//! Scan position is tracked from line and frame markers. With a pixel clock
//! every pixel marker advances `x`; without one, `x` is derived from the time
//! since the line started relative to the first line duration measured in
//! the frame. Geometry without a pixel clock is taken from the markers: once
//! a frame has completed, the image is resized to the measured line count.

use super::grids::PixelGrids;
use super::handle::ImageHandle;
use super::histogram::{DecayAccumulator, HistogramLayout, PixelHistogram};
use super::rates::{RateSnapshot, RateTracker};
use crate::config::ImageConfig;
use flim_codec::MacroClock;
use flim_core::{
    AcquisitionParameters, AppResult, EventConsumer, EventKind, FlimError, Mark, TcspcEvent,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Counters for events the reconstructor saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructorStats {
    /// Photons seen, placed or not.
    pub photons: u64,
    /// Photons added to a pixel.
    pub placed: u64,
    /// Photons outside the image or outside an active line.
    pub outside_image: u64,
    /// Photons on a channel beyond the configured channel count.
    pub bad_channel: u64,
    /// Marker records seen.
    pub markers: u64,
    /// Control records with undefined mark bits.
    pub unrecognized: u64,
    /// Frame markers seen.
    pub frames: u64,
    /// Image resizes to the measured line count.
    pub resizes: u64,
    /// Pixel-histogram snapshots discarded because the queue was full.
    pub dropped_histograms: u64,
}

#[derive(Debug, Clone)]
struct ScanState {
    x: i64,
    y: i64,
    line_active: bool,
    frame_index: u64,
    line_start: u64,
    /// Reference line duration in macro ticks.
    line_duration: Option<f64>,
    reference_taken: bool,
    /// Sum of line durations in the current frame, in macro ticks.
    frame_duration: u64,
    last_frame_at: Option<u64>,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            x: -1,
            y: -1,
            line_active: false,
            frame_index: 0,
            line_start: 0,
            line_duration: None,
            reference_taken: false,
            frame_duration: 0,
            last_frame_at: None,
        }
    }
}

/// Builds intensity, mean arrival time, decays and rates from events.
pub struct ImageReconstructor {
    configured_size: (usize, usize),
    n_x: usize,
    n_y: usize,
    using_pixel_markers: bool,
    bidirectional: bool,
    n_channels: usize,
    micro_resolution_ps: f64,
    macro_resolution_ps: f64,
    layout: HistogramLayout,
    histogramming: bool,
    max_queued_histograms: usize,
    frame_accumulation: u64,
    refresh_interval: Duration,

    clock: MacroClock,
    scan: ScanState,
    decay: DecayAccumulator,
    pixel_histogram: Option<PixelHistogram>,
    rates: RateTracker,
    next_refresh: Instant,
    active: bool,
    stats: ReconstructorStats,
    handle: ImageHandle,
}

impl std::fmt::Debug for ImageReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReconstructor")
            .field("size", &(self.n_x, self.n_y))
            .field("frame_index", &self.scan.frame_index)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl ImageReconstructor {
    /// Reconstructor for `acquisition` with the `[image]` settings.
    pub fn new(acquisition: &AcquisitionParameters, config: &ImageConfig) -> Self {
        let n_x = config.n_x.max(1);
        let n_y = config.n_y.max(1);
        let layout = HistogramLayout::new(config.histogram_bits);
        let n_channels = acquisition.n_channels.max(1) as usize;

        Self {
            configured_size: (n_x, n_y),
            n_x,
            n_y,
            using_pixel_markers: acquisition.using_pixel_markers,
            bidirectional: config.bidirectional || acquisition.bidirectional,
            n_channels,
            micro_resolution_ps: acquisition.micro_resolution_ps,
            macro_resolution_ps: acquisition.macro_resolution_ps,
            layout,
            histogramming: config.histogramming,
            max_queued_histograms: config.max_queued_histograms.max(1),
            frame_accumulation: config.frame_accumulation.max(1),
            refresh_interval: Duration::from_millis(config.refresh_interval_ms),
            clock: MacroClock::new(),
            scan: ScanState::default(),
            decay: DecayAccumulator::new(n_channels, layout.n_bins()),
            pixel_histogram: None,
            rates: RateTracker::new(n_channels),
            next_refresh: Instant::now(),
            active: false,
            stats: ReconstructorStats::default(),
            handle: ImageHandle::new(n_x, n_y),
        }
    }

    /// Shared read view of the published image.
    pub fn handle(&self) -> ImageHandle {
        self.handle.clone()
    }

    /// Event counters for the current stream.
    pub fn stats(&self) -> ReconstructorStats {
        self.stats
    }

    /// Current `(n_x, n_y)`, which may differ from the configured size after
    /// a marker-derived resize.
    pub fn image_size(&self) -> (usize, usize) {
        (self.n_x, self.n_y)
    }

    /// Frames completed in the current stream.
    pub fn frame_index(&self) -> u64 {
        self.scan.frame_index
    }

    /// Set the image size. Fails while a stream is active.
    pub fn set_image_size(&mut self, n_x: usize, n_y: usize) -> AppResult<()> {
        self.ensure_idle("set the image size")?;
        if n_x == 0 || n_y == 0 {
            return Err(FlimError::Configuration(format!(
                "image size must be non-zero, got {n_x} x {n_y}"
            )));
        }
        self.configured_size = (n_x, n_y);
        self.n_x = n_x;
        self.n_y = n_y;
        *self.handle.inner.grids.lock() = PixelGrids::new(n_x, n_y);
        Ok(())
    }

    /// Set bidirectional scanning. Fails while a stream is active.
    pub fn set_bidirectional(&mut self, bidirectional: bool) -> AppResult<()> {
        self.ensure_idle("change the scan direction")?;
        self.bidirectional = bidirectional;
        Ok(())
    }

    /// Frames summed into one image. Fails while a stream is active.
    pub fn set_frame_accumulation(&mut self, frames: u64) -> AppResult<()> {
        self.ensure_idle("change frame accumulation")?;
        self.frame_accumulation = frames.max(1);
        Ok(())
    }

    /// Adopt the timing of a new producer.
    pub fn set_acquisition(&mut self, acquisition: &AcquisitionParameters) -> AppResult<()> {
        self.ensure_idle("change acquisition parameters")?;
        self.using_pixel_markers = acquisition.using_pixel_markers;
        self.bidirectional |= acquisition.bidirectional;
        self.n_channels = acquisition.n_channels.max(1) as usize;
        self.micro_resolution_ps = acquisition.micro_resolution_ps;
        self.macro_resolution_ps = acquisition.macro_resolution_ps;
        Ok(())
    }

    fn ensure_idle(&self, what: &str) -> AppResult<()> {
        if self.active {
            Err(FlimError::InvalidState(format!(
                "cannot {what} while a stream is running"
            )))
        } else {
            Ok(())
        }
    }

    fn is_point(&self) -> bool {
        self.n_x == 1 && self.n_y == 1
    }

    /// Whether the current frame starts a new accumulation group.
    fn starts_group(&self) -> bool {
        self.scan.frame_index % self.frame_accumulation == 0
    }

    /// Grid coordinates of the current scan position, if it is inside the
    /// image.
    fn pixel(&self) -> Option<(usize, usize)> {
        if self.is_point() {
            return Some((0, 0));
        }
        let ScanState { x, y, .. } = self.scan;
        if !self.scan.line_active
            || x < 0
            || y < 0
            || x >= self.n_x as i64
            || y >= self.n_y as i64
        {
            return None;
        }
        // Odd lines of a bidirectional scan run backwards.
        let x = if self.bidirectional && y % 2 == 1 {
            self.n_x as i64 - 1 - x
        } else {
            x
        };
        Some((x as usize, y as usize))
    }

    fn process(&mut self, grids: &mut PixelGrids, event: TcspcEvent) {
        let Some(now) = self.clock.observe(&event) else {
            return;
        };
        match event.kind() {
            EventKind::Photon {
                channel,
                micro_time,
            } => self.photon(grids, usize::from(channel), micro_time, now),
            EventKind::Marker(marks) => {
                self.stats.markers += 1;
                self.markers(grids, marks, now);
            }
            EventKind::Unrecognized(bits) => {
                self.stats.unrecognized += 1;
                trace!(bits, "dropping unrecognized marker");
            }
            EventKind::Rollover(_) => {}
        }
    }

    fn markers(&mut self, grids: &mut PixelGrids, marks: Mark, now: u64) {
        if marks.contains(Mark::PIXEL) && self.using_pixel_markers {
            self.scan.x += 1;
            if self.starts_group() {
                if let Some((x, y)) = self.pixel() {
                    grids.clear_pixel(x, y);
                }
            }
        }

        if marks.contains(Mark::LINE_START) {
            self.scan.line_start = now;
            self.scan.line_active = true;
            self.scan.y += 1;
            self.scan.x = if self.using_pixel_markers { -1 } else { 0 };
            if !self.using_pixel_markers && !self.is_point() && self.starts_group() {
                if let Ok(y) = usize::try_from(self.scan.y) {
                    grids.clear_line(y);
                }
            }
        }

        if marks.contains(Mark::LINE_END) {
            if self.scan.line_active {
                let duration = now.saturating_sub(self.scan.line_start);
                self.scan.frame_duration += duration;
                if !self.scan.reference_taken && duration > 0 {
                    self.scan.line_duration = Some(duration as f64);
                    self.scan.reference_taken = true;
                }
            }
            self.scan.line_active = false;
        }

        if marks.contains(Mark::FRAME) {
            self.close_frame(grids, now);
        }
    }

    fn photon(&mut self, grids: &mut PixelGrids, channel: usize, micro_time: u16, now: u64) {
        self.stats.photons += 1;
        if channel >= self.n_channels {
            self.stats.bad_channel += 1;
            return;
        }

        if !self.using_pixel_markers && self.n_x > 1 {
            self.scan.x = match (self.scan.line_active, self.scan.line_duration) {
                (true, Some(line)) => {
                    let elapsed = now.saturating_sub(self.scan.line_start) as f64;
                    (elapsed * self.n_x as f64 / line).floor() as i64
                }
                _ => -1,
            };
        }

        let Some((x, y)) = self.pixel() else {
            self.stats.outside_image += 1;
            return;
        };

        grids.add_photon(x, y, micro_time, self.micro_resolution_ps);
        let bin = self.layout.bin(micro_time);
        self.decay.add(channel, bin);
        if let Some(hist) = self.pixel_histogram.as_mut() {
            hist.add(x, y, bin);
        }
        let time_ps =
            now as f64 * self.macro_resolution_ps + f64::from(micro_time) * self.micro_resolution_ps;
        self.rates.photon(channel, time_ps);
        self.stats.placed += 1;
    }

    fn close_frame(&mut self, grids: &mut PixelGrids, now: u64) {
        let fa = self.frame_accumulation;
        if self.scan.frame_index % fa == fa - 1 {
            if let Some(hist) = self.pixel_histogram.as_mut() {
                let snapshot = hist.take_snapshot();
                let mut queue = self.handle.inner.pixel_histograms.lock();
                while queue.len() >= self.max_queued_histograms {
                    queue.pop_front();
                    self.stats.dropped_histograms += 1;
                }
                queue.push_back(snapshot);
            }
        }

        if !self.using_pixel_markers && self.scan.frame_index > 0 {
            let measured = self.scan.y + 1;
            if let Ok(lines) = usize::try_from(measured) {
                if lines > 0 && (lines != self.n_x || lines != self.n_y) {
                    self.resize(grids, lines, lines);
                }
            }
        }

        let ticks = if self.scan.frame_duration > 0 {
            self.scan.frame_duration
        } else {
            self.scan
                .last_frame_at
                .map_or(0, |last| now.saturating_sub(last))
        };
        let duration_s = ticks as f64 * self.macro_resolution_ps * 1e-12;
        let (count_rates, peak_rates) = self.rates.close_frame(duration_s);
        *self.handle.inner.rates.lock() = RateSnapshot {
            count_rates,
            peak_rates,
            max_pixel_count: grids.max_intensity(),
        };

        self.scan.frame_index += 1;
        self.handle
            .inner
            .frame_index
            .store(self.scan.frame_index, Ordering::Relaxed);
        self.scan.x = -1;
        self.scan.y = -1;
        self.scan.line_active = false;
        self.scan.frame_duration = 0;
        self.scan.reference_taken = false;
        self.scan.last_frame_at = Some(now);
        self.stats.frames += 1;
        trace!(frame = self.scan.frame_index, "frame closed");
    }

    /// Replace the grids with new ones of the given size.
    fn resize(&mut self, grids: &mut PixelGrids, n_x: usize, n_y: usize) {
        info!(
            from_x = self.n_x,
            from_y = self.n_y,
            n_x,
            n_y,
            "resizing image to measured line count"
        );
        self.n_x = n_x;
        self.n_y = n_y;
        *grids = PixelGrids::new(n_x, n_y);
        if self.pixel_histogram.is_some() {
            self.pixel_histogram = Some(PixelHistogram::new(n_x, n_y, self.layout.n_bins()));
        }
        self.stats.resizes += 1;
    }

    fn publish_decay(&mut self) {
        let mut published = self.handle.inner.decay.lock();
        self.decay.publish_into(&mut published);
        self.next_refresh = Instant::now() + self.refresh_interval;
    }
}

impl EventConsumer for ImageReconstructor {
    fn event_stream_about_to_start(&mut self) {
        let (n_x, n_y) = self.configured_size;
        self.n_x = n_x;
        self.n_y = n_y;
        self.clock.reset();
        self.scan = ScanState::default();
        self.decay = DecayAccumulator::new(self.n_channels, self.layout.n_bins());
        self.pixel_histogram = self
            .histogramming
            .then(|| PixelHistogram::new(n_x, n_y, self.layout.n_bins()));
        self.rates = RateTracker::new(self.n_channels);
        self.stats = ReconstructorStats::default();

        let published = &self.handle.inner;
        *published.grids.lock() = PixelGrids::new(n_x, n_y);
        *published.decay.lock() = vec![vec![0; self.layout.n_bins()]; self.n_channels];
        *published.rates.lock() = RateSnapshot::default();
        published.pixel_histograms.lock().clear();
        published.frame_index.store(0, Ordering::Relaxed);

        self.next_refresh = Instant::now() + self.refresh_interval;
        self.active = true;
        debug!(
            n_x,
            n_y,
            channels = self.n_channels,
            pixel_markers = self.using_pixel_markers,
            bidirectional = self.bidirectional,
            "image reconstruction started"
        );
    }

    fn event_stream_finished(&mut self) {
        self.publish_decay();
        self.active = false;
        info!(
            frames = self.stats.frames,
            photons = self.stats.photons,
            placed = self.stats.placed,
            outside = self.stats.outside_image,
            bad_channel = self.stats.bad_channel,
            unrecognized = self.stats.unrecognized,
            "image reconstruction finished"
        );
    }

    fn add_event(&mut self, event: TcspcEvent) {
        self.add_events(std::slice::from_ref(&event));
    }

    fn add_events(&mut self, events: &[TcspcEvent]) {
        let published = Arc::clone(&self.handle.inner);
        let mut grids = published.grids.lock();
        for &event in events {
            self.process(&mut grids, event);
        }
        drop(grids);

        if Instant::now() >= self.next_refresh {
            self.publish_decay();
        }
    }

    fn is_processing_events(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "image"
    }
}
