//! Image reconstruction from canonical event streams.
//!
//! [`ImageReconstructor`] is an [`EventConsumer`](flim_core::EventConsumer)
//! that runs on the processor thread. Readers use the [`ImageHandle`] it
//! hands out; the grids behind it are swapped under a mutex whenever the
//! geometry changes.

mod grids;
mod handle;
pub mod histogram;
pub mod rates;
mod reconstructor;

pub use grids::PixelGrids;
pub use handle::{ImageHandle, ImageSnapshot};
pub use histogram::HistogramLayout;
pub use rates::{RateSnapshot, RATE_WINDOW};
pub use reconstructor::{ImageReconstructor, ReconstructorStats};
