//! Core types shared by every stage of the flim-stream pipeline.
//!
//! - [`event`]: the 4-byte canonical TCSPC record and its marker bits
//! - [`consumer`] / [`producer`]: the seams between hardware, processor and sinks
//! - [`acquisition`]: timing description carried from producer to recorder
//! - [`error`]: error types for the pipeline and its producers

pub mod acquisition;
pub mod consumer;
pub mod error;
pub mod event;
pub mod producer;

pub use acquisition::AcquisitionParameters;
pub use consumer::{shared, EventConsumer, SharedConsumer};
pub use error::{AppResult, FlimError, ProducerFault, ProducerFaultKind};
pub use event::{EventKind, Mark, TcspcEvent, EVENT_BYTES, MARKER_CHANNEL, ROLLOVER_PERIOD};
pub use producer::{EventProducer, Fill, VecProducer};
