//! Decoding of raw TCSPC hardware streams into canonical events.
//!
//! Vendor words carry their own macro-time width and overflow scheme. Each
//! decoder tracks absolute macro time internally and re-emits it through a
//! [`CanonicalEncoder`], which inserts the 16-bit rollover sentinels the rest
//! of the pipeline expects. Downstream code undoes this with a [`MacroClock`].
//!
//! # Decoders
//!
//! - [`spc::SpcDecoder`]: 32-bit FIFO words from Becker & Hickl SPC cards
//! - [`timetagger::TimeTaggerDecoder`]: packetised hits with rising/falling
//!   marker edges and sync-divider correction
//!
//! Records a decoder cannot interpret are dropped and counted in
//! [`DecodeStats`]. Only conditions that mean data was lost inside the
//! device are reported as a [`ProducerFault`].

pub mod clock;
pub mod marker;
pub mod spc;
pub mod stream;
pub mod sync;
pub mod timetagger;

pub use clock::{CanonicalEncoder, MacroClock};
pub use marker::{
    EdgeClassifier, EdgeOutcome, MarkerCalibration, MarkerKind, MarkerMap, MARKER_INPUTS,
};
pub use stream::StreamProducer;
pub use sync::{SyncCorrection, SyncEstimate, SyncRateEstimator};

use flim_core::{AcquisitionParameters, ProducerFault, TcspcEvent};

/// Counters kept by every decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Photon records emitted.
    pub photons: u64,
    /// Marker records emitted.
    pub markers: u64,
    /// Rollover sentinels emitted.
    pub rollovers: u64,
    /// Records that could not be interpreted.
    pub dropped: u64,
    /// Marker edges consumed without producing a record (rising edges).
    pub ignored_edges: u64,
    /// Device gap flags seen.
    pub gaps: u64,
}

/// A decoder from a raw vendor byte stream to canonical events.
pub trait RawDecoder: Send {
    /// Decode as many whole records from `raw` as possible, appending to
    /// `out`. Returns the number of bytes consumed; a trailing partial
    /// record is left for the next call.
    fn decode(&mut self, raw: &[u8], out: &mut Vec<TcspcEvent>) -> Result<usize, ProducerFault>;

    /// Counters since construction or the last reset.
    fn stats(&self) -> DecodeStats;

    /// Timing description of the decoded stream.
    fn acquisition(&self) -> AcquisitionParameters;

    /// Forget rollover and edge state before a new stream.
    fn reset(&mut self);

    /// Name used in log output and fault messages.
    fn name(&self) -> &str;
}
