//! Source side of the event pipeline.

use crate::acquisition::AcquisitionParameters;
use crate::error::ProducerFault;
use crate::event::TcspcEvent;

/// Outcome of one [`EventProducer::fill_buffer`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// `n` events were written to the front of the buffer.
    Events(usize),
    /// Nothing available this poll.
    NoData,
    /// The source is exhausted (end of a replayed file).
    EndOfStream,
}

/// Hardware reader or replay source driven by the processor's reader thread.
pub trait EventProducer: Send {
    /// Write canonical events into `buffer`.
    ///
    /// `fill_factor_hint` is the fraction of the processor's ring currently
    /// waiting to be processed, in `0.0..=1.0`. Producers that batch reads may
    /// use it to decide how long to poll.
    ///
    /// A returned fault is fatal for the stream.
    fn fill_buffer(
        &mut self,
        buffer: &mut [TcspcEvent],
        fill_factor_hint: f64,
    ) -> Result<Fill, ProducerFault>;

    /// Timing description of the stream.
    fn acquisition(&self) -> AcquisitionParameters;

    /// Name used in log output.
    fn name(&self) -> &str {
        "producer"
    }
}

/// Producer that plays back a fixed list of events in batches.
///
/// Used by tests and benchmarks in place of hardware.
#[derive(Debug, Clone)]
pub struct VecProducer {
    events: Vec<TcspcEvent>,
    position: usize,
    batch: usize,
    params: AcquisitionParameters,
}

impl VecProducer {
    /// Emit `events` at most `batch` at a time, then report end of stream.
    pub fn new(events: Vec<TcspcEvent>, batch: usize, params: AcquisitionParameters) -> Self {
        Self {
            events,
            position: 0,
            batch: batch.max(1),
            params,
        }
    }

    /// Events not yet emitted.
    pub fn remaining(&self) -> usize {
        self.events.len() - self.position
    }
}

impl EventProducer for VecProducer {
    fn fill_buffer(
        &mut self,
        buffer: &mut [TcspcEvent],
        _fill_factor_hint: f64,
    ) -> Result<Fill, ProducerFault> {
        if self.position >= self.events.len() {
            return Ok(Fill::EndOfStream);
        }
        let n = self.remaining().min(self.batch).min(buffer.len());
        buffer[..n].copy_from_slice(&self.events[self.position..self.position + n]);
        self.position += n;
        Ok(Fill::Events(n))
    }

    fn acquisition(&self) -> AcquisitionParameters {
        self.params.clone()
    }

    fn name(&self) -> &str {
        "vec"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_producer_batches() {
        let events: Vec<_> = (0..5).map(|i| TcspcEvent::photon(0, i, i)).collect();
        let mut producer = VecProducer::new(events.clone(), 2, AcquisitionParameters::default());
        let mut buf = [TcspcEvent::default(); 8];

        assert_eq!(producer.fill_buffer(&mut buf, 0.0), Ok(Fill::Events(2)));
        assert_eq!(&buf[..2], &events[..2]);
        assert_eq!(producer.fill_buffer(&mut buf, 0.0), Ok(Fill::Events(2)));
        assert_eq!(producer.fill_buffer(&mut buf, 0.0), Ok(Fill::Events(1)));
        assert_eq!(buf[0], events[4]);
        assert_eq!(producer.fill_buffer(&mut buf, 0.0), Ok(Fill::EndOfStream));
    }
}
