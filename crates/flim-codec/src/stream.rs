//! Producer that decodes a raw vendor byte stream.

use crate::{DecodeStats, RawDecoder};
use bytes::{Buf, BytesMut};
use flim_core::{
    AcquisitionParameters, EventProducer, Fill, ProducerFault, ProducerFaultKind, TcspcEvent,
};
use std::io::{ErrorKind, Read};
use tracing::warn;

/// Default number of raw bytes pulled from the reader per poll.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Adapts any [`Read`] source of raw hardware words into an
/// [`EventProducer`].
///
/// `WouldBlock` from the reader is reported as [`Fill::NoData`]; end of
/// input as [`Fill::EndOfStream`] once every decoded event has been handed
/// out.
pub struct StreamProducer<R, D> {
    reader: R,
    decoder: D,
    raw: BytesMut,
    pending: Vec<TcspcEvent>,
    pending_pos: usize,
    chunk: usize,
    eof: bool,
}

impl<R: Read + Send, D: RawDecoder> StreamProducer<R, D> {
    /// Producer reading the default chunk size.
    pub fn new(reader: R, decoder: D) -> Self {
        Self::with_chunk(reader, decoder, DEFAULT_READ_CHUNK)
    }

    /// Producer reading `chunk` bytes at a time.
    pub fn with_chunk(reader: R, decoder: D, chunk: usize) -> Self {
        Self {
            reader,
            decoder,
            raw: BytesMut::with_capacity(chunk),
            pending: Vec::new(),
            pending_pos: 0,
            chunk: chunk.max(16),
            eof: false,
        }
    }

    /// Decoder counters.
    pub fn decode_stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    /// The wrapped decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn read_more(&mut self) -> Result<bool, ProducerFault> {
        let start = self.raw.len();
        self.raw.resize(start + self.chunk, 0);
        let result = loop {
            match self.reader.read(&mut self.raw[start..]) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match result {
            Ok(0) => {
                self.raw.truncate(start);
                self.eof = true;
                Ok(true)
            }
            Ok(n) => {
                self.raw.truncate(start + n);
                let consumed = self.decoder.decode(&self.raw, &mut self.pending)?;
                self.raw.advance(consumed);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.raw.truncate(start);
                Ok(false)
            }
            Err(e) => {
                self.raw.truncate(start);
                Err(ProducerFault::new(
                    self.decoder.name(),
                    ProducerFaultKind::Io,
                    e.to_string(),
                ))
            }
        }
    }
}

impl<R: Read + Send, D: RawDecoder> EventProducer for StreamProducer<R, D> {
    fn fill_buffer(
        &mut self,
        buffer: &mut [TcspcEvent],
        _fill_factor_hint: f64,
    ) -> Result<Fill, ProducerFault> {
        loop {
            let available = self.pending.len() - self.pending_pos;
            if available > 0 {
                let n = available.min(buffer.len());
                buffer[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                if self.pending_pos == self.pending.len() {
                    self.pending.clear();
                    self.pending_pos = 0;
                }
                return Ok(Fill::Events(n));
            }

            if self.eof {
                if !self.raw.is_empty() {
                    warn!(
                        bytes = self.raw.len(),
                        decoder = self.decoder.name(),
                        "discarding partial record at end of stream"
                    );
                    self.raw.clear();
                }
                return Ok(Fill::EndOfStream);
            }

            if !self.read_more()? {
                return Ok(Fill::NoData);
            }
        }
    }

    fn acquisition(&self) -> AcquisitionParameters {
        self.decoder.acquisition()
    }

    fn name(&self) -> &str {
        self.decoder.name()
    }
}
