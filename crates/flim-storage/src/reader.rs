//! Container reader and replay producer.

use crate::compression::{Compression, Lz4FrameReader};
use crate::error::FormatError;
use crate::format::FileHeader;
use bytes::{Buf, BytesMut};
use flim_core::event::get_events;
use flim_core::{
    AcquisitionParameters, EventProducer, Fill, ProducerFault, ProducerFaultKind, TcspcEvent,
    EVENT_BYTES,
};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Parsed container positioned at the start of its event payload.
///
/// Implements [`EventProducer`] so a recording can be replayed through the
/// same processor used for live hardware.
pub struct FlimFileReader {
    path: PathBuf,
    header: FileHeader,
    acquisition: AcquisitionParameters,
    payload: Box<dyn Read + Send>,
    pending: BytesMut,
    events_read: u64,
    finished: bool,
}

impl std::fmt::Debug for FlimFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlimFileReader")
            .field("path", &self.path)
            .field("events_read", &self.events_read)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl FlimFileReader {
    /// Open `path` and parse its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);
        let header = FileHeader::read_from(&mut file)?;
        let acquisition = header.acquisition()?;

        let payload: Box<dyn Read + Send> = match header.compression()? {
            Compression::None => Box::new(file),
            Compression::Lz4 => Box::new(Lz4FrameReader::new(file)),
        };

        info!(
            path = %path.display(),
            tags = header.tags.len(),
            system = %acquisition.tcspc_system,
            "opened recording"
        );

        Ok(Self {
            path,
            header,
            acquisition,
            payload,
            pending: BytesMut::new(),
            events_read: 0,
            finished: false,
        })
    }

    /// Path of the open file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Events returned so far.
    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Fill `out` with the next events. Returns 0 at end of payload.
    pub fn read_events(&mut self, out: &mut [TcspcEvent]) -> Result<usize, FormatError> {
        if out.is_empty() {
            return Ok(0);
        }
        let want = out.len() * EVENT_BYTES;
        while self.pending.len() < want && !self.finished {
            let start = self.pending.len();
            self.pending.resize(want, 0);
            let result = self.payload.read(&mut self.pending[start..]);
            match result {
                Ok(0) => {
                    self.pending.truncate(start);
                    self.finished = true;
                }
                Ok(n) => self.pending.truncate(start + n),
                Err(e) if e.kind() == ErrorKind::Interrupted => self.pending.truncate(start),
                Err(e) => {
                    self.pending.truncate(start);
                    return Err(match e.kind() {
                        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                            FormatError::CorruptFrame(e.to_string())
                        }
                        _ => FormatError::Io(e),
                    });
                }
            }
        }

        let n = get_events(&mut self.pending, out);
        self.events_read += n as u64;
        if n == 0 && self.finished && self.pending.has_remaining() {
            warn!(
                path = %self.path.display(),
                bytes = self.pending.remaining(),
                "ignoring partial event at end of payload"
            );
            self.pending.clear();
        }
        Ok(n)
    }

    /// Read every remaining event.
    pub fn read_all(&mut self) -> Result<Vec<TcspcEvent>, FormatError> {
        let mut all = Vec::new();
        let mut buf = vec![TcspcEvent::default(); 4096];
        loop {
            let n = self.read_events(&mut buf)?;
            if n == 0 {
                return Ok(all);
            }
            all.extend_from_slice(&buf[..n]);
        }
    }
}

impl EventProducer for FlimFileReader {
    fn fill_buffer(
        &mut self,
        buffer: &mut [TcspcEvent],
        _fill_factor_hint: f64,
    ) -> Result<Fill, ProducerFault> {
        match self.read_events(buffer) {
            Ok(0) => Ok(Fill::EndOfStream),
            Ok(n) => Ok(Fill::Events(n)),
            Err(e) => {
                let kind = match e {
                    FormatError::Io(_) => ProducerFaultKind::Io,
                    _ => ProducerFaultKind::Format,
                };
                Err(ProducerFault::new(
                    self.path.display().to_string(),
                    kind,
                    e.to_string(),
                ))
            }
        }
    }

    fn acquisition(&self) -> AcquisitionParameters {
        self.acquisition.clone()
    }

    fn name(&self) -> &str {
        "file"
    }
}
