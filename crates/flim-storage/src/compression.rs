//! LZ4 framing for event payloads.
//!
//! The payload is cut into messages of at most [`FRAME_INPUT_BYTES`] and
//! each message is stored as
//!
//! ```text
//! u32 compressed_len | lz4 block (u32 uncompressed size + compressed bytes)
//! ```
//!
//! The block itself is produced by [`lz4_flex::compress_prepend_size`], so
//! every frame can be decoded on its own.
//!
//! [`ThreadedLz4Writer`] moves compression off the processor thread. Input
//! messages are handed to a writer thread through a [`SlotRing`]; if the
//! writer falls a full ring behind, messages are dropped and counted rather
//! than blocking the caller.

use flim_pool::SlotRing;
use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind, Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Uncompressed bytes per frame. A multiple of the event size.
pub const FRAME_INPUT_BYTES: usize = 16 * 1024;

/// Default number of frames buffered between caller and writer thread.
pub const DEFAULT_WRITER_SLOTS: usize = 1000;

/// Payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

impl Compression {
    /// Name used in headers and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            other => Err(format!("unknown compression '{other}'")),
        }
    }
}

/// Byte counts for a finished compressed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTotals {
    /// Frames written.
    pub frames: u64,
    /// Uncompressed bytes.
    pub bytes_in: u64,
    /// Compressed bytes, length prefixes included.
    pub bytes_out: u64,
}

impl FrameTotals {
    /// Ratio of input to output size; 1.0 when nothing was written.
    pub fn ratio(&self) -> f64 {
        if self.bytes_out == 0 {
            return 1.0;
        }
        self.bytes_in as f64 / self.bytes_out as f64
    }
}

fn write_frame<W: Write>(inner: &mut W, data: &[u8], totals: &mut FrameTotals) -> io::Result<()> {
    let block = lz4_flex::compress_prepend_size(data);
    inner.write_all(&(block.len() as u32).to_le_bytes())?;
    inner.write_all(&block)?;
    totals.frames += 1;
    totals.bytes_in += data.len() as u64;
    totals.bytes_out += 4 + block.len() as u64;
    Ok(())
}

/// Inline LZ4 frame encoder.
///
/// Bytes are staged until a full frame is available. [`Write::flush`] and
/// [`finish`](Self::finish) emit whatever is staged as a short frame.
pub struct Lz4FrameWriter<W: Write> {
    inner: W,
    staging: Vec<u8>,
    totals: FrameTotals,
}

impl<W: Write> Lz4FrameWriter<W> {
    /// Writer over `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            staging: Vec::with_capacity(FRAME_INPUT_BYTES),
            totals: FrameTotals::default(),
        }
    }

    /// Counts so far.
    pub fn totals(&self) -> FrameTotals {
        self.totals
    }

    /// Emit the staged tail, flush, and return the inner writer.
    pub fn finish(mut self) -> io::Result<(W, FrameTotals)> {
        self.flush()?;
        Ok((self.inner, self.totals))
    }

    fn emit_staged(&mut self) -> io::Result<()> {
        if !self.staging.is_empty() {
            write_frame(&mut self.inner, &self.staging, &mut self.totals)?;
            self.staging.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for Lz4FrameWriter<W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let written = buf.len();
        while !buf.is_empty() {
            let take = (FRAME_INPUT_BYTES - self.staging.len()).min(buf.len());
            self.staging.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.staging.len() == FRAME_INPUT_BYTES {
                self.emit_staged()?;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_staged()?;
        self.inner.flush()
    }
}

/// Decoder for a stream of LZ4 frames.
pub struct Lz4FrameReader<R: Read> {
    inner: R,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: Read> Lz4FrameReader<R> {
    /// Reader over `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoded: Vec::new(),
            pos: 0,
        }
    }

    /// Load the next frame. Returns `false` at a clean end of stream.
    fn next_frame(&mut self) -> io::Result<bool> {
        let mut len = [0u8; 4];
        let mut filled = 0;
        while filled < len.len() {
            match self.inner.read(&mut len[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "end of file inside frame length",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        let block_len = u32::from_le_bytes(len);
        let mut block = Vec::new();
        self.inner
            .by_ref()
            .take(u64::from(block_len))
            .read_to_end(&mut block)?;
        if block.len() < block_len as usize {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "end of file inside frame",
            ));
        }
        self.decoded = lz4_flex::decompress_size_prepended(&block)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("LZ4 frame: {e}")))?;
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for Lz4FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.decoded.len() {
            if !self.next_frame()? {
                return Ok(0);
            }
        }
        let n = (self.decoded.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// LZ4 frame encoder running on its own thread.
pub struct ThreadedLz4Writer {
    ring: Arc<SlotRing<u8>>,
    staging: Vec<u8>,
    handle: Option<JoinHandle<io::Result<FrameTotals>>>,
    dropped_frames: u64,
}

impl ThreadedLz4Writer {
    /// Start a writer thread owning `inner`, buffering up to `slots` frames.
    pub fn spawn<W: Write + Send + 'static>(inner: W, slots: usize) -> io::Result<Self> {
        let ring = SlotRing::<u8>::new(slots.max(1), FRAME_INPUT_BYTES);
        let worker_ring = Arc::clone(&ring);
        let handle = thread::Builder::new()
            .name("flim-lz4-writer".into())
            .spawn(move || Self::run(worker_ring, inner))?;

        Ok(Self {
            ring,
            staging: Vec::with_capacity(FRAME_INPUT_BYTES),
            handle: Some(handle),
            dropped_frames: 0,
        })
    }

    fn run<W: Write>(ring: Arc<SlotRing<u8>>, mut inner: W) -> io::Result<FrameTotals> {
        let mut totals = FrameTotals::default();
        while let Some(slot) = ring.acquire_for_process() {
            let result = write_frame(&mut inner, &slot, &mut totals);
            slot.commit();
            result?;
        }
        inner.flush()?;
        debug!(frames = totals.frames, ratio = totals.ratio(), "LZ4 writer drained");
        Ok(totals)
    }

    /// Frames discarded because the writer thread was a full ring behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Queue bytes for compression. Never blocks.
    pub fn write_bytes(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (FRAME_INPUT_BYTES - self.staging.len()).min(data.len());
            self.staging.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.staging.len() == FRAME_INPUT_BYTES {
                self.push_frame();
            }
        }
    }

    fn push_frame(&mut self) {
        if self.staging.is_empty() {
            return;
        }
        match self.ring.try_acquire_fill() {
            Ok(mut slot) => {
                let n = self.staging.len();
                slot[..n].copy_from_slice(&self.staging);
                slot.commit(n);
            }
            Err(_) => {
                self.dropped_frames += 1;
                warn!(
                    dropped_frames = self.dropped_frames,
                    "LZ4 writer behind, frame dropped"
                );
            }
        }
        self.staging.clear();
    }

    /// Queue the staged tail, stop the thread and wait for it to drain.
    pub fn finish(mut self) -> io::Result<FrameTotals> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> io::Result<FrameTotals> {
        self.push_frame();
        self.ring.mark_stream_finished();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::other("LZ4 writer thread panicked"))?,
            None => Ok(FrameTotals::default()),
        }
    }
}

impl Drop for ThreadedLz4Writer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "LZ4 writer failed during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_inline_frames() {
        let data = pattern(FRAME_INPUT_BYTES * 2 + 100);
        let mut writer = Lz4FrameWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        let (bytes, totals) = writer.finish().unwrap();
        assert_eq!(totals.frames, 3);
        assert_eq!(totals.bytes_in, data.len() as u64);
        assert_eq!(totals.bytes_out, bytes.len() as u64);

        let mut decoded = Vec::new();
        Lz4FrameReader::new(&bytes[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let mut writer = Lz4FrameWriter::new(Vec::new());
        writer.write_all(&pattern(1000)).unwrap();
        let (bytes, _) = writer.finish().unwrap();

        let mut out = Vec::new();
        let err = Lz4FrameReader::new(&bytes[..bytes.len() - 3])
            .read_to_end(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_threaded_matches_inline() {
        let data = pattern(FRAME_INPUT_BYTES * 3 + 17);
        let sink = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct Shared(Arc<parking_lot::Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut writer = ThreadedLz4Writer::spawn(Shared(Arc::clone(&sink)), 16).unwrap();
        for chunk in data.chunks(1000) {
            writer.write_bytes(chunk);
        }
        assert_eq!(writer.dropped_frames(), 0);
        let totals = writer.finish().unwrap();
        assert_eq!(totals.frames, 4);

        let bytes = sink.lock().clone();
        let mut decoded = Vec::new();
        Lz4FrameReader::new(&bytes[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_compression_names() {
        assert_eq!("LZ4".parse::<Compression>(), Ok(Compression::Lz4));
        assert_eq!(Compression::None.as_str(), "none");
        assert!("zstd".parse::<Compression>().is_err());
    }
}
