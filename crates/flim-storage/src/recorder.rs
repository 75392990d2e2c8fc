//! Event stream recorder.
//!
//! [`StreamRecorder`] is an [`EventConsumer`] that writes every event it sees
//! into a container file while recording is armed. Recording can be armed
//! before the stream starts (the header is written at stream start) or while
//! it is running (the header is written immediately).
//!
//! When segmenting by image, each `next_image_started` closes the current
//! file and opens `<stem>_NNN.<ext>` for the next image.
//!
//! I/O failures disarm the recorder and are kept as its last error. They
//! never propagate into the processor.

use crate::compression::{
    Compression, FrameTotals, Lz4FrameWriter, ThreadedLz4Writer, DEFAULT_WRITER_SLOTS,
};
use crate::error::RecordingError;
use crate::format::{names, FileHeader, Tag, TagValue};
use chrono::Local;
use flim_core::event::put_events;
use flim_core::{AcquisitionParameters, EventConsumer, TcspcEvent};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Recorder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Payload compression.
    pub compression: Compression,
    /// Compress on a dedicated writer thread.
    pub threaded: bool,
    /// Frames buffered for the writer thread.
    pub writer_slots: usize,
    /// Write one file per image.
    pub segment_by_image: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            threaded: false,
            writer_slots: DEFAULT_WRITER_SLOTS,
            segment_by_image: false,
        }
    }
}

/// What a finished recording produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Files written, in order.
    pub files: Vec<PathBuf>,
    /// Events recorded.
    pub events: u64,
    /// Total size of the files.
    pub bytes_on_disk: u64,
    /// Compressed frames lost because the writer thread fell behind.
    pub dropped_frames: u64,
}

/// `base` with `_NNN` inserted before the extension.
pub fn segment_path(base: &Path, index: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{index:03}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{index:03}"),
    };
    base.with_file_name(name)
}

enum Payload {
    Raw(BufWriter<File>),
    Lz4(Lz4FrameWriter<BufWriter<File>>),
    Threaded(ThreadedLz4Writer),
}

impl Payload {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Payload::Raw(w) => w.write_all(bytes),
            Payload::Lz4(w) => w.write_all(bytes),
            Payload::Threaded(w) => {
                w.write_bytes(bytes);
                Ok(())
            }
        }
    }

    /// Flush and close. Returns frames dropped by a writer thread.
    fn finish(self) -> io::Result<u64> {
        match self {
            Payload::Raw(mut w) => {
                w.flush()?;
                w.get_ref().sync_all()?;
                Ok(0)
            }
            Payload::Lz4(w) => {
                let (inner, totals) = w.finish()?;
                log_totals(&totals);
                inner.get_ref().sync_all()?;
                Ok(0)
            }
            Payload::Threaded(w) => {
                let dropped = w.dropped_frames();
                let totals = w.finish()?;
                log_totals(&totals);
                Ok(dropped)
            }
        }
    }
}

fn log_totals(totals: &FrameTotals) {
    debug!(
        frames = totals.frames,
        bytes_in = totals.bytes_in,
        bytes_out = totals.bytes_out,
        ratio = totals.ratio(),
        "compressed payload closed"
    );
}

struct OpenFile {
    path: PathBuf,
    payload: Payload,
}

/// Consumer that records the event stream to disk.
pub struct StreamRecorder {
    config: RecorderConfig,
    acquisition: AcquisitionParameters,
    metadata: Vec<Tag>,
    armed: Option<PathBuf>,
    running: bool,
    current: Option<OpenFile>,
    image_index: u32,
    scratch: Vec<u8>,
    summary: RecordingSummary,
    last_error: Option<RecordingError>,
}

impl std::fmt::Debug for StreamRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecorder")
            .field("config", &self.config)
            .field("armed", &self.armed)
            .field("image_index", &self.image_index)
            .finish_non_exhaustive()
    }
}

impl StreamRecorder {
    /// Disarmed recorder for `acquisition`.
    pub fn new(acquisition: AcquisitionParameters, config: RecorderConfig) -> Self {
        Self {
            config,
            acquisition,
            metadata: Vec::new(),
            armed: None,
            running: false,
            current: None,
            image_index: 0,
            scratch: Vec::new(),
            summary: RecordingSummary::default(),
            last_error: None,
        }
    }

    /// Timing description written into subsequent headers.
    pub fn set_acquisition(&mut self, acquisition: AcquisitionParameters) {
        self.acquisition = acquisition;
    }

    /// Extra tag written into subsequent headers.
    pub fn add_metadata(&mut self, name: impl Into<String>, value: TagValue) {
        let name = name.into();
        self.metadata.retain(|t| t.name != name);
        self.metadata.push(Tag { name, value });
    }

    /// Settings in use.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Armed or writing.
    pub fn is_recording(&self) -> bool {
        self.armed.is_some()
    }

    /// Most recent failure, if recording was disarmed by one.
    pub fn last_error(&self) -> Option<&RecordingError> {
        self.last_error.as_ref()
    }

    /// Arm recording to `path`. Opens the file now if a stream is running.
    ///
    /// Does nothing if already recording.
    pub fn start_recording(&mut self, path: impl AsRef<Path>) -> Result<(), RecordingError> {
        if self.armed.is_some() {
            warn!("start_recording ignored, already recording");
            return Ok(());
        }
        self.armed = Some(path.as_ref().to_path_buf());
        self.image_index = 0;
        self.summary = RecordingSummary::default();
        self.last_error = None;
        info!(path = %path.as_ref().display(), "recording armed");

        if self.running {
            if let Err(e) = self.open_segment() {
                self.armed = None;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close any open file and disarm.
    ///
    /// Returns the first error that disarmed the recording, or the summary
    /// of every file written since it was armed.
    pub fn stop_recording(&mut self) -> Result<RecordingSummary, RecordingError> {
        let closed = self.close_current();
        self.armed = None;
        if let Some(err) = self.last_error.take() {
            return Err(err);
        }
        closed?;
        info!(
            files = self.summary.files.len(),
            events = self.summary.events,
            bytes = self.summary.bytes_on_disk,
            "recording stopped"
        );
        Ok(std::mem::take(&mut self.summary))
    }

    fn target_path(&self, base: &Path) -> PathBuf {
        if self.config.segment_by_image {
            segment_path(base, self.image_index)
        } else {
            base.to_path_buf()
        }
    }

    fn open_segment(&mut self) -> Result<(), RecordingError> {
        let Some(base) = self.armed.clone() else {
            return Ok(());
        };
        let path = self.target_path(&base);

        let file = File::create(&path).map_err(|source| RecordingError::Open {
            path: path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let mut header = FileHeader::for_acquisition(
            &self.acquisition,
            self.config.compression,
            Local::now().naive_local(),
        );
        if self.config.segment_by_image {
            header.push(
                names::IMAGE_INDEX,
                TagValue::Int64(i64::from(self.image_index)),
            );
        }
        for tag in &self.metadata {
            header.push(tag.name.clone(), tag.value.clone());
        }
        let write_err = |source| RecordingError::Write {
            path: path.clone(),
            source,
        };
        writer.write_all(&header.encode()).map_err(write_err)?;

        let payload = match (self.config.compression, self.config.threaded) {
            (Compression::None, _) => Payload::Raw(writer),
            (Compression::Lz4, false) => Payload::Lz4(Lz4FrameWriter::new(writer)),
            (Compression::Lz4, true) => Payload::Threaded(
                ThreadedLz4Writer::spawn(writer, self.config.writer_slots)
                    .map_err(|e| RecordingError::Writer(e.to_string()))?,
            ),
        };

        info!(path = %path.display(), image = self.image_index, "recording file opened");
        self.current = Some(OpenFile { path, payload });
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), RecordingError> {
        let Some(file) = self.current.take() else {
            return Ok(());
        };
        let path = file.path;
        let dropped = file.payload.finish().map_err(|source| RecordingError::Write {
            path: path.clone(),
            source,
        })?;
        self.summary.dropped_frames += dropped;

        let len = fs::metadata(&path)
            .map_err(|source| RecordingError::Write {
                path: path.clone(),
                source,
            })?
            .len();
        if len == 0 {
            return Err(RecordingError::EmptyFile(path));
        }
        debug!(path = %path.display(), bytes = len, "recording file closed");
        self.summary.bytes_on_disk += len;
        self.summary.files.push(path);
        Ok(())
    }

    fn fail(&mut self, err: RecordingError) {
        error!(error = %err, "recording failed, disarming");
        if let Some(file) = self.current.take() {
            if let Err(e) = file.payload.finish() {
                warn!(path = %file.path.display(), error = %e, "closing failed recording also failed");
            }
        }
        self.armed = None;
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
    }

    fn close_and_disarm(&mut self) {
        if let Err(e) = self.close_current() {
            self.fail(e);
        }
        self.armed = None;
    }
}

impl EventConsumer for StreamRecorder {
    fn event_stream_about_to_start(&mut self) {
        self.running = true;
        if self.armed.is_some() && self.current.is_none() {
            if let Err(e) = self.open_segment() {
                self.fail(e);
            }
        }
    }

    fn event_stream_finished(&mut self) {
        self.running = false;
        self.close_and_disarm();
    }

    fn add_event(&mut self, event: TcspcEvent) {
        self.add_events(&[event]);
    }

    fn add_events(&mut self, events: &[TcspcEvent]) {
        let Some(file) = self.current.as_mut() else {
            return;
        };
        self.scratch.clear();
        put_events(&mut self.scratch, events);
        match file.payload.write(&self.scratch) {
            Ok(()) => self.summary.events += events.len() as u64,
            Err(source) => {
                let path = file.path.clone();
                self.fail(RecordingError::Write { path, source });
            }
        }
    }

    fn next_image_started(&mut self) {
        if !self.config.segment_by_image || self.current.is_none() {
            return;
        }
        if let Err(e) = self.close_current() {
            self.fail(e);
            return;
        }
        self.image_index += 1;
        if let Err(e) = self.open_segment() {
            self.fail(e);
        }
    }

    fn image_sequence_finished(&mut self) {
        self.close_and_disarm();
    }

    fn is_processing_events(&self) -> bool {
        self.armed.is_some()
    }

    fn name(&self) -> &str {
        "recorder"
    }
}
