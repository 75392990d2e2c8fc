//! Recording and replay of canonical event streams.
//!
//! # Container layout
//!
//! ```text
//! u32 magic (0xF1F0) | u32 version | u32 header_len | tags... | end tag | payload
//! ```
//!
//! Each tag is `u32 name_len | name bytes + NUL | u16 type | u32 len | len bytes`.
//! `header_len` covers the tag list including the end tag. The payload is a
//! flat run of 4-byte events, or LZ4 frames of them when the
//! `EventCompression` tag says so.
//!
//! # Components
//!
//! - [`format`]: tag encoding and header parsing
//! - [`compression`]: LZ4 framing, inline or on a writer thread
//! - [`recorder::StreamRecorder`]: consumer that writes containers, one per
//!   image when segmenting
//! - [`reader::FlimFileReader`]: parser and replay producer

pub mod compression;
pub mod error;
pub mod format;
pub mod reader;
pub mod recorder;

pub use compression::{Compression, Lz4FrameReader, Lz4FrameWriter, ThreadedLz4Writer};
pub use error::{FormatError, RecordingError};
pub use format::{FileHeader, Tag, TagValue, FORMAT_VERSION, MAGIC};
pub use reader::FlimFileReader;
pub use recorder::{segment_path, RecorderConfig, RecordingSummary, StreamRecorder};
