//! Error types for the event pipeline.
//!
//! [`FlimError`] is the single error type returned across crate boundaries.
//! It covers three groups of failures:
//!
//! - **Configuration**: invalid parameters rejected before a stream starts.
//!   Fix the configuration and retry.
//! - **Producer faults**: the hardware (or a file being replayed) reported a
//!   condition the stream cannot continue past. The reader thread stops, the
//!   processor drains what was already buffered, and the fault is kept for
//!   the orchestrating code to read. See [`ProducerFault`].
//! - **I/O and format**: file access and container parsing. These stay on the
//!   recording/replay path and never stop a live reconstruction.
//!
//! Recoverable conditions (no data this poll, a dropped batch on overflow,
//! an unrecognized record) are not errors at all. They are absorbed where
//! they are detected and only show up as counters.

use thiserror::Error;

/// Category of a producer-side fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerFaultKind {
    /// Device reported an error status.
    Hardware,
    /// Device-level FIFO overflowed and events were lost before reaching us.
    FifoOverflow,
    /// Reading the underlying source failed.
    Io,
    /// Source data could not be decoded.
    Format,
}

impl std::fmt::Display for ProducerFaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProducerFaultKind::Hardware => "hardware",
            ProducerFaultKind::FifoOverflow => "fifo_overflow",
            ProducerFaultKind::Io => "io",
            ProducerFaultKind::Format => "format",
        };
        write!(f, "{}", label)
    }
}

/// Fatal condition reported by an [`EventProducer`](crate::EventProducer).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("producer '{source_name}' {kind} fault: {message}")]
pub struct ProducerFault {
    /// Human-readable name of the producer.
    pub source_name: String,
    /// Fault category.
    pub kind: ProducerFaultKind,
    /// Details.
    pub message: String,
}

impl ProducerFault {
    /// Fault raised by `source_name`.
    pub fn new(
        source_name: impl Into<String>,
        kind: ProducerFaultKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the pipeline error type.
pub type AppResult<T> = std::result::Result<T, FlimError>;

/// Primary error type for the pipeline.
#[derive(Error, Debug)]
pub enum FlimError {
    /// Semantically invalid configuration or parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file could not be loaded or deserialized.
    #[error("Config load error: {0}")]
    ConfigLoad(String),

    /// Operation not permitted in the current pipeline state, such as
    /// resizing the image while a stream is running.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Hardware or replay source fault.
    #[error(transparent)]
    Producer(#[from] ProducerFault),

    /// Recorded container could not be parsed.
    #[error("Format error: {0}")]
    Format(String),

    /// Recording failed (open, write, or an empty file after close).
    #[error("Recording error: {0}")]
    Recording(String),

    /// Filesystem or stream I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker thread could not be spawned or joined.
    #[error("Thread error: {0}")]
    Thread(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        let fault = ProducerFault::new("spc", ProducerFaultKind::FifoOverflow, "lost 12 words");
        assert_eq!(
            fault.to_string(),
            "producer 'spc' fifo_overflow fault: lost 12 words"
        );

        let err: FlimError = fault.into();
        assert!(matches!(err, FlimError::Producer(_)));
    }
}
