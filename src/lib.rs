//! # flim-stream
//!
//! Real-time TCSPC event pipeline for fluorescence and phosphorescence
//! lifetime imaging. Events from a hardware or file producer flow through a
//! ring of buffers to an image reconstructor and an optional stream recorder.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (`config/flim.toml` plus `FLIM_`
//!   environment overrides).
//! - **`tracing_setup`**: Subscriber initialization for structured logging.
//! - **`processor`**: The two-thread [`EventProcessor`] that feeds consumers.
//! - **`image`**: The [`ImageReconstructor`] consumer and its read handle.
//! - **`pipeline`**: Wiring of processor, reconstructor and recorder from a
//!   loaded configuration.
//!
//! The building blocks live in workspace crates re-exported here:
//! [`flim_core`] (events and traits), [`flim_pool`] (slot ring),
//! [`flim_codec`] (vendor decoders) and [`flim_storage`] (container format).

pub mod config;
pub mod image;
pub mod pipeline;
pub mod processor;
pub mod tracing_setup;

pub use flim_codec;
pub use flim_core;
pub use flim_pool;
pub use flim_storage;

pub use config::FlimConfig;
pub use image::{ImageHandle, ImageReconstructor};
pub use pipeline::FlimPipeline;
pub use processor::{EventProcessor, FrameProgress, ProcessorStats};
