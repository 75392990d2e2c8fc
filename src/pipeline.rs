//! A processor with the standard consumers attached.

use crate::config::FlimConfig;
use crate::image::{ImageHandle, ImageReconstructor};
use crate::processor::{EventProcessor, ProcessorStats};
use flim_core::{shared, AppResult, EventProducer, SharedConsumer};
use flim_storage::{RecordingError, RecordingSummary, StreamRecorder};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Processor feeding an [`ImageReconstructor`] and then a
/// [`StreamRecorder`], in that order.
#[derive(Debug)]
pub struct FlimPipeline {
    processor: EventProcessor,
    image: Arc<Mutex<ImageReconstructor>>,
    recorder: Arc<Mutex<StreamRecorder>>,
}

impl FlimPipeline {
    /// Build the pipeline for `producer` from a loaded configuration.
    pub fn new(producer: Box<dyn EventProducer>, config: &FlimConfig) -> AppResult<Self> {
        let acquisition = producer.acquisition();
        let mut processor = EventProcessor::new(producer, config.pipeline.clone())?;

        let image = shared(ImageReconstructor::new(&acquisition, &config.image));
        let recorder = shared(StreamRecorder::new(
            acquisition.clone(),
            config.recording.clone(),
        ));

        processor.add_consumer(Arc::clone(&image) as SharedConsumer)?;
        processor.add_consumer(Arc::clone(&recorder) as SharedConsumer)?;

        info!(
            system = %acquisition.tcspc_system,
            n_x = config.image.n_x,
            n_y = config.image.n_y,
            "pipeline assembled"
        );

        Ok(Self {
            processor,
            image,
            recorder,
        })
    }

    /// The event processor driving the stream.
    pub fn processor(&self) -> &EventProcessor {
        &self.processor
    }

    /// Mutable processor, for sequence settings and consumers.
    pub fn processor_mut(&mut self) -> &mut EventProcessor {
        &mut self.processor
    }

    /// Read handle on the live image.
    pub fn image(&self) -> ImageHandle {
        self.image.lock().handle()
    }

    /// The image reconstructor consumer.
    pub fn reconstructor(&self) -> &Arc<Mutex<ImageReconstructor>> {
        &self.image
    }

    /// The stream recorder consumer.
    pub fn recorder(&self) -> &Arc<Mutex<StreamRecorder>> {
        &self.recorder
    }

    /// Arm recording to `path`; the header is written when the stream starts.
    pub fn start_recording(&self, path: impl AsRef<Path>) -> Result<(), RecordingError> {
        self.recorder.lock().start_recording(path)
    }

    /// Disarm recording and close the current file.
    pub fn stop_recording(&self) -> Result<RecordingSummary, RecordingError> {
        self.recorder.lock().stop_recording()
    }

    /// Reset the ring and counters, then start the processor threads.
    pub fn start(&mut self) -> AppResult<()> {
        self.processor.reset()?;
        self.processor.start()
    }

    /// Stop and join the processor threads.
    pub fn stop(&mut self) -> AppResult<()> {
        self.processor.stop()
    }

    /// Run a finite producer to the end of its stream.
    pub fn run_to_end(&mut self) -> AppResult<ProcessorStats> {
        self.start()?;
        self.processor.wait_for_completion()?;
        if let Some(fault) = self.processor.fault() {
            return Err(fault.into());
        }
        Ok(self.processor.stats())
    }
}
