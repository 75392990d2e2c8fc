//! Two-thread event processor.
//!
//! A reader thread asks the [`EventProducer`] to fill slots of a
//! [`SlotRing`]; a processor thread takes filled slots in order and hands
//! their events to every registered [`EventConsumer`]. The two threads share
//! nothing but the ring, a few atomics and the stored producer fault.
//!
//! ```text
//! producer --fill--> [ SlotRing<TcspcEvent> ] --process--> consumer 1..n
//!  (flim-reader)                                          (flim-processor)
//! ```
//!
//! The reader never blocks on the ring. When the next slot is still waiting
//! to be processed the producer is drained into a scratch buffer and the
//! batch is dropped and counted.

use crate::config::PipelineConfig;
use flim_core::{
    AppResult, EventKind, EventProducer, Fill, FlimError, Mark, ProducerFault, SharedConsumer,
    TcspcEvent,
};
use flim_pool::{RingStats, SlotRing};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Called on the processor thread for every frame marker.
pub type ProgressCallback = Box<dyn FnMut(FrameProgress) + Send>;

/// Position in the image sequence after a frame marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProgress {
    /// Frames seen since the last reset.
    pub frame_index: u64,
    /// Completed images since the last reset.
    pub image_index: u64,
}

/// Image-sequence boundary produced by a frame marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    NextImage,
    SequenceFinished,
}

/// Frame and image counting across buffers.
#[derive(Debug, Clone, Default)]
struct FrameCounter {
    frames_per_image: u64,
    n_images: u64,
    continuous: bool,
    frame_index: u64,
    frames_in_image: u64,
    image_index: u64,
    sequence_done: bool,
}

impl FrameCounter {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            frames_per_image: config.frames_per_image.max(1),
            n_images: config.n_images,
            continuous: config.continuous,
            ..Default::default()
        }
    }

    fn on_frame(&mut self) -> Option<Boundary> {
        self.frame_index += 1;
        if self.continuous || self.sequence_done {
            return None;
        }
        self.frames_in_image += 1;
        if self.frames_in_image < self.frames_per_image {
            return None;
        }
        self.frames_in_image = 0;
        self.image_index += 1;
        if self.n_images > 0 && self.image_index >= self.n_images {
            self.sequence_done = true;
            Some(Boundary::SequenceFinished)
        } else {
            Some(Boundary::NextImage)
        }
    }

    fn progress(&self) -> FrameProgress {
        FrameProgress {
            frame_index: self.frame_index,
            image_index: self.image_index,
        }
    }
}

/// Snapshot of processor activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Slots committed by the reader.
    pub buffers_filled: u64,
    /// Slots handed back by the processor.
    pub buffers_processed: u64,
    /// Events delivered to consumers.
    pub events_processed: u64,
    /// Batches read from the producer while the ring was full.
    pub dropped_batches: u64,
    /// Events in the dropped batches.
    pub dropped_events: u64,
    /// Polls that returned no data.
    pub empty_polls: u64,
    /// Frame markers seen since the last reset.
    pub frame_index: u64,
    /// Completed images since the last reset.
    pub image_index: u64,
    /// Slot ring counters.
    pub ring: RingStats,
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    reader_done: AtomicBool,
    events_processed: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_events: AtomicU64,
    empty_polls: AtomicU64,
    frame_index: AtomicU64,
    image_index: AtomicU64,
    fault: Mutex<Option<ProducerFault>>,
}

/// Drives one producer into a list of consumers on two threads.
pub struct EventProcessor {
    config: PipelineConfig,
    ring: Arc<SlotRing<TcspcEvent>>,
    producer: Arc<Mutex<Box<dyn EventProducer>>>,
    consumers: Vec<SharedConsumer>,
    counter: Arc<Mutex<FrameCounter>>,
    progress: Arc<Mutex<Option<ProgressCallback>>>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("config", &self.config)
            .field("consumers", &self.consumers.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl EventProcessor {
    /// Build a processor with a ring sized from `config`.
    pub fn new(producer: Box<dyn EventProducer>, config: PipelineConfig) -> AppResult<Self> {
        if config.slots == 0 || config.slot_capacity == 0 {
            return Err(FlimError::Configuration(format!(
                "event ring needs at least one non-empty slot, got {} x {}",
                config.slots, config.slot_capacity
            )));
        }
        let ring = SlotRing::new(config.slots, config.slot_capacity);
        let counter = FrameCounter::new(&config);

        Ok(Self {
            config,
            ring,
            producer: Arc::new(Mutex::new(producer)),
            consumers: Vec::new(),
            counter: Arc::new(Mutex::new(counter)),
            progress: Arc::new(Mutex::new(None)),
            shared: Arc::new(Shared::default()),
            reader: None,
            processor: None,
        })
    }

    /// Ring sizing and sequence settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Timing description reported by the producer.
    pub fn acquisition(&self) -> flim_core::AcquisitionParameters {
        self.producer.lock().acquisition()
    }

    /// Append a consumer. Consumers are fed in registration order.
    pub fn add_consumer(&mut self, consumer: SharedConsumer) -> AppResult<()> {
        self.ensure_stopped("add a consumer")?;
        debug!(consumer = consumer.lock().name(), "consumer registered");
        self.consumers.push(consumer);
        Ok(())
    }

    /// Remove a previously registered consumer. Returns whether it was found.
    pub fn remove_consumer(&mut self, consumer: &SharedConsumer) -> AppResult<bool> {
        self.ensure_stopped("remove a consumer")?;
        let target = Arc::as_ptr(consumer).cast::<()>();
        let before = self.consumers.len();
        self.consumers
            .retain(|c| Arc::as_ptr(c).cast::<()>() != target);
        Ok(self.consumers.len() != before)
    }

    /// Number of registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Install the frame progress callback.
    pub fn set_progress_callback(&mut self, callback: impl FnMut(FrameProgress) + Send + 'static) {
        *self.progress.lock() = Some(Box::new(callback));
    }

    /// Change image-sequence counting. Takes effect at the next reset.
    pub fn set_sequence(&mut self, frames_per_image: u64, n_images: u64, continuous: bool) {
        self.config.frames_per_image = frames_per_image.max(1);
        self.config.n_images = n_images;
        self.config.continuous = continuous;
    }

    /// Zero frame and image counters before a new sequence.
    pub fn reset(&mut self) -> AppResult<()> {
        self.ensure_stopped("reset")?;
        *self.counter.lock() = FrameCounter::new(&self.config);
        self.shared.frame_index.store(0, Ordering::Relaxed);
        self.shared.image_index.store(0, Ordering::Relaxed);
        debug!("frame counters reset");
        Ok(())
    }

    /// Notify consumers and launch the reader and processor threads.
    pub fn start(&mut self) -> AppResult<()> {
        if self.reader.is_some() || self.processor.is_some() {
            return Err(FlimError::InvalidState(
                "event processor is already running".to_string(),
            ));
        }

        self.ring.reset();
        *self.shared.fault.lock() = None;
        self.shared.reader_done.store(false, Ordering::SeqCst);

        for consumer in &self.consumers {
            consumer.lock().event_stream_about_to_start();
        }

        self.shared.running.store(true, Ordering::SeqCst);

        let reader = ReaderLoop {
            ring: Arc::clone(&self.ring),
            producer: Arc::clone(&self.producer),
            shared: Arc::clone(&self.shared),
            idle_sleep: Duration::from_micros(self.config.idle_sleep_us),
        };
        let processor = ProcessorLoop {
            ring: Arc::clone(&self.ring),
            consumers: self.consumers.clone(),
            counter: Arc::clone(&self.counter),
            progress: Arc::clone(&self.progress),
            shared: Arc::clone(&self.shared),
        };

        let producer_name = self.producer.lock().name().to_string();
        self.processor = Some(
            thread::Builder::new()
                .name("flim-processor".to_string())
                .spawn(move || processor.run())
                .map_err(|e| FlimError::Thread(format!("failed to spawn processor: {e}")))?,
        );
        match thread::Builder::new()
            .name("flim-reader".to_string())
            .spawn(move || reader.run())
        {
            Ok(handle) => self.reader = Some(handle),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.ring.mark_stream_finished();
                self.join_processor()?;
                return Err(FlimError::Thread(format!("failed to spawn reader: {e}")));
            }
        }

        info!(
            producer = %producer_name,
            consumers = self.consumers.len(),
            slots = self.config.slots,
            slot_capacity = self.config.slot_capacity,
            "event processor started"
        );
        Ok(())
    }

    /// Halt the reader, drain filled buffers, join both threads and notify
    /// consumers that the stream ended.
    pub fn stop(&mut self) -> AppResult<()> {
        if self.reader.is_none() && self.processor.is_none() {
            return Ok(());
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.finish()
    }

    /// Block until the producer reports end of stream (or faults), then
    /// finish as [`stop`](Self::stop) does.
    ///
    /// Never returns for a live producer that keeps delivering data.
    pub fn wait_for_completion(&mut self) -> AppResult<()> {
        if self.reader.is_none() && self.processor.is_none() {
            return Ok(());
        }
        self.finish()
    }

    fn finish(&mut self) -> AppResult<()> {
        let reader = self
            .reader
            .take()
            .map(|h| h.join().map_err(|_| FlimError::Thread("reader thread panicked".into())));
        self.shared.running.store(false, Ordering::SeqCst);
        self.ring.mark_stream_finished();
        let processor = self.join_processor();

        for consumer in &self.consumers {
            consumer.lock().event_stream_finished();
        }

        let stats = self.stats();
        info!(
            buffers = stats.buffers_processed,
            events = stats.events_processed,
            dropped_batches = stats.dropped_batches,
            frames = stats.frame_index,
            images = stats.image_index,
            "event processor stopped"
        );

        reader.transpose()?;
        processor
    }

    fn join_processor(&mut self) -> AppResult<()> {
        match self.processor.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FlimError::Thread("processor thread panicked".into())),
            None => Ok(()),
        }
    }

    fn ensure_stopped(&self, what: &str) -> AppResult<()> {
        if self.is_running() {
            Err(FlimError::InvalidState(format!(
                "cannot {what} while the event processor is running"
            )))
        } else {
            Ok(())
        }
    }

    /// Whether the threads have been started and not yet joined.
    pub fn is_running(&self) -> bool {
        self.reader.is_some() || self.processor.is_some()
    }

    /// Whether the reader has stopped on its own (end of stream or fault).
    pub fn is_finished(&self) -> bool {
        self.shared.reader_done.load(Ordering::SeqCst)
    }

    /// Fatal producer fault of the current or last stream.
    pub fn fault(&self) -> Option<ProducerFault> {
        self.shared.fault.lock().clone()
    }

    /// Counters since the last reset.
    pub fn stats(&self) -> ProcessorStats {
        let ring = self.ring.stats();
        ProcessorStats {
            buffers_filled: ring.filled,
            buffers_processed: ring.processed,
            events_processed: self.shared.events_processed.load(Ordering::Relaxed),
            dropped_batches: self.shared.dropped_batches.load(Ordering::Relaxed),
            dropped_events: self.shared.dropped_events.load(Ordering::Relaxed),
            empty_polls: self.shared.empty_polls.load(Ordering::Relaxed),
            frame_index: self.shared.frame_index.load(Ordering::Relaxed),
            image_index: self.shared.image_index.load(Ordering::Relaxed),
            ring,
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                error!(error = %e, "event processor did not stop cleanly");
            }
        }
    }
}

struct ReaderLoop {
    ring: Arc<SlotRing<TcspcEvent>>,
    producer: Arc<Mutex<Box<dyn EventProducer>>>,
    shared: Arc<Shared>,
    idle_sleep: Duration,
}

impl ReaderLoop {
    fn run(self) {
        let mut scratch = vec![TcspcEvent::default(); self.ring.slot_capacity()];
        let slots = self.ring.slot_count() as f64;

        while self.shared.running.load(Ordering::Relaxed) {
            let hint = self.ring.filled_count() as f64 / slots;

            let outcome = match self.ring.try_acquire_fill() {
                Ok(mut slot) => {
                    let result = self.producer.lock().fill_buffer(&mut slot, hint);
                    match result {
                        Ok(Fill::Events(n)) if n > 0 => slot.commit(n),
                        _ => slot.abort(),
                    }
                    result
                }
                Err(busy) => {
                    let result = self.producer.lock().fill_buffer(&mut scratch, hint);
                    if let Ok(Fill::Events(n)) = result {
                        if n > 0 {
                            self.record_drop(n, &busy);
                        }
                    }
                    result
                }
            };

            match outcome {
                Ok(Fill::Events(n)) if n > 0 => {}
                Ok(Fill::Events(_)) | Ok(Fill::NoData) => {
                    self.shared.empty_polls.fetch_add(1, Ordering::Relaxed);
                    if !self.idle_sleep.is_zero() {
                        thread::sleep(self.idle_sleep);
                    }
                }
                Ok(Fill::EndOfStream) => {
                    info!(producer = self.producer.lock().name(), "producer reached end of stream");
                    break;
                }
                Err(fault) => {
                    error!(error = %fault, "producer fault, stopping stream");
                    *self.shared.fault.lock() = Some(fault);
                    break;
                }
            }
        }

        self.shared.reader_done.store(true, Ordering::SeqCst);
        self.ring.mark_stream_finished();
    }

    fn record_drop(&self, events: usize, busy: &flim_pool::AcquireError) {
        let batches = self.shared.dropped_batches.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared
            .dropped_events
            .fetch_add(events as u64, Ordering::Relaxed);
        if batches == 1 || batches % 1000 == 0 {
            warn!(dropped_batches = batches, events, reason = %busy, "event ring full, dropping batch");
        }
    }
}

struct ProcessorLoop {
    ring: Arc<SlotRing<TcspcEvent>>,
    consumers: Vec<SharedConsumer>,
    counter: Arc<Mutex<FrameCounter>>,
    progress: Arc<Mutex<Option<ProgressCallback>>>,
    shared: Arc<Shared>,
}

impl ProcessorLoop {
    fn run(self) {
        let mut boundaries = Vec::new();
        while let Some(slot) = self.ring.acquire_for_process() {
            trace!(index = slot.index(), events = slot.len(), "processing buffer");
            self.scan_frames(&slot, &mut boundaries);
            for consumer in &self.consumers {
                deliver(consumer, &slot, &boundaries);
            }
            self.shared
                .events_processed
                .fetch_add(slot.len() as u64, Ordering::Relaxed);
            slot.commit();
        }
        debug!("processor drained event ring");
    }

    /// Count frame markers in `events` and collect image boundaries.
    fn scan_frames(&self, events: &[TcspcEvent], boundaries: &mut Vec<(usize, Boundary)>) {
        boundaries.clear();
        let mut counter = self.counter.lock();
        for (i, event) in events.iter().enumerate() {
            // Records with undefined mark bits are dropped downstream, not counted.
            if !matches!(event.kind(), EventKind::Marker(m) if m.contains(Mark::FRAME)) {
                continue;
            }
            if let Some(boundary) = counter.on_frame() {
                boundaries.push((i, boundary));
            }
            let progress = counter.progress();
            self.shared
                .frame_index
                .store(progress.frame_index, Ordering::Relaxed);
            self.shared
                .image_index
                .store(progress.image_index, Ordering::Relaxed);
            if let Some(callback) = self.progress.lock().as_mut() {
                callback(progress);
            }
        }
    }
}

/// Feed one buffer to one consumer, splitting it at image boundaries.
fn deliver(consumer: &SharedConsumer, events: &[TcspcEvent], boundaries: &[(usize, Boundary)]) {
    let mut consumer = consumer.lock();
    if !consumer.is_processing_events() {
        return;
    }

    let mut start = 0;
    for &(index, boundary) in boundaries {
        consumer.add_events(&events[start..=index]);
        start = index + 1;
        match boundary {
            Boundary::NextImage => consumer.next_image_started(),
            Boundary::SequenceFinished => {
                consumer.image_sequence_finished();
                return;
            }
        }
        if !consumer.is_processing_events() {
            return;
        }
    }
    consumer.add_events(&events[start..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flim_core::{shared, AcquisitionParameters, EventConsumer, ProducerFaultKind, VecProducer};

    #[derive(Default)]
    struct Log {
        events: Vec<TcspcEvent>,
        calls: Vec<&'static str>,
        enabled: bool,
    }

    impl EventConsumer for Log {
        fn event_stream_about_to_start(&mut self) {
            self.calls.push("start");
        }
        fn event_stream_finished(&mut self) {
            self.calls.push("finished");
        }
        fn add_event(&mut self, event: TcspcEvent) {
            self.events.push(event);
        }
        fn next_image_started(&mut self) {
            self.calls.push("next_image");
        }
        fn image_sequence_finished(&mut self) {
            self.calls.push("sequence_finished");
        }
        fn is_processing_events(&self) -> bool {
            self.enabled
        }
    }

    fn config(slots: usize, capacity: usize) -> PipelineConfig {
        PipelineConfig {
            slots,
            slot_capacity: capacity,
            idle_sleep_us: 0,
            ..Default::default()
        }
    }

    fn frames(n: u16) -> Vec<TcspcEvent> {
        (0..n)
            .flat_map(|i| {
                [
                    TcspcEvent::photon(0, i, i),
                    TcspcEvent::marker(Mark::FRAME, i),
                ]
            })
            .collect()
    }

    #[test]
    fn test_delivers_all_events_in_order() {
        let events: Vec<_> = (0..10_000u32)
            .map(|i| TcspcEvent::photon(0, (i % 4096) as u16, i as u16))
            .collect();
        let producer = VecProducer::new(events.clone(), 37, AcquisitionParameters::default());
        let mut processor = EventProcessor::new(Box::new(producer), config(64, 100)).unwrap();

        let log = shared(Log {
            enabled: true,
            ..Default::default()
        });
        processor.add_consumer(log.clone()).unwrap();
        processor.start().unwrap();
        processor.wait_for_completion().unwrap();

        let log = log.lock();
        let stats = processor.stats();
        assert_eq!(log.calls, vec!["start", "finished"]);
        assert_eq!(log.events.len() + stats.dropped_events as usize, events.len());
        if stats.dropped_batches == 0 {
            assert_eq!(log.events, events);
        }
        assert!(processor.is_finished());
        assert!(processor.fault().is_none());
    }

    #[test]
    fn test_image_boundaries_short_circuit() {
        let producer = VecProducer::new(frames(5), 100, AcquisitionParameters::default());
        let mut cfg = config(4, 100);
        cfg.frames_per_image = 2;
        cfg.n_images = 2;
        let mut processor = EventProcessor::new(Box::new(producer), cfg).unwrap();

        let log = shared(Log {
            enabled: true,
            ..Default::default()
        });
        processor.add_consumer(log.clone()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        processor.set_progress_callback(move |p| seen_cb.lock().push(p));

        processor.start().unwrap();
        processor.wait_for_completion().unwrap();

        let log = log.lock();
        assert_eq!(
            log.calls,
            vec!["start", "next_image", "sequence_finished", "finished"]
        );
        // Delivery stops at the fourth frame marker.
        assert_eq!(log.events, frames(5)[..8].to_vec());
        assert_eq!(seen.lock().len(), 5);

        let stats = processor.stats();
        assert_eq!(stats.frame_index, 5);
        assert_eq!(stats.image_index, 2);
    }

    #[test]
    fn test_continuous_mode_counts_frames_only() {
        let producer = VecProducer::new(frames(6), 3, AcquisitionParameters::default());
        let mut cfg = config(8, 16);
        cfg.continuous = true;
        let mut processor = EventProcessor::new(Box::new(producer), cfg).unwrap();
        let log = shared(Log {
            enabled: true,
            ..Default::default()
        });
        processor.add_consumer(log.clone()).unwrap();

        processor.start().unwrap();
        processor.wait_for_completion().unwrap();

        assert_eq!(log.lock().calls, vec!["start", "finished"]);
        assert_eq!(processor.stats().frame_index, 6);
        assert_eq!(processor.stats().image_index, 0);

        processor.reset().unwrap();
        assert_eq!(processor.stats().frame_index, 0);
    }

    #[test]
    fn test_uninterested_consumer_sees_no_events() {
        let producer = VecProducer::new(frames(3), 10, AcquisitionParameters::default());
        let mut processor = EventProcessor::new(Box::new(producer), config(4, 10)).unwrap();
        let idle = shared(Log::default());
        processor.add_consumer(idle.clone()).unwrap();
        processor.start().unwrap();
        processor.wait_for_completion().unwrap();

        let idle = idle.lock();
        assert!(idle.events.is_empty());
        assert_eq!(idle.calls, vec!["start", "finished"]);
    }

    struct Faulty;

    impl EventProducer for Faulty {
        fn fill_buffer(
            &mut self,
            _buffer: &mut [TcspcEvent],
            _hint: f64,
        ) -> Result<Fill, ProducerFault> {
            Err(ProducerFault::new(
                "faulty",
                ProducerFaultKind::FifoOverflow,
                "device FIFO overflowed",
            ))
        }

        fn acquisition(&self) -> AcquisitionParameters {
            AcquisitionParameters::default()
        }
    }

    #[test]
    fn test_producer_fault_is_stored() {
        let mut processor = EventProcessor::new(Box::new(Faulty), config(2, 8)).unwrap();
        processor.start().unwrap();
        processor.wait_for_completion().unwrap();

        let fault = processor.fault().unwrap();
        assert_eq!(fault.kind, ProducerFaultKind::FifoOverflow);
        assert!(processor.is_finished());
    }

    #[test]
    fn test_consumers_fixed_while_running() {
        let producer = VecProducer::new(Vec::new(), 1, AcquisitionParameters::default());
        let mut processor = EventProcessor::new(Box::new(producer), config(2, 8)).unwrap();
        let log: SharedConsumer = shared(Log::default());
        processor.add_consumer(log.clone()).unwrap();

        processor.start().unwrap();
        assert!(processor.start().is_err());
        assert!(processor.add_consumer(log.clone()).is_err());
        processor.stop().unwrap();

        assert!(processor.remove_consumer(&log).unwrap());
        assert_eq!(processor.consumer_count(), 0);
    }

    #[test]
    fn test_unrecognized_frame_bits_are_not_frames() {
        // FRAME plus an undefined bit.
        let bogus = TcspcEvent {
            macro_time: 5,
            micro_time: (0x48 << 4) | 0xF,
        };
        assert_eq!(bogus.kind(), EventKind::Unrecognized(0x48));
        let events = vec![
            TcspcEvent::marker(Mark::LINE_START, 0),
            bogus,
            TcspcEvent::marker(Mark::FRAME, 9),
        ];
        let producer = VecProducer::new(events.clone(), 8, AcquisitionParameters::default());
        let mut cfg = config(4, 8);
        cfg.frames_per_image = 1;
        cfg.n_images = 1;
        let mut processor = EventProcessor::new(Box::new(producer), cfg).unwrap();
        let log = shared(Log {
            enabled: true,
            ..Default::default()
        });
        processor.add_consumer(log.clone()).unwrap();

        processor.start().unwrap();
        processor.wait_for_completion().unwrap();

        assert_eq!(processor.stats().frame_index, 1);
        let log = log.lock();
        // The sequence ends at the real frame marker, after the bogus record.
        assert_eq!(log.events, events);
        assert_eq!(log.calls, vec!["start", "sequence_finished", "finished"]);
    }

    #[test]
    fn test_rejects_empty_ring() {
        let producer = VecProducer::new(Vec::new(), 1, AcquisitionParameters::default());
        assert!(EventProcessor::new(Box::new(producer), config(0, 8)).is_err());
    }
}
