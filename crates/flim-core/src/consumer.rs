//! Sink side of the event pipeline.

use crate::event::TcspcEvent;
use parking_lot::Mutex;
use std::sync::Arc;

/// A sink fed by the event processor.
///
/// All methods are called from the processor thread, in registration order,
/// while the processor holds the consumer's lock. Lifecycle calls bracket a
/// stream:
///
/// ```text
/// event_stream_about_to_start
///   (add_events | next_image_started)*  [image_sequence_finished]
/// event_stream_finished
/// ```
pub trait EventConsumer: Send {
    /// A stream is about to begin. Reset per-stream state here.
    fn event_stream_about_to_start(&mut self) {}

    /// The stream has ended and no further events will arrive.
    fn event_stream_finished(&mut self) {}

    /// Handle one event.
    fn add_event(&mut self, event: TcspcEvent);

    /// Handle a run of events in arrival order.
    fn add_events(&mut self, events: &[TcspcEvent]) {
        for event in events {
            self.add_event(*event);
        }
    }

    /// The frames-per-image threshold was crossed; a new image begins.
    fn next_image_started(&mut self) {}

    /// The configured number of images has been delivered.
    fn image_sequence_finished(&mut self) {}

    /// Whether the processor should deliver events to this consumer at all.
    fn is_processing_events(&self) -> bool;

    /// Name used in log output.
    fn name(&self) -> &str {
        "consumer"
    }
}

/// Consumer shared between the processor and its owner.
pub type SharedConsumer = Arc<Mutex<dyn EventConsumer>>;

/// Wrap a consumer for registration while keeping a typed handle.
pub fn shared<C: EventConsumer + 'static>(consumer: C) -> Arc<Mutex<C>> {
    Arc::new(Mutex::new(consumer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        seen: Vec<TcspcEvent>,
    }

    impl EventConsumer for Counter {
        fn add_event(&mut self, event: TcspcEvent) {
            self.seen.push(event);
        }

        fn is_processing_events(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_default_batch_preserves_order() {
        let typed = shared(Counter::default());
        let erased: SharedConsumer = typed.clone();

        let events = [TcspcEvent::rollover(1), TcspcEvent::photon(0, 5, 2)];
        erased.lock().add_events(&events);

        assert_eq!(typed.lock().seen, events);
        assert_eq!(erased.lock().name(), "consumer");
    }
}
