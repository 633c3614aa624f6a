use crate::error::Result;
use crate::stream::error::{ErrorReporter, StationError};
use crate::stream::event::Event;
use crate::stream::fan_out::FanOut;
use crate::stream::station::{Station, StationRunner};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Pluggable consumer of stream events.
pub trait EventSink: Send + 'static {
    /// Called once on the sink's own thread before any event.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Handle a single event.
    fn handle(&mut self, event: &Event) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Station wrapper for any EventSink implementation.
///
/// Sink failures are reported and never stop delivery of later events.
pub struct SinkStation {
    sink: Box<dyn EventSink>,
    handled: usize,
}

impl SinkStation {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self { sink, handled: 0 }
    }

    /// Events handled successfully so far.
    pub fn handled(&self) -> usize {
        self.handled
    }
}

impl Station for SinkStation {
    type Input = Event;
    type Output = ();

    fn name(&self) -> &'static str {
        self.sink.name()
    }

    fn startup(&mut self) {
        if let Err(e) = self.sink.start() {
            tracing::warn!(sink = self.sink.name(), "Failed to start: {}", e);
        }
    }

    fn process(&mut self, event: Event) -> std::result::Result<Option<()>, StationError> {
        self.sink
            .handle(&event)
            .map_err(|e| StationError::Recoverable(format!("Failed to handle {}: {}", event, e)))?;
        self.handled += 1;
        Ok(None)
    }
}

/// Runs one sink on its own thread.
pub type SinkRunner = StationRunner<SinkStation>;

/// Spawn `sink` consuming `events` until the channel disconnects or
/// `shutdown` is set.
pub fn spawn_sink(
    sink: Box<dyn EventSink>,
    events: Receiver<Event>,
    error_reporter: Arc<dyn ErrorReporter>,
    shutdown: Arc<AtomicBool>,
) -> SinkRunner {
    StationRunner::spawn(
        SinkStation::new(sink),
        events,
        FanOut::new(),
        error_reporter,
        shutdown,
    )
}
