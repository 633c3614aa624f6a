//! Sink that writes every event to the log.

use crate::error::Result;
use crate::sinks::sink::EventSink;
use crate::stream::event::Event;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn handle(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::NewMetadata { title } => tracing::info!(%title, "New metadata"),
            Event::StartedPlaying => tracing::info!("Started playing"),
            Event::StoppedPlaying => tracing::info!("Stopped playing"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogSink"
    }
}
