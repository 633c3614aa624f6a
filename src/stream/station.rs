//! Worker station abstraction and its thread runner.

use crate::stream::error::{ErrorReporter, StationError};
use crate::stream::fan_out::FanOut;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often an idle station checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A processing stage that consumes one input at a time.
///
/// Each station runs in its own thread, pulling from a channel and
/// publishing whatever it produces through a fan-out.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Clone + Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(Some(output))` - Successfully processed and produced output
    /// - `Ok(None)` - Successfully processed but no output
    /// - `Err(StationError)` - Processing failed
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called on the station thread before the first input.
    fn startup(&mut self) {}

    /// Called when the station is shutting down.
    fn shutdown(&mut self) {}
}

/// Drive `station` until the input disconnects, `shutdown` is set, or a
/// fatal error occurs.
///
/// The flag is only checked between inputs; an input that has been
/// dequeued is always fully processed.
pub fn run_station<S: Station>(
    station: &mut S,
    input_rx: &Receiver<S::Input>,
    output: &mut FanOut<S::Output>,
    error_reporter: &dyn ErrorReporter,
    shutdown: &AtomicBool,
) {
    let station_name = station.name();
    station.startup();
    tracing::debug!(station = station_name, "Station started");

    while !shutdown.load(Ordering::SeqCst) {
        let input = match input_rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(input) => input,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match station.process(input) {
            Ok(Some(item)) => output.publish(item),
            Ok(None) => {}
            Err(error @ StationError::Recoverable(_)) => {
                error_reporter.report(station_name, &error);
            }
            Err(error @ StationError::Fatal(_)) => {
                error_reporter.report(station_name, &error);
                break;
            }
        }
    }

    station.shutdown();
    tracing::debug!(station = station_name, "Station stopped");
}

/// Runs a station in a dedicated thread.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<S>>,
    station_name: &'static str,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawns `station` in a dedicated thread.
    ///
    /// The station is handed back by [`join`](Self::join) so its final state
    /// can be inspected.
    pub fn spawn(
        mut station: S,
        input_rx: Receiver<S::Input>,
        mut output: FanOut<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(station_name.to_lowercase())
            .spawn(move || {
                run_station(
                    &mut station,
                    &input_rx,
                    &mut output,
                    error_reporter.as_ref(),
                    &shutdown,
                );
                station
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(station = station_name, "Failed to spawn thread: {}", e);
                None
            }
        };

        Self {
            handle,
            station_name,
            _phantom: PhantomData,
        }
    }

    /// Waits for the station thread to complete and returns the station.
    pub fn join(mut self) -> Result<S, String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name)),
            None => Err(format!("Station '{}' was never started", self.station_name)),
        }
    }

    /// Whether the station thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }
}
