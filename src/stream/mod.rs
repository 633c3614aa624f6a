//! Playback detection: state machine, its worker thread and event delivery.

pub mod clock;
pub mod error;
pub mod event;
pub mod fan_out;
pub mod machine;
pub mod station;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StationError};
pub use event::Event;
pub use fan_out::{EventFanOut, FanOut};
pub use machine::{IdentifyFailurePolicy, StreamConfig, StreamMachine, StreamState};
pub use station::{Station, StationRunner};
