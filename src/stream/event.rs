//! Events published by the stream machine.

use serde::{Deserialize, Serialize};

/// Something a subscriber may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new listening episode began (first loud fragment after idle).
    StartedPlaying,
    /// Silence outlasted the stop delay; the episode is over.
    StoppedPlaying,
    /// The current record was identified (or could not be).
    NewMetadata { title: String },
}

impl Event {
    /// Serialize event to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::StartedPlaying => write!(f, "started playing"),
            Event::StoppedPlaying => write!(f, "stopped playing"),
            Event::NewMetadata { title } => write!(f, "now playing: {}", title),
        }
    }
}
