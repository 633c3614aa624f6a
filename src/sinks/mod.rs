//! Consumers of stream events.

#[cfg(feature = "http")]
pub mod hue;
#[cfg(feature = "http")]
pub mod icecast;
pub mod logger;
pub mod sink;

pub use logger::LogSink;
pub use sink::{EventSink, SinkRunner, SinkStation, spawn_sink};

#[cfg(feature = "http")]
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Blocking client with the request timeout applied.
///
/// Must not be created or dropped on an async runtime thread.
#[cfg(feature = "http")]
pub(crate) fn http_client() -> crate::error::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| crate::error::NeedledropError::Http {
            message: format!("Failed to create HTTP client: {}", e),
        })
}
