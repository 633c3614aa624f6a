//! Philips Hue light that follows the music.
//!
//! About ten times a second the most recent PCM fragment is metered and the
//! configured light's brightness set to its peak relative to the loudest
//! peak heard so far.

use crate::audio::meter::peak_level;
use crate::audio::pcm::PcmWindow;
use crate::config::HueConfig;
use crate::defaults::{HUE_MIN_PEAK, HUE_UPDATE_MS};
use crate::error::{NeedledropError, Result};
use crate::sinks::http_client;
use crate::stream::event::Event;
use crossbeam_channel::{Receiver, TryRecvError};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Maps peak levels to Hue brightness (0-255) against a ratcheting maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessTracker {
    max_peak: u16,
}

impl BrightnessTracker {
    pub fn new() -> Self {
        Self {
            max_peak: HUE_MIN_PEAK,
        }
    }

    pub fn max_peak(&self) -> u16 {
        self.max_peak
    }

    /// Brightness for `peak`, raising the maximum if needed.
    pub fn update(&mut self, peak: u16) -> u8 {
        self.max_peak = self.max_peak.max(peak);
        (u32::from(peak) * 255 / u32::from(self.max_peak)) as u8
    }

    /// Return the maximum to its floor.
    pub fn reset(&mut self) {
        self.max_peak = HUE_MIN_PEAK;
    }
}

impl Default for BrightnessTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the id of the light called `name` (case-insensitive) in a
/// `GET /lights` response.
pub fn find_light_id(lights: &Value, name: &str) -> Option<String> {
    let wanted = name.to_lowercase();
    lights.as_object()?.iter().find_map(|(id, light)| {
        let light_name = light.get("name")?.as_str()?;
        (light_name.to_lowercase() == wanted).then(|| id.clone())
    })
}

/// Turn a bridge error payload (`[{"error": {"description": ...}}]`) into
/// an error; anything else passes through.
pub fn check_bridge_response(response: Value) -> Result<Value> {
    let description = response
        .get(0)
        .and_then(|entry| entry.get("error"))
        .and_then(|error| error.get("description"))
        .and_then(Value::as_str);
    match description {
        Some(description) => Err(NeedledropError::Http {
            message: format!("Hue bridge error: {}", description),
        }),
        None => Ok(response),
    }
}

/// Minimal Hue bridge REST client.
pub struct HueBridge {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HueBridge {
    pub fn new(host: &str, username: &str, client: reqwest::blocking::Client) -> Self {
        Self {
            base_url: format!("http://{}/api/{}", host, username),
            client,
        }
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| NeedledropError::Http {
                message: format!("Hue request failed: {}", e),
            })?;
        let body: Value = response.json().map_err(|e| NeedledropError::Http {
            message: format!("Invalid Hue response: {}", e),
        })?;
        check_bridge_response(body)
    }

    /// Look up a light id by name.
    pub fn find_light(&self, name: &str) -> Result<Option<String>> {
        let lights = self.send(self.client.get(format!("{}/lights", self.base_url)))?;
        Ok(find_light_id(&lights, name))
    }

    pub fn set_brightness(&self, light_id: &str, brightness: u8) -> Result<()> {
        self.send(
            self.client
                .put(format!("{}/lights/{}/state", self.base_url, light_id))
                .json(&json!({"bri": brightness, "transitiontime": 1})),
        )?;
        Ok(())
    }
}

/// Most recent item in `rx`, and whether the sender side is gone.
fn drain_latest<T>(rx: &Receiver<T>) -> (Option<T>, bool) {
    let mut latest = None;
    loop {
        match rx.try_recv() {
            Ok(item) => latest = Some(item),
            Err(TryRecvError::Empty) => return (latest, false),
            Err(TryRecvError::Disconnected) => return (latest, true),
        }
    }
}

/// Drives one Hue light from live audio.
pub struct HueController {
    config: HueConfig,
}

impl HueController {
    pub fn new(config: HueConfig) -> Self {
        Self { config }
    }

    /// Run the controller on its own thread.
    ///
    /// The thread exits when `shutdown` is set or the PCM feed disconnects.
    /// A light that cannot be found disables the controller with a warning.
    pub fn spawn(
        self,
        pcm: Receiver<PcmWindow>,
        events: Receiver<Event>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("hue".to_string())
            .spawn(move || self.run(&pcm, &events, &shutdown))
    }

    fn run(&self, pcm: &Receiver<PcmWindow>, events: &Receiver<Event>, shutdown: &AtomicBool) {
        let client = match http_client() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Not starting Hue: {}", e);
                return;
            }
        };
        let bridge = HueBridge::new(&self.config.host, &self.config.username, client);

        let light_id = match bridge.find_light(&self.config.light) {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::warn!("Could not find a light named '{}'", self.config.light);
                return;
            }
            Err(e) => {
                tracing::warn!("Error fetching lights: {}", e);
                return;
            }
        };
        tracing::info!(light = %self.config.light, id = %light_id, "Hue ready");

        let mut tracker = BrightnessTracker::new();
        let interval = Duration::from_millis(HUE_UPDATE_MS);

        while !shutdown.load(Ordering::SeqCst) {
            drain_events(events, &mut tracker);

            let (latest, disconnected) = drain_latest(pcm);
            if let Some(fragment) = latest {
                let brightness = tracker.update(peak_level(&fragment));
                tracing::trace!(brightness, "Hue brightness");
                if let Err(e) = bridge.set_brightness(&light_id, brightness) {
                    tracing::warn!("{}", e);
                }
            }
            if disconnected {
                break;
            }

            std::thread::sleep(interval);
        }
        tracing::info!("Hue stopped");
    }
}

/// Apply pending events to the tracker. Returns (handled, disconnected).
fn drain_events(events: &Receiver<Event>, tracker: &mut BrightnessTracker) -> (usize, bool) {
    let mut handled = 0;
    loop {
        match events.try_recv() {
            Ok(Event::StoppedPlaying) => {
                tracker.reset();
                handled += 1;
            }
            Ok(_) => handled += 1,
            Err(TryRecvError::Empty) => return (handled, false),
            Err(TryRecvError::Disconnected) => return (handled, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_scales_to_min_peak() {
        let mut tracker = BrightnessTracker::new();
        assert_eq!(tracker.update(0), 0);
        assert_eq!(tracker.update(1500), 127);
        assert_eq!(tracker.update(3000), 255);
    }

    #[test]
    fn test_brightness_max_ratchets_up() {
        let mut tracker = BrightnessTracker::new();
        assert_eq!(tracker.update(6000), 255);
        assert_eq!(tracker.max_peak(), 6000);
        assert_eq!(tracker.update(3000), 127);
        assert_eq!(tracker.update(32768), 255);
    }

    #[test]
    fn test_brightness_reset() {
        let mut tracker = BrightnessTracker::new();
        tracker.update(10000);
        tracker.reset();
        assert_eq!(tracker.max_peak(), HUE_MIN_PEAK);
    }

    #[test]
    fn test_find_light_id_case_insensitive() {
        let lights = json!({
            "1": {"name": "Hallway"},
            "7": {"name": "Turntable Lamp"},
        });
        assert_eq!(
            find_light_id(&lights, "turntable lamp"),
            Some("7".to_string())
        );
        assert_eq!(find_light_id(&lights, "Kitchen"), None);
    }

    #[test]
    fn test_find_light_id_in_malformed_response() {
        assert_eq!(find_light_id(&json!([1, 2, 3]), "Light"), None);
        assert_eq!(find_light_id(&json!({"1": {}}), "Light"), None);
    }

    #[test]
    fn test_bridge_error_payload() {
        let response = json!([{"error": {"type": 1, "description": "unauthorized user"}}]);
        match check_bridge_response(response) {
            Err(NeedledropError::Http { message }) => {
                assert!(message.contains("unauthorized user"));
            }
            _ => panic!("Expected Http error"),
        }
    }

    #[test]
    fn test_bridge_success_payload_passes_through() {
        let response = json!([{"success": {"/lights/7/state/bri": 200}}]);
        assert_eq!(check_bridge_response(response.clone()).unwrap(), response);
    }

    #[test]
    fn test_drain_latest_keeps_newest() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(drain_latest(&rx), (Some(2), false));
        drop(tx);
        assert_eq!(drain_latest(&rx), (None, true));
    }

    #[test]
    fn test_drain_events_resets_on_stop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut tracker = BrightnessTracker::new();
        tracker.update(20000);
        tx.send(Event::StartedPlaying).unwrap();
        tx.send(Event::StoppedPlaying).unwrap();

        assert_eq!(drain_events(&rx, &mut tracker), (2, false));
        assert_eq!(tracker.max_peak(), HUE_MIN_PEAK);
    }
}
