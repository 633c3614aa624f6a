//! Icecast stream title updates.

use crate::config::IcecastConfig;
use crate::defaults::{IDLE_TITLE, STARTING_TITLE};
use crate::error::{NeedledropError, Result};
use crate::sinks::http_client;
use crate::sinks::sink::EventSink;
use crate::stream::event::Event;

/// Stream title for an event.
pub fn title_for(event: &Event) -> &str {
    match event {
        Event::StartedPlaying => STARTING_TITLE,
        Event::StoppedPlaying => IDLE_TITLE,
        Event::NewMetadata { title } => title,
    }
}

/// Icecast mount as an absolute path.
fn mount_path(mountpoint: &str) -> String {
    if mountpoint.starts_with('/') {
        mountpoint.to_string()
    } else {
        format!("/{}", mountpoint)
    }
}

/// Publishes the current record as the Icecast stream title through the
/// admin metadata endpoint.
///
/// The HTTP client is created on the sink thread by [`EventSink::start`].
pub struct IcecastSink {
    config: IcecastConfig,
    client: Option<reqwest::blocking::Client>,
}

impl IcecastSink {
    pub fn new(config: IcecastConfig) -> Self {
        tracing::info!(
            "Icecast updater ready for '{}:{}{}'",
            config.host,
            config.port,
            mount_path(&config.mountpoint)
        );
        Self {
            config,
            client: None,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "http://{}:{}/admin/metadata",
            self.config.host, self.config.port
        )
    }

    /// Build the metadata update request for `title`.
    pub fn build_request(
        &self,
        client: &reqwest::blocking::Client,
        title: &str,
    ) -> Result<reqwest::blocking::Request> {
        let mount = mount_path(&self.config.mountpoint);
        let url = reqwest::Url::parse_with_params(
            &self.endpoint(),
            &[("mount", mount.as_str()), ("mode", "updinfo"), ("song", title)],
        )
        .map_err(|e| NeedledropError::Http {
            message: format!("Invalid Icecast address: {}", e),
        })?;
        client
            .get(url)
            .basic_auth(&self.config.admin_user, Some(&self.config.admin_password))
            .build()
            .map_err(|e| NeedledropError::Http {
                message: format!("Failed to build Icecast request: {}", e),
            })
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        if self.client.is_none() {
            self.client = Some(http_client()?);
        }
        let Some(client) = self.client.as_ref() else {
            return Ok(());
        };

        tracing::info!("Updating Icecast title to '{}'", title);
        let request = self.build_request(client, title)?;
        let response = client.execute(request).map_err(|e| NeedledropError::Http {
            message: format!("Failed to update Icecast metadata: {}", e),
        })?;
        if !response.status().is_success() {
            return Err(NeedledropError::Http {
                message: format!("Icecast returned {}", response.status()),
            });
        }
        Ok(())
    }
}

impl EventSink for IcecastSink {
    fn start(&mut self) -> Result<()> {
        self.set_title(IDLE_TITLE)
    }

    fn handle(&mut self, event: &Event) -> Result<()> {
        self.set_title(title_for(event))
    }

    fn name(&self) -> &'static str {
        "Icecast"
    }
}
