use anyhow::Result;
use clap::{CommandFactory, Parser};
use needledrop::app::{self, RunOptions};
use needledrop::cli::{Cli, Commands, ConfigAction};
use needledrop::config::Config;
use needledrop::logging;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    match cli.command.take() {
        None => run_monitor(cli).await?,
        Some(Commands::Devices) => {
            logging::init(cli.verbose, cli.quiet, false);
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            logging::init(cli.verbose, cli.quiet, false);
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "needledrop",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Run the monitor until Ctrl-C, the end of file input, or `--stop-after`.
async fn run_monitor(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.audio.device = device;
    }
    if let Some(output_device) = cli.output_device {
        config.audio.output_device = Some(output_device);
    }
    if let Some(input) = cli.input {
        config.audio.input = Some(input);
    }
    if let Some(threshold) = cli.threshold {
        config.stream.silence_threshold = threshold;
    }

    logging::init(cli.verbose, cli.quiet, config.debug);
    tracing::info!("needledrop {}", needledrop::version_string());

    #[cfg(feature = "cpal-audio")]
    needledrop::audio::capture::suppress_audio_warnings();

    // Device and HTTP setup block; keep it off the runtime threads.
    let handle =
        tokio::task::spawn_blocking(move || app::run(config, RunOptions::default())).await??;

    let source_done = handle.source_done();
    let source_done = tokio::task::spawn_blocking(move || {
        source_done.recv().ok();
    });
    let limit = cli.stop_after;
    let stop_after = async move {
        match limit {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    let drain = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            false
        }
        _ = source_done => {
            tracing::info!("Audio input ended");
            true
        }
        _ = stop_after => {
            tracing::info!("Stop time reached, shutting down");
            false
        }
    };

    let summary = tokio::task::spawn_blocking(move || {
        if drain {
            handle.join()
        } else {
            handle.stop()
        }
    })
    .await?;

    tracing::info!(
        fragments = summary.fragments,
        state = ?summary.final_state,
        played = ?summary.played,
        "Stopped"
    );
    Ok(())
}

fn config_path(custom_path: Option<&Path>) -> PathBuf {
    custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        // An explicit path must exist
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = needledrop::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("built without audio device support")
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path(custom_path).display());
        }
    }
    Ok(())
}
