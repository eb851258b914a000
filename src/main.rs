//! janus-publish - Janus VideoRoom publisher

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use janus_publish::media::SdpFileDriver;
use janus_publish::{PublishConfig, Publisher, PublisherEvent, Settings};

#[derive(Parser)]
#[command(name = "janus-publish")]
#[command(about = "Publish to a Janus VideoRoom")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room as publisher using a pre-generated SDP offer
    Publish {
        /// Settings file (TOML)
        #[arg(short, long, env = "JANUS_PUBLISH_CONFIG")]
        config: Option<PathBuf>,

        /// Gateway WebSocket URL (e.g., wss://janus.example.com/ws)
        #[arg(short, long)]
        url: Option<String>,

        /// Room to join
        #[arg(short, long)]
        room: Option<u64>,

        /// Your display name
        #[arg(short, long)]
        display: Option<String>,

        /// Participant id (0 lets the gateway choose)
        #[arg(long)]
        id: Option<u32>,

        /// Room PIN
        #[arg(long, env = "JANUS_ROOM_PIN")]
        pin: Option<String>,

        /// Video size, e.g. 1280x720
        #[arg(long, value_parser = parse_video_size)]
        size: Option<(u32, u32)>,

        /// File holding the SDP offer to send
        #[arg(long)]
        offer_sdp: PathBuf,

        /// Write the gateway's SDP answer to this file
        #[arg(long)]
        answer_out: Option<PathBuf>,

        /// Stay published for this many seconds (default: until Ctrl+C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Validate a settings file
    CheckConfig {
        /// Settings file (TOML)
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Publish {
            config,
            url,
            room,
            display,
            id,
            pin,
            size,
            offer_sdp,
            answer_out,
            duration,
        } => {
            let mut settings = match config {
                Some(path) => load_settings(&path)?,
                None => Settings::default(),
            };
            let publish = merge_publish_config(
                settings.publish.take(),
                PublishOverrides {
                    url,
                    room,
                    display,
                    id,
                    pin,
                    size,
                },
            )?;
            run_publish(settings, publish, &offer_sdp, answer_out, duration).await?;
        }
        Commands::CheckConfig { path } => {
            check_config(&path)?;
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    // RUST_LOG takes precedence over --verbose
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to set tracing subscriber")?;
        return Ok(());
    }

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Command line values that override the settings file
struct PublishOverrides {
    url: Option<String>,
    room: Option<u64>,
    display: Option<String>,
    id: Option<u32>,
    pin: Option<String>,
    size: Option<(u32, u32)>,
}

fn parse_video_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", value))?;
    let width = width.parse().map_err(|e| format!("bad width: {}", e))?;
    let height = height.parse().map_err(|e| format!("bad height: {}", e))?;
    Ok((width, height))
}

fn merge_publish_config(
    base: Option<PublishConfig>,
    overrides: PublishOverrides,
) -> Result<PublishConfig> {
    let mut config = match (base, &overrides.url, overrides.room) {
        (Some(config), _, _) => config,
        (None, Some(url), Some(room)) => PublishConfig::new(url.clone(), room, "janus-publish"),
        (None, _, _) => bail!("--url and --room are required without a [publish] section"),
    };

    if let Some(url) = overrides.url {
        config.url = url;
    }
    if let Some(room) = overrides.room {
        config.room = room;
    }
    if let Some(display) = overrides.display {
        config.display = display;
    }
    if let Some(id) = overrides.id {
        config.id = id;
    }
    if overrides.pin.is_some() {
        config.pin = overrides.pin;
    }
    if let Some((width, height)) = overrides.size {
        config = config.with_video_size(width, height);
    }

    config.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;

    println!("Configuration OK: {}", path.display());
    match &settings.publish {
        Some(publish) => {
            println!("  Gateway:   {}", publish.url);
            println!("  Room:      {}", publish.room);
            println!("  Display:   {}", publish.display);
            println!("  Video:     {}x{}", publish.width, publish.height);
            println!(
                "  PIN:       {}",
                if publish.pin.is_some() { "set" } else { "none" }
            );
        }
        None => println!("  No [publish] section"),
    }
    println!(
        "  Keepalive: {} ms",
        settings.connection.keepalive_interval_ms
    );
    println!(
        "  Bitrate:   {}-{} bps",
        settings.connection.video_bitrate.min_bps, settings.connection.video_bitrate.max_bps
    );
    println!("  ICE servers: {}", settings.media.ice_servers.len());
    Ok(())
}

async fn run_publish(
    settings: Settings,
    config: PublishConfig,
    offer_sdp: &Path,
    answer_out: Option<PathBuf>,
    duration: Option<u64>,
) -> Result<()> {
    let mut driver = SdpFileDriver::from_file(offer_sdp, settings.media.clone())
        .with_context(|| format!("Failed to load offer from {}", offer_sdp.display()))?;
    if let Some(path) = answer_out {
        driver = driver.with_answer_output(path);
    }

    let publisher = Publisher::spawn(settings.connection.clone(), Box::new(driver));
    let mut events = publisher.subscribe();

    info!(
        "Publishing to room {} on {} as {}",
        config.room, config.url, config.display
    );
    publisher.publish(config);

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut failure = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = &mut deadline => {
                info!("Duration elapsed, unpublishing");
                break;
            }
            event = events.recv() => match event {
                Ok(PublisherEvent::Published) => info!("Published, press Ctrl+C to stop"),
                Ok(PublisherEvent::Hangup { reason }) => {
                    warn!("Gateway hung up: {}", reason);
                    break;
                }
                Ok(PublisherEvent::PublishFailed { reason }) => {
                    failure = Some(reason);
                    break;
                }
                Ok(event) => info!("{:?}", event),
                Err(RecvError::Lagged(n)) => warn!("Missed {} publisher events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    publisher.shutdown().await;

    match failure {
        Some(reason) => bail!("Publish failed: {}", reason),
        None => Ok(()),
    }
}
