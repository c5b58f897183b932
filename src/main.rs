//! Binary entrypoint for pycastblaster.
//!
//! Wires the signal set, configuration, Temp-Artifact Registry, Playlist Server, Device
//! Session Supervisor, Image Scanner, and HTTP surface together as Tokio tasks. Delegates all
//! behaviour to the library crate.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use pycastblaster::artifacts::{self, ArtifactRegistry};
use pycastblaster::device::fake::{FakeDeviceConnector, FakeDeviceState};
use pycastblaster::device::supervisor::Supervisor;
use pycastblaster::device::DiscoveryEvent;
use pycastblaster::playlist::Playlist;
use pycastblaster::processing::Processor;
use pycastblaster::scanner::Scanner;
use pycastblaster::server::PlaylistServer;
use pycastblaster::signals::Signals;
use pycastblaster::web;

const STATIC_INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Debug, Parser)]
#[command(name = "pycastblaster", about = "Shuffled slideshow server for a Chromecast-compatible receiver")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pycastblaster={level}").parse().unwrap());
    fmt().with_env_filter(filter).with_target(true).init();
}

/// Best-effort LAN address, matching the source tool's UDP-connect trick: connecting a UDP
/// socket never sends a packet, so this works even without internet access, and falls back to
/// loopback if the machine has no route at all.
fn local_ip() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:1")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = pycastblaster::config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    config.validate().context("validating configuration")?;

    std::fs::create_dir_all(&config.temp_path)
        .with_context(|| format!("creating temp directory {}", config.temp_path.display()))?;
    std::fs::write(config.temp_path.join("index.html"), STATIC_INDEX_HTML)
        .context("writing static control UI")?;

    let manifest_path = config.manifest_path();
    artifacts::purge_all_from_manifest(&manifest_path, &config.temp_path)
        .context("purging stale temp artifacts from a previous run")?;
    let registry = ArtifactRegistry::open(&config.temp_path, &manifest_path)
        .context("opening temp artifact manifest")?;

    let bind_ip = local_ip();
    let base_url = format!("http://{bind_ip}:{}", config.http_server_port);
    info!(%base_url, "resolved LAN base URL for cast playback");

    let signals = Signals::new(config.slideshow_duration_seconds);

    // No real mDNS/CAST backend is vendored (out of scope); the fake connector stands in at the
    // `DeviceConnector` trait boundary where a production backend would plug in. A real
    // implementation would push `DiscoveryEvent`s as devices actually appear/disappear on the
    // LAN; here a single matching Added event is synthesized at startup.
    let device_state = FakeDeviceState::new();
    let connector = Arc::new(FakeDeviceConnector::new(device_state));
    let supervisor = Arc::new(Supervisor::new(
        connector,
        config.chromecast_name.clone(),
        signals.clone(),
        Duration::from_secs(config.interruption_idle_seconds),
    ));

    let discovery_task = {
        let supervisor = supervisor.clone();
        let chromecast_name = config.chromecast_name.clone();
        tokio::spawn(async move {
            supervisor
                .handle_discovery_event(DiscoveryEvent::Added {
                    friendly_name: chromecast_name,
                })
                .await;
        })
    };

    let idle_watcher_task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run_idle_watcher().await })
    };

    let (inbox_tx, inbox_rx) = mpsc::channel(1);

    let (playlist_server, state_rx) = PlaylistServer::new(
        Playlist::new(),
        registry,
        Processor::new(config.max_image_height_pixels),
        supervisor.clone(),
        signals.clone(),
        inbox_rx,
        config.images_path.clone(),
        base_url,
        config.chromecast_name.clone(),
    );
    let server_task = tokio::spawn(playlist_server.run());

    let scanner_task = {
        let images_path = config.images_path.clone();
        let temp_path = config.temp_path.clone();
        let frequency = Duration::from_secs(config.scanning_frequency_seconds());
        let exit_token = signals.exit_token();
        tokio::spawn(async move {
            let mut scanner = Scanner::new(images_path, temp_path, frequency);
            scanner.run(inbox_tx, exit_token).await;
        })
    };

    let app_state = web::AppState {
        state_rx,
        signals: signals.clone(),
        config: Arc::new(Mutex::new(config.clone())),
        config_path: cli.config.clone(),
        images_path: config.images_path.clone(),
        temp_path: config.temp_path.clone(),
    };
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.http_server_port);

    if let Err(err) = web::serve(bind_addr, app_state, signals.exit_token()).await {
        error!(error = %err, %bind_addr, "failed to bind HTTP surface, shutting down");
        signals.request_exit();
    }

    signals.request_exit();
    let _ = tokio::join!(discovery_task, idle_watcher_task, server_task, scanner_task);

    if signals.reload_requested() {
        info!("reload requested; exiting process so a supervisor can restart it");
    }

    Ok(())
}
