//! opendash server
//!
//! Receives racing-simulator telemetry over UDP and forwards every sample to
//! USB dashboard hardware and to browser viewers over WebSocket.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::config::{self, DeviceKind, ServerConfig};
use server::dispatcher::{Dispatcher, spawn_receiver};
use server::hid::{DebugFactory, HidBackend, RevLightFactory};
use server::hotplug::{BackendKind, HotplugBridge, HotplugHandle, select_backend};
use server::network::{ConnectionPool, WebSocketServer};
use server::registry::{DeviceRegistry, SinkFactory};
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "opendash")]
#[command(
    author,
    version,
    about = "opendash - racing telemetry to USB dashboards and browsers"
)]
#[command(long_about = "
Listens for Codemasters-format telemetry datagrams and drives USB HID
dashboard devices (shift lights) and WebSocket viewers from every sample.
Devices may be plugged and unplugged while the server runs.

EXAMPLES:
    # Run with default config
    opendash

    # Run with custom config
    opendash --config /path/to/config.toml

    # List HID interfaces without starting the server
    opendash --list-devices

    # Run with debug logging
    opendash --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/opendash/server.toml
    3. /etc/opendash/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List HID interfaces and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Telemetry listen address (overrides config)
    #[arg(long, value_name = "HOST:PORT")]
    udp_addr: Option<String>,

    /// WebSocket listen address (overrides config)
    #[arg(long, value_name = "HOST:PORT")]
    ws_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    if let Some(addr) = args.udp_addr {
        config.server.udp_addr = addr;
    }
    if let Some(addr) = args.ws_addr {
        config.server.ws_addr = addr;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;

    info!("opendash Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.server.log_level);

    let backend = Arc::new(HidBackend::new().context("Failed to initialize HID API")?);

    if args.list_devices {
        return list_devices_mode(&backend);
    }

    run(config, backend).await
}

/// Print every HID interface and exit
fn list_devices_mode(backend: &HidBackend) -> Result<()> {
    let devices = backend
        .list_devices()
        .context("Failed to enumerate HID devices")?;

    if devices.is_empty() {
        println!("No HID devices found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<8} {:<12} {:<8} {:<20} Product",
        "VID", "PID", "Usage Page", "Usage", "Manufacturer"
    );
    println!("{}", "-".repeat(80));
    for device in devices {
        let d = device.descriptor;
        println!(
            "{:<8} {:<8} {:<12} {:<8} {:<20} {}",
            format!("0x{:04x}", d.vendor_id),
            format!("0x{:04x}", d.product_id),
            format!("0x{:04x}", d.usage_page),
            format!("0x{:04x}", d.usage),
            device.manufacturer.as_deref().unwrap_or("(unknown)"),
            device.product.as_deref().unwrap_or("(unknown)"),
        );
    }
    Ok(())
}

/// Register every configured sink with its factory
fn register_devices(
    registry: &DeviceRegistry,
    config: &ServerConfig,
    backend: &Arc<HidBackend>,
) -> Result<()> {
    for device in &config.devices {
        let descriptor = device.descriptor()?;
        let factory: Box<dyn SinkFactory> = match device.kind {
            DeviceKind::RevLights => Box::new(RevLightFactory::new(
                Arc::clone(backend),
                device.led_thresholds()?,
            )),
            DeviceKind::Debug => Box::new(DebugFactory::new(Arc::clone(backend))),
        };

        if let Err(e) = registry.register_descriptor(descriptor, factory) {
            warn!("Ignoring device entry: {}", e);
        }
    }
    Ok(())
}

/// Start the configured hot-plug backend, falling back to polling
fn start_hotplug(
    config: &ServerConfig,
    backend: &Arc<HidBackend>,
    bridge: Arc<HotplugBridge>,
) -> Result<HotplugHandle> {
    let options = config.hotplug.options();
    let preferred = select_backend(config.hotplug.backend, backend.clone(), options)
        .and_then(|source| source.start(bridge.clone()));

    match preferred {
        Ok(handle) => Ok(handle),
        Err(e) if config.hotplug.backend == BackendKind::Auto => {
            warn!("USB hot-plug failed to start ({}), falling back to polling", e);
            let source = select_backend(BackendKind::Poll, backend.clone(), options)?;
            Ok(source.start(bridge)?)
        }
        Err(e) => Err(e).context("Failed to start hot-plug backend"),
    }
}

async fn run(config: ServerConfig, backend: Arc<HidBackend>) -> Result<()> {
    let registry = Arc::new(DeviceRegistry::new());
    register_devices(&registry, &config, &backend)?;

    let bridge = Arc::new(HotplugBridge::new(Arc::clone(&registry), backend.clone()));
    let hotplug = start_hotplug(&config, &backend, bridge.clone())?;
    // After the backend is listening, so no arrival falls between the two
    bridge.prime();
    info!(
        "Hot-plug backend: {} ({} of {} sinks connected)",
        hotplug.name(),
        registry.connected_count(),
        registry.len()
    );

    let pool = Arc::new(ConnectionPool::new());
    let running = Arc::new(AtomicBool::new(true));

    let udp_addr = config.udp_addr()?;
    let socket = UdpSocket::bind(udp_addr)
        .with_context(|| format!("Failed to bind telemetry socket on {}", udp_addr))?;
    let receiver = spawn_receiver(
        socket,
        Dispatcher::new(Arc::clone(&registry), Arc::clone(&pool)),
        Arc::clone(&running),
    )
    .context("Failed to spawn telemetry receiver")?;
    let mut receiver = tokio::task::spawn_blocking(move || receiver.join());

    let ws = WebSocketServer::bind(
        config.ws_addr()?,
        Arc::clone(&pool),
        config.websocket.queue_depth,
    )
    .await?;
    let ws_task = tokio::spawn(ws.run(Arc::clone(&running)));

    info!("Server running. Press Ctrl+C to stop.");

    let mut result = Ok(());
    let mut receiver_joined = false;
    tokio::select! {
        signal = signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down...");
        }
        joined = &mut receiver => {
            // The receive loop only returns early on a fatal socket error
            receiver_joined = true;
            result = match joined {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(e).context("Telemetry receiver failed"),
                Ok(Err(_)) => Err(anyhow::anyhow!("Telemetry receiver panicked")),
                Err(e) => Err(e).context("Failed to join telemetry receiver"),
            };
        }
    }

    running.store(false, Ordering::SeqCst);
    hotplug.shutdown();

    if !receiver_joined {
        match receiver.await {
            Ok(Ok(Err(e))) => error!("Telemetry receiver error: {}", e),
            Ok(Err(_)) => error!("Telemetry receiver panicked"),
            Err(e) => error!("Failed to join telemetry receiver: {}", e),
            Ok(Ok(Ok(()))) => {}
        }
    }

    match ws_task.await {
        Ok(Err(e)) => error!("WebSocket server error: {:#}", e),
        Err(e) => error!("WebSocket server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let closed = registry.close_all();
    for status in registry.status() {
        info!(
            "{} {}: {:?} ({} failed sends)",
            status.label, status.descriptor, status.state, status.consecutive_failures
        );
    }
    info!("Closed {} sinks, server stopped", closed);

    result
}
