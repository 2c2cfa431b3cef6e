// blemidi — BLE-MIDI desktop CLI
//
// Cross-platform (macOS, Linux, Windows) command-line front end for the
// BLE-MIDI central: find peripherals, print incoming MIDI, send MIDI bytes.

mod config;
mod platform;

use anyhow::{Context, Result};
use blemidi_core::{
    BleMidiCentral, DeviceStatus, GattCallbackHandler, MidiDevice, MidiOutputDevice, PeerIdentity,
};
use clap::{Parser, Subcommand};
use colored::*;
use platform::BtleplugPlatform;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "blemidi")]
#[command(about = "BLE-MIDI central for the command line", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby BLE peripherals
    Scan {
        /// Scan duration in milliseconds (0 = until Ctrl-C)
        #[arg(short, long)]
        timeout_ms: Option<i64>,
    },
    /// Connect and print incoming MIDI
    Listen {
        /// Peer address; without one the first peer found is tried
        #[arg(short, long)]
        address: Option<String>,
        #[arg(short, long)]
        timeout_ms: Option<i64>,
    },
    /// Connect and send MIDI bytes given as hex, e.g. 903c7f
    Send {
        #[arg(short, long)]
        address: String,
        hex: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

/// Everything the central reports, funneled onto the command's task
enum UiEvent {
    ScanStatus(bool),
    Found(PeerIdentity),
    Attached(MidiDevice),
    Detached(MidiDevice),
    Status(PeerIdentity, DeviceStatus),
    Data(String, Vec<u8>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Scan { timeout_ms } => cmd_scan(timeout_ms).await,
        Commands::Listen {
            address,
            timeout_ms,
        } => cmd_listen(address, timeout_ms).await,
        Commands::Send { address, hex } => cmd_send(address, hex).await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

/// Open the adapter, build the central and route its events into a channel
async fn start_central(
    config: &config::Config,
) -> Result<(Arc<BleMidiCentral>, Arc<BtleplugPlatform>, mpsc::UnboundedReceiver<UiEvent>)> {
    let platform = BtleplugPlatform::new().await?;
    let central = Arc::new(
        BleMidiCentral::with_runtime(
            platform.clone(),
            config.central.clone(),
            tokio::runtime::Handle::current(),
        )
        .context("Bluetooth LE is not available")?,
    );

    let handler: Arc<dyn GattCallbackHandler> = central.clone();
    platform.bind(Arc::downgrade(&handler))?;

    let (tx, rx) = mpsc::unbounded_channel();

    let sender = tx.clone();
    central.set_on_scan_status(Some(Arc::new(move |scanning: bool| {
        let _ = sender.send(UiEvent::ScanStatus(scanning));
    })));
    let sender = tx.clone();
    central.set_on_device_found(Some(Arc::new(move |peer: &PeerIdentity| {
        let _ = sender.send(UiEvent::Found(peer.clone()));
    })));
    let sender = tx.clone();
    central.set_on_attached(Some(Arc::new(move |device: &MidiDevice| {
        let _ = sender.send(UiEvent::Attached(device.clone()));
    })));
    let sender = tx.clone();
    central.set_on_detached(Some(Arc::new(move |device: &MidiDevice| {
        let _ = sender.send(UiEvent::Detached(device.clone()));
    })));
    let sender = tx.clone();
    central.set_on_status(Some(Arc::new(move |peer: &PeerIdentity, status: DeviceStatus| {
        let _ = sender.send(UiEvent::Status(peer.clone(), status));
    })));
    central.set_on_data(Some(Arc::new(move |device: &blemidi_core::MidiInputDevice, data: &[u8]| {
        let _ = tx.send(UiEvent::Data(device.display_name().to_string(), data.to_vec()));
    })));

    Ok((central, platform, rx))
}

async fn cmd_scan(timeout_ms: Option<i64>) -> Result<()> {
    let config = config::Config::load()?;
    let timeout_ms = timeout_ms.unwrap_or(config.scan_timeout_ms);
    let (central, _platform, mut events) = start_central(&config).await?;

    println!("{}", "Scanning for BLE peripherals...".bold());
    central.start_scan(timeout_ms)?;

    let mut seen = std::collections::HashSet::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(UiEvent::Found(peer)) => {
                    if seen.insert(peer.address().to_string()) {
                        println!(
                            "  {} {:<40} {}",
                            "•".bright_cyan(),
                            peer.address(),
                            peer.name().unwrap_or("(unnamed)")
                        );
                    }
                }
                Some(UiEvent::ScanStatus(false)) | None => break,
                Some(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                central.stop_scan();
                break;
            }
        }
    }

    println!();
    println!("{} Found {} peripheral(s)", "✓".green(), seen.len());
    central.terminate();
    Ok(())
}

async fn cmd_listen(address: Option<String>, timeout_ms: Option<i64>) -> Result<()> {
    let config = config::Config::load()?;
    let timeout_ms = timeout_ms.unwrap_or(config.scan_timeout_ms);
    let (central, _platform, mut events) = start_central(&config).await?;

    if address.is_none() {
        central.set_auto_connect(true);
    }

    println!("{}", "Waiting for BLE-MIDI peripherals (Ctrl-C to quit)".bold());
    central.start_scan(timeout_ms)?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    UiEvent::Found(peer) => {
                        if address.as_deref() == Some(peer.address()) && !central.is_connected(peer.address()) {
                            println!("  Connecting to {}", peer.to_string().bright_cyan());
                            central.stop_scan();
                            central.connect(&peer);
                        }
                    }
                    UiEvent::Attached(device) => {
                        println!("{} Attached {} ({})", "✓".green(), device.display_name(), direction(&device));
                    }
                    UiEvent::Detached(device) => {
                        println!("{} Detached {} ({})", "✗".red(), device.display_name(), direction(&device));
                    }
                    UiEvent::Status(peer, status) => print_status(&peer, status),
                    UiEvent::Data(name, data) => {
                        println!("  {} {}", name.bright_cyan(), hex::encode(&data));
                    }
                    UiEvent::ScanStatus(scanning) => {
                        if !scanning && central.input_devices().is_empty() {
                            println!("  {}", "Scan finished".dimmed());
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    central.terminate();
    Ok(())
}

async fn cmd_send(address: String, payload: String) -> Result<()> {
    let midi = hex::decode(payload.trim()).context("MIDI bytes must be hex")?;
    if midi.is_empty() {
        anyhow::bail!("Nothing to send");
    }

    let config = config::Config::load()?;
    let timeout = match config.scan_timeout_ms {
        ms if ms > 0 => Duration::from_millis(ms as u64),
        _ => Duration::from_secs(30),
    };
    let (central, _platform, mut events) = start_central(&config).await?;
    central.start_scan(0)?;

    let output = tokio::time::timeout(timeout, wait_for_output(&central, &address, &mut events))
        .await
        .with_context(|| format!("No BLE-MIDI output on {} within {:?}", address, timeout))??;

    let sent = output.send(&midi);
    // Give queued writes a moment to drain before the link is torn down
    tokio::time::sleep(Duration::from_millis(200)).await;
    central.terminate();

    if sent {
        println!("{} Sent {} byte(s) to {}", "✓".green(), midi.len(), output.display_name());
        Ok(())
    } else {
        anyhow::bail!("Write to {} failed", output.display_name())
    }
}

async fn wait_for_output(
    central: &BleMidiCentral,
    address: &str,
    events: &mut mpsc::UnboundedReceiver<UiEvent>,
) -> Result<Arc<MidiOutputDevice>> {
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::Found(peer) if peer.address() == address && !central.is_connected(address) => {
                central.stop_scan();
                central.connect(&peer);
            }
            UiEvent::Attached(MidiDevice::Output(output)) if output.peer().address() == address => {
                return Ok(output);
            }
            UiEvent::Status(peer, status) if peer.address() == address && status.is_terminal() => {
                anyhow::bail!("{}: {:?}", peer, status);
            }
            _ => {}
        }
    }
    anyhow::bail!("Central stopped")
}

fn direction(device: &MidiDevice) -> &'static str {
    match device {
        MidiDevice::Input(_) => "input",
        MidiDevice::Output(_) => "output",
    }
}

fn print_status(peer: &PeerIdentity, status: DeviceStatus) {
    let label = format!("{:?}", status);
    let label = if status.is_terminal() {
        label.red()
    } else {
        label.yellow()
    };
    println!("  {} {}", peer.to_string().bright_cyan(), label);
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<28} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "  {}",
                config::Config::config_file()?.display().to_string().dimmed()
            );
        }
    }

    Ok(())
}
