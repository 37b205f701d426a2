//! Ringsync - looped hardware buffer streaming tool
//!
//! Entry point for the command-line interface.

mod cli;

use anyhow::{bail, Result};
use clap::Parser;
use cli::{Cli, Commands};
use ringsync::backend::sim::{SimConfig, SimulatedBackend};
use ringsync::stream::{self, StreamOptions};
use ringsync::{Backend, Clock, DeviceSession, MonotonicClock, SessionConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const TONE_HZ: f32 = 440.0;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "ringsync=debug"
    } else {
        "ringsync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    let config = cli.session_config()?;

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Simulate {
            seconds,
            stall_ms,
            capture,
            json,
        } => {
            let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
            let backend = Backend::new(SimulatedBackend::new(clock.clone(), SimConfig::default()));
            let options = StreamOptions {
                duration: seconds,
                poll_interval: config.poll_interval(),
                stall: stall_ms.map(Duration::from_millis),
                tone_hz: TONE_HZ,
            };
            let config = SessionConfig {
                enable_input: capture || config.enable_input,
                ..config
            };
            stream_with(backend, clock, &config, &options, json)
        }
        Commands::Play { seconds, json } => {
            let backend = Backend::resolve_default();
            if let Backend::Unavailable { reason } = &backend {
                bail!("No hardware backend: {}", reason);
            }
            let options = StreamOptions {
                duration: seconds,
                poll_interval: config.poll_interval(),
                stall: None,
                tone_hz: TONE_HZ,
            };
            stream_with(backend, Arc::new(MonotonicClock::new()), &config, &options, json)
        }
    }
}

fn list_devices() -> Result<()> {
    let backend = Backend::resolve_default();
    println!("Backend: {}", backend.name());
    println!();

    match backend.list_devices() {
        Ok(devices) if devices.is_empty() => println!("No devices found."),
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            println!();
            for (i, device) in devices.iter().enumerate() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}. {}{}", i + 1, device.name, default_marker);
                println!(
                    "     Channels: {} in, {} out",
                    device.input_channels, device.output_channels
                );
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
            if let Backend::Unavailable { reason } = &backend {
                println!("({})", reason);
            }
        }
    }
    Ok(())
}

fn stream_with(
    backend: Backend,
    clock: Arc<dyn Clock>,
    config: &SessionConfig,
    options: &StreamOptions,
    json: bool,
) -> Result<()> {
    let mut session = DeviceSession::new(backend, clock);
    session.init_output_device(config.output_device.as_deref())?;
    session.init_output_buffer(config.frame_rate, config.channels, config.bytes_per_buffer)?;
    if config.enable_input {
        session.init_input_device(config.input_device.as_deref())?;
        session.init_input_buffer(config.frame_rate, config.channels, config.bytes_per_buffer)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    info!(
        backend = session.backend().name(),
        frame_rate = config.frame_rate,
        channels = config.channels,
        bytes_per_buffer = config.bytes_per_buffer,
        poll_ms = options.poll_interval.as_millis() as u64,
        "Streaming, press Ctrl+C to stop"
    );
    let report = stream::run(&mut session, options, &running)?;
    let stats = session.stats();
    session.term();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats);
        println!(
            "  {} polls, {} bytes written, {} bytes read, {} lock retries",
            report.polls, report.bytes_written, report.bytes_read, report.lock_retries
        );
    }
    Ok(())
}
