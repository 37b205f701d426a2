//! Command-line interface

use clap::{Parser, Subcommand};
use ringsync::SessionConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Ringsync - keep a PCM producer in step with a looped hardware buffer
#[derive(Parser, Debug)]
#[command(name = "ringsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: <data_dir>/ringsync/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Frames per second
    #[arg(long, global = true)]
    pub frame_rate: Option<u32>,

    /// Interleaved channels
    #[arg(long, global = true)]
    pub channels: Option<u16>,

    /// Looped buffer size in bytes
    #[arg(long, global = true)]
    pub buffer_bytes: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List devices of the platform backend
    #[command(name = "devices")]
    Devices,

    /// Stream a tone through the simulated device
    #[command(name = "simulate")]
    Simulate {
        /// Seconds to stream
        #[arg(short, long, default_value = "2.0", value_parser = parse_seconds)]
        seconds: Duration,

        /// Stall the producer once, halfway through, for this many milliseconds
        #[arg(long)]
        stall_ms: Option<u64>,

        /// Also run the capture side
        #[arg(long)]
        capture: bool,

        /// Print the final stats as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream a tone to the default (or configured) hardware output
    #[command(name = "play")]
    Play {
        /// Seconds to stream
        #[arg(short, long, default_value = "5.0", value_parser = parse_seconds)]
        seconds: Duration,

        /// Print the final stats as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse a non-negative, finite number of seconds
fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let seconds: f64 = arg.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("{e}"))
}

impl Cli {
    /// Load the config file and apply flag overrides
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from(path)?,
            None => SessionConfig::load(),
        };
        if let Some(rate) = self.frame_rate {
            config.frame_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(bytes) = self.buffer_bytes {
            config.bytes_per_buffer = bytes;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::parse_from([
            "ringsync",
            "simulate",
            "--seconds",
            "0.5",
            "--stall-ms",
            "120",
            "--json",
        ]);
        match cli.command {
            Commands::Simulate {
                seconds,
                stall_ms,
                capture,
                json,
            } => {
                assert_eq!(seconds, Duration::from_millis(500));
                assert_eq!(stall_ms, Some(120));
                assert!(!capture);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_negative_or_nan_seconds_rejected() {
        for bad in ["-1", "NaN", "inf", "soon"] {
            let parsed = Cli::try_parse_from(["ringsync", "play", "--seconds", bad]);
            assert!(parsed.is_err(), "{bad} should be rejected");
        }
        let cli = Cli::try_parse_from(["ringsync", "play"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Play { seconds, .. } if seconds == Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        SessionConfig {
            frame_rate: 48000,
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        let cli = Cli::parse_from([
            "ringsync",
            "--config",
            path.to_str().unwrap(),
            "--channels",
            "1",
            "devices",
        ]);
        let config = cli.session_config().unwrap();
        assert_eq!(config.frame_rate, 48000);
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        SessionConfig::default().save(&path).unwrap();

        let cli = Cli::parse_from([
            "ringsync",
            "--config",
            path.to_str().unwrap(),
            "--buffer-bytes",
            "8190",
            "devices",
        ]);
        assert!(cli.session_config().is_err());
    }
}
