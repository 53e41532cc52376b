mod cache;
mod capture;
mod config;
mod lorawan;
mod script;
mod udp;
mod workbench;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capture::export::ExportFormat;
use capture::generate::{generate_lines, GenerateParams};
use lorawan::keys::KeyStore;
use workbench::{CaptureSource, Workbench};

#[derive(Parser)]
#[command(name = "lora-capture")]
#[command(about = "Decode, scan and replay LoRaWAN gateway capture logs")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Session key file (overrides `lorawan.keys_file`)
    #[arg(short, long)]
    keys: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize gateways and devices in a capture without decrypting
    Scan { file: PathBuf },

    /// Decrypt and optionally decode every record in a capture
    Decode {
        file: PathBuf,
        /// JavaScript decoder exposing decodeUplink(input) or Decoder(bytes, fPort)
        #[arg(short, long)]
        decoder: Option<PathBuf>,
        /// Only decode these DevAddrs (repeatable)
        #[arg(long = "devaddr")]
        devaddrs: Vec<String>,
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// Write the export here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Send each record to a UDP listener as a PUSH_DATA datagram
    Replay {
        file: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 1700)]
        port: u16,
    },

    /// Write a synthetic capture log for one device
    Generate {
        #[arg(long)]
        gateway_eui: String,
        #[arg(long)]
        devaddr: String,
        #[arg(long, default_value_t = 10)]
        frames: u32,
        #[arg(long, default_value_t = 60)]
        interval_seconds: i64,
        /// RFC 3339 start time (defaults to now)
        #[arg(long)]
        start_time: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 868.1)]
        frequency_mhz: f64,
        #[arg(long, default_value = "SF7BW125")]
        datarate: String,
        #[arg(long, default_value = "4/5")]
        coding_rate: String,
        #[arg(long)]
        payload_hex: Option<String>,
        #[arg(long, default_value_t = 1)]
        fport: u8,
        /// Encrypt payloads with this device's keys from the key store
        #[arg(long)]
        encrypt: bool,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Listen for GWMP datagrams, acknowledge and log them
    Listen {
        #[arg(long, default_value = "0.0.0.0:1700")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if cli.config.exists() {
        config::Config::load(&cli.config)?
    } else {
        eprintln!("Warning: config file {:?} not found, using defaults", cli.config);
        config::Config::default()
    };

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("lora-capture v{}", env!("CARGO_PKG_VERSION"));

    let keys = load_keys(cli.keys.as_deref().or(config.lorawan.keys_file.as_deref()))?;
    let bench = Workbench::new(&config, keys.clone())?;

    match cli.command {
        Command::Scan { file } => {
            let ticket = bench.scan_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }
        Command::Decode {
            file,
            decoder,
            devaddrs,
            format,
            out,
        } => {
            let decoder_source = decoder
                .map(|path| {
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read decoder {:?}", path))
                })
                .transpose()?;

            let scan = bench.scan_file(&file)?;
            let decoded = bench.decode(
                CaptureSource::ScanToken(&scan.token),
                decoder_source.as_deref(),
                &devaddrs,
            )?;
            info!("Decode token {} valid until {}", decoded.token, decoded.expires_at);

            let exported = bench.export(&decoded.token, format)?;
            write_output(out.as_deref(), &exported)?;
        }
        Command::Replay { file, host, port } => {
            let rows = bench.replay(CaptureSource::File(&file), &host, port).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Generate {
            gateway_eui,
            devaddr,
            frames,
            interval_seconds,
            start_time,
            frequency_mhz,
            datarate,
            coding_rate,
            payload_hex,
            fport,
            encrypt,
            out,
        } => {
            let session = if encrypt {
                Some(
                    keys.get(&devaddr)
                        .cloned()
                        .with_context(|| format!("No session keys for DevAddr {}", devaddr))?,
                )
            } else {
                None
            };
            let params = GenerateParams {
                gateway_eui,
                devaddr,
                frames,
                interval_seconds,
                start_time: start_time.unwrap_or_else(Utc::now),
                frequency_mhz,
                datarate,
                coding_rate,
                payload_hex,
                f_port: fport,
                keys: session,
            };
            let mut text = generate_lines(&params)?.join("\n");
            text.push('\n');
            write_output(out.as_deref(), &text)?;
        }
        Command::Listen { bind } => {
            tokio::select! {
                result = udp::run_sink(&bind) => result?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
            }
        }
    }

    Ok(())
}

fn load_keys(path: Option<&Path>) -> anyhow::Result<KeyStore> {
    match path {
        Some(path) => {
            let store = KeyStore::load(path)?;
            if store.is_empty() {
                warn!("Key file {:?} lists no devices", path);
            } else {
                info!("Loaded session keys for {} device(s)", store.len());
            }
            Ok(store)
        }
        None => {
            warn!("No key file configured; decode will report missing device credentials");
            Ok(KeyStore::new())
        }
    }
}

fn write_output(out: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {:?}", path)),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}
