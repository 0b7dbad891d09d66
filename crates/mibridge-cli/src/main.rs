//! `mibridge` – MIoT bridge command line interface.
//!
//! Runs the protocol core against a topology described in
//! `~/.mibridge/config.toml` (or `--config`), with one in-process loopback
//! bus per gateway:
//!
//! - `replay <CAPTURE>` feeds a JSON-lines bus capture through the gateway
//!   links and prints every report that reaches a device.
//! - `send <GATEWAY> <DID> <METHOD> <SIID:PIID[=VALUE]>...` sends a command
//!   and prints the delivery outcome and the publishes seen on each bus.
//! - `config` prints the effective configuration; `init` writes a default
//!   one.

mod capture;
mod config;
mod topology;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use mibridge_devices::{Device, DeviceDirectory, ReportHandler};
use mibridge_middleware::{Delivery, DispatchSummary, Handled};
use mibridge_types::{CommandData, CommandMethod, Did, PropertyDescriptor, Report, TOPIC_COMMAND};

#[derive(Parser)]
#[command(name = "mibridge", version, about = "MIoT report dedup and command failover bridge")]
struct Cli {
    /// Configuration file (defaults to ~/.mibridge/config.toml).
    #[arg(long, global = true, env = "MIBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines bus capture through the configured gateways.
    Replay { capture: PathBuf },
    /// Send a command to a device through a gateway.
    Send {
        gateway: String,
        did: String,
        /// `get_properties` or `set_properties`.
        method: String,
        /// Properties as `SIID:PIID` or `SIID:PIID=VALUE` (VALUE is JSON).
        #[arg(required = true)]
        props: Vec<String>,
    },
    /// Print the effective configuration.
    Config,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config::config_path);
    if let Command::Init { force } = cli.command {
        return match init(&path, force) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}: {}", "Error".red().bold(), e);
                ExitCode::FAILURE
            }
        };
    }

    let cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            warn!(path = %path.display(), "no configuration found, using defaults");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Replay { capture } => replay(&cfg, &capture),
        Command::Send {
            gateway,
            did,
            method,
            props,
        } => send(&cfg, &gateway, &did, &method, &props).await,
        Command::Config => toml::to_string_pretty(&cfg)
            .map(|raw| print!("{raw}"))
            .map_err(|e| format!("Failed to serialize config: {e}")),
        Command::Init { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Structured logging
// ─────────────────────────────────────────────────────────────────────────────

/// `RUST_LOG` selects the filter (default `"info"`); `MIBRIDGE_LOG_FORMAT=json`
/// switches to newline-delimited JSON. Logs go to stderr so report output on
/// stdout stays clean.
fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("MIBRIDGE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

fn init(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()));
    }
    config::save_to(&config::Config::default(), path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// replay
// ─────────────────────────────────────────────────────────────────────────────

fn replay(cfg: &config::Config, path: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read capture {}: {}", path.display(), e))?;
    let records = capture::parse_capture(&text)?;
    let bridge = topology::build(cfg, console_reporter())?;

    let mut total = DispatchSummary::default();
    let mut ignored = 0usize;
    for record in &records {
        let Ok(link) = bridge.link(&record.gateway) else {
            warn!(gateway = %record.gateway, "capture names an unconfigured gateway, skipping");
            continue;
        };
        let message = record.to_message();
        match link.handle_message(&message) {
            Handled::Dispatched(summary) => {
                total.delivered += summary.delivered;
                total.duplicates += summary.duplicates;
                total.unknown += summary.unknown;
            }
            Handled::Ignored(reason) => {
                ignored += 1;
                println!(
                    "  {} {} {} {}",
                    message.received_at.format("%H:%M:%S%.3f").to_string().dimmed(),
                    format!("[{}]", record.gateway).dimmed(),
                    record.topic.dimmed(),
                    format!("ignored ({reason:?})").dimmed()
                );
            }
        }
    }

    println!();
    println!(
        "  {} messages · {} deliveries · {} duplicates · {} unknown · {} ignored",
        records.len().to_string().bold(),
        total.delivered.to_string().green(),
        total.duplicates.to_string().yellow(),
        total.unknown.to_string().yellow(),
        ignored.to_string().dimmed()
    );
    for (model, count) in bridge.stats.models() {
        println!("    {} {}", model.bold(), count);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// send
// ─────────────────────────────────────────────────────────────────────────────

async fn send(
    cfg: &config::Config,
    gateway: &str,
    did: &str,
    method: &str,
    props: &[String],
) -> Result<(), String> {
    let method: CommandMethod = method.parse().map_err(|e| format!("{e}"))?;
    let data = CommandData {
        mi_spec: props
            .iter()
            .map(|p| parse_property(p))
            .collect::<Result<_, _>>()?,
    };

    let bridge = topology::build(cfg, console_reporter())?;
    let link = bridge.link(gateway)?;
    let device = bridge
        .registry
        .device(&Did::from(did))
        .ok_or_else(|| format!("unknown device '{did}'"))?;

    let mut observers: Vec<_> = bridge
        .buses
        .iter()
        .map(|(id, bus)| (id.clone(), bus.subscribe_topic(TOPIC_COMMAND)))
        .collect();
    observers.sort_by(|a, b| a.0.cmp(&b.0));

    let delivery = link
        .send(&device, method, &data)
        .await
        .map_err(|e| e.to_string())?;

    match delivery {
        Delivery::Direct => println!("  {} published on {}", "✓".green(), gateway.bold()),
        Delivery::Confirmed => println!("  {} confirmed on {}", "✓".green(), gateway.bold()),
        Delivery::FailedOver { gateway: secondary } => println!(
            "  {} no confirmation on {}, replayed on {}",
            "↻".yellow(),
            gateway.bold(),
            secondary.bold()
        ),
    }
    for (id, observer) in &mut observers {
        while let Some(message) = observer.try_recv() {
            println!(
                "    {} {} {}",
                message.received_at.format("%H:%M:%S%.3f").to_string().dimmed(),
                format!("[{id}]").dimmed(),
                String::from_utf8_lossy(&message.payload)
            );
        }
    }
    Ok(())
}

/// Parse `SIID:PIID` or `SIID:PIID=VALUE`. A VALUE that is not valid JSON is
/// sent as a string.
fn parse_property(arg: &str) -> Result<PropertyDescriptor, String> {
    let (ids, value) = match arg.split_once('=') {
        Some((ids, raw)) => {
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            (ids, Some(value))
        }
        None => (arg, None),
    };
    let (siid, piid) = ids
        .split_once(':')
        .ok_or_else(|| format!("property '{arg}' must look like SIID:PIID[=VALUE]"))?;
    let siid = siid
        .trim()
        .parse()
        .map_err(|_| format!("invalid siid in '{arg}'"))?;
    let piid = piid
        .trim()
        .parse()
        .map_err(|_| format!("invalid piid in '{arg}'"))?;
    Ok(PropertyDescriptor { siid, piid, value })
}

// ─────────────────────────────────────────────────────────────────────────────
// Report output
// ─────────────────────────────────────────────────────────────────────────────

fn console_reporter() -> Arc<dyn ReportHandler> {
    Arc::new(|device: &Device, report: Report, gateway: &str| {
        println!("{}", format_report(device, &report, gateway));
    })
}

fn format_report(device: &Device, report: &Report, gateway: &str) -> String {
    let head = format!("[{gateway}] {} ({})", device.did(), device.model());
    let body = match report {
        Report::Properties(items) => items
            .iter()
            .map(|p| match p.piid {
                Some(piid) => format!("{}.{}={}", p.siid, piid, p.value),
                None => format!("{}.?={}", p.siid, p.value),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Report::Event(e) => format!(
            "event {}.{} {}",
            e.siid,
            e.eiid,
            serde_json::Value::Array(e.arguments.clone())
        ),
    };
    format!("  {} {}", head.cyan(), body)
}
