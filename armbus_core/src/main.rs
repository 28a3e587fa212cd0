//! # armbus exercise harness
//!
//! Loads an arm configuration and drives motion plans against the
//! built-in simulation bus: a dry run of the exact command sequence the
//! arm would receive, with no hardware attached. Real transports
//! implement [`armbus_core::ServoBus`] out of tree.
//!
//! # Usage
//!
//! ```bash
//! # Positions and telemetry of every configured axis
//! armbus --config config/arm.toml status
//!
//! # Synchronized move, releasing torque on arrival
//! armbus move base_yaw=700 shoulder=500 --velocity 300 --release
//!
//! # Run a configured pose
//! armbus pose rest
//!
//! # Verbose logging
//! armbus -v status
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use armbus_common::config::load_config;
use armbus_common::consts::HOME_MID;
use armbus_common::units::Unit;
use armbus_core::axis::Telemetry;
use armbus_core::manager::ArmManager;
use armbus_core::sim::SimBus;

/// armbus: synchronized bus-servo arm motion, dry-run harness
#[derive(Parser, Debug)]
#[command(name = "armbus")]
#[command(version)]
#[command(about = "Synchronized multi-axis servo motion against the simulation bus")]
struct Args {
    /// Path to the arm configuration TOML.
    #[arg(long, default_value = "config/arm.toml")]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print position and telemetry of every configured axis.
    Status,
    /// Synchronized move of every axis to mid position, torque held.
    Home,
    /// Synchronized move to explicit targets, e.g. `base_yaw=700`.
    Move {
        /// Targets as name=pulse pairs.
        #[arg(required = true, value_parser = parse_target)]
        targets: Vec<(String, u16)>,

        /// Shared velocity [pulses/s]; defaults to the configured
        /// angular velocity.
        #[arg(long)]
        velocity: Option<f64>,

        /// Release torque after arrival instead of holding.
        #[arg(long)]
        release: bool,
    },
    /// Run a pose from the configuration.
    Pose {
        /// Pose name.
        name: String,

        /// Release torque after arrival instead of holding.
        #[arg(long)]
        release: bool,
    },
    /// Halt every servo in place.
    Stop,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "armbus v{} starting (simulation bus)...",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_config(&args.config)?;
    let bus = Arc::new(SimBus::new(config.axes.iter().map(|a| a.id)));
    let manager = ArmManager::from_config(&config, bus)?;

    match &args.command {
        Command::Status => print_status(&manager, args.json)?,
        Command::Home => {
            let targets: BTreeMap<String, u16> = manager
                .names()
                .map(|n| (n.to_string(), HOME_MID))
                .collect();
            manager.synchronized_move(&targets, None, true)?;
            info!("homed {} axes", targets.len());
        }
        Command::Move {
            targets,
            velocity,
            release,
        } => {
            let targets: BTreeMap<String, u16> = targets.iter().cloned().collect();
            manager.synchronized_move(&targets, *velocity, !release)?;
            manager.print_positions(Unit::Pulses);
        }
        Command::Pose { name, release } => {
            manager.move_to_pose(name, !release)?;
            manager.print_positions(Unit::Pulses);
        }
        Command::Stop => {
            manager.stop_all();
        }
    }

    Ok(())
}

/// One line of `status` output.
#[derive(Debug, Serialize)]
struct StatusRow {
    position: Option<u16>,
    #[serde(flatten)]
    telemetry: Telemetry,
}

fn print_status(manager: &ArmManager, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let positions = manager.positions();
    let telemetry = manager.telemetry();
    let rows: BTreeMap<String, StatusRow> = manager
        .names()
        .map(|name| {
            (
                name.to_string(),
                StatusRow {
                    position: positions[name],
                    telemetry: telemetry[name],
                },
            )
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for (name, row) in &rows {
        let position = row
            .position
            .map_or_else(|| "unavailable".to_string(), |p| format!("{p} pulses"));
        let vin = row
            .telemetry
            .vin_mv
            .map_or_else(|| "?".to_string(), |v| format!("{:.1} V", f64::from(v) / 1000.0));
        let temp = row
            .telemetry
            .temp_c
            .map_or_else(|| "?".to_string(), |t| format!("{t} °C"));
        let torque = match row.telemetry.torque_on {
            Some(true) => "holding",
            Some(false) => "compliant",
            None => "?",
        };
        println!("{name:<12} {position:<12} {vin:>7}  {temp:>6}  {torque}");
    }
    Ok(())
}

/// Parse a `name=pulse` move target.
fn parse_target(s: &str) -> Result<(String, u16), String> {
    let (name, pulse) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=pulse, got '{s}'"))?;
    let pulse = pulse
        .trim()
        .parse::<u16>()
        .map_err(|e| format!("bad pulse count in '{s}': {e}"))?;
    Ok((name.trim().to_string(), pulse))
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
