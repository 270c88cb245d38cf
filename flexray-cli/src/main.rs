//! FlexRay Bus Simulator CLI
//!
//! Runs a scenario of virtual ECUs on a simulated FlexRay bus and reports
//! what went over the wire.

mod settings;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use flexray_protocol::{frame, CycleLayout, Message};
use flexray_sim::{BusSimulator, SimError, Statistics, VirtualNode};
use settings::Settings;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "flexsim", version, about = "FlexRay bus simulator")]
struct Cli {
    /// Scenario file (defaults to $XDG_CONFIG_HOME/flexsim/settings.json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scenario and print statistics
    Run {
        /// Override the number of cycles
        #[arg(short, long)]
        cycles: Option<u32>,
        /// List every accepted frame
        #[arg(short, long)]
        traffic: bool,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check the bus configuration and print the cycle layout
    Validate,
    /// Write the default scenario to the settings path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Decode a hex-encoded frame
    Decode {
        /// Frame bytes, e.g. "00 0A 04 40 00 01 02 03 04 AF 2A EC"
        hex: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "flexsim=info,flexray_protocol=info,flexray_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run {
        cycles: None,
        traffic: false,
        json: false,
    });

    match command {
        Command::Run {
            cycles,
            traffic,
            json,
        } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let cycles = cycles.unwrap_or(settings.cycles);
            run(settings, cycles, traffic, json)
        }
        Command::Validate => validate(&load_settings(cli.settings.as_deref())?),
        Command::Init { force } => init(cli.settings, force),
        Command::Decode { hex } => decode(&hex),
    }
}

fn load_settings(path: Option<&std::path::Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Ok(Settings::load_from(path)?),
        None => Ok(Settings::load()),
    }
}

fn run(settings: Settings, cycles: u32, traffic: bool, json: bool) -> anyhow::Result<()> {
    info!("Starting FlexRay simulation for {} cycles", cycles);

    let mut sim = BusSimulator::new(settings.bus.clone());
    for config in settings.nodes {
        let name = config.name.clone();
        let node =
            VirtualNode::from_config(config).with_context(|| format!("invalid node '{}'", name))?;
        sim.attach_node(node);
    }

    sim.start()?;
    send_scenario_messages(&mut sim, settings.messages);

    for _ in 0..cycles {
        match sim.advance_cycle() {
            Ok(_) => {}
            Err(SimError::CallbackFailed(report)) => {
                for fault in &report.faults {
                    warn!(
                        "Cycle {}: node '{}' failed: {}",
                        report.cycle, fault.name, fault.message
                    );
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    sim.stop()?;

    if traffic {
        for entry in sim.get_log() {
            let frame = frame::decode(&entry.encoded)?;
            println!(
                "{:>10}us  {:<7}  {}  {:02X?}",
                entry.message.timestamp_us.unwrap_or_default(),
                entry.segment,
                frame,
                frame.payload()
            );
        }
    }

    let stats = sim.get_statistics();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_statistics(&stats, sim.layout());
    }
    Ok(())
}

/// Send the one-shot messages, returning how many were rejected
fn send_scenario_messages(sim: &mut BusSimulator, messages: Vec<Message>) -> usize {
    let mut rejected = 0;
    for (index, message) in messages.into_iter().enumerate() {
        if let Err(e) = sim.send_message(message) {
            warn!("Scenario message {} rejected: {}", index, e);
            rejected += 1;
        }
    }
    rejected
}

fn print_statistics(stats: &Statistics, layout: &CycleLayout) {
    println!("Cycles elapsed:     {}", stats.cycles_elapsed);
    println!("Final cycle:        {}", stats.cycle);
    println!("Frames sent:        {}", stats.sent);
    println!("Frames dropped:     {}", stats.dropped);
    println!("Channel A / B:      {} / {}", stats.channel_a, stats.channel_b);
    println!("Static utilization: {:.1}%", layout.static_utilization());
    println!("Slot distribution ({} slots):", stats.unique_slots());
    for (slot, count) in &stats.slot_distribution {
        println!("  slot {:>4}: {}", slot, count);
    }
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    let config = &settings.bus;
    let layout = CycleLayout::new(config);

    println!(
        "Static segment:   {:>6}us ({} slots x {}us)",
        layout.static_segment().duration.as_micros(),
        config.static_slots,
        config.static_slot_duration_us
    );
    println!(
        "Dynamic segment:  {:>6}us ({} minislots x {}us)",
        layout.dynamic_segment().duration.as_micros(),
        config.dynamic_slots,
        config.minislot_duration_us
    );
    println!(
        "Network idle:     {:>6}us",
        layout.network_idle_time().duration.as_micros()
    );
    println!("Cycle:            {:>6}us", layout.cycle_duration().as_micros());
    println!("Static utilization: {:.1}%", layout.static_utilization());

    let issues: Vec<_> = config.validate().collect();
    if issues.is_empty() {
        println!("Configuration OK");
        return Ok(());
    }
    for issue in &issues {
        println!("  - {}", issue);
    }
    bail!("{} configuration issue(s)", issues.len())
}

fn init(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let existing = path.clone().or_else(Settings::settings_path);
    if let Some(existing) = existing.filter(|p| p.exists()) {
        if !force {
            bail!("{} already exists (use --force to overwrite)", existing.display());
        }
    }

    let settings = Settings::default();
    let written = match path {
        Some(path) => {
            settings.save_to(&path)?;
            path
        }
        None => settings.save()?,
    };
    println!("Wrote {}", written.display());
    Ok(())
}

fn decode(hex: &str) -> anyhow::Result<()> {
    let bytes = parse_hex(hex)?;
    let frame = frame::decode(&bytes)?;
    println!("{}", frame);
    println!("flags:   0x{:02X}", frame.flags().bits());
    println!("payload: {:02X?}", frame.payload());
    Ok(())
}

/// Parse hex bytes, ignoring whitespace and an optional 0x prefix
fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = text
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        bail!("invalid hex digit '{}'", bad);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| Ok(u8::from_str_radix(&digits[i..i + 2], 16)?))
        .collect()
}
