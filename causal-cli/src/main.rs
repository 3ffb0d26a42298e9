//! Command-line driver for the causal delivery engine.
//!
//! ```bash
//! # Replay the built-in showcase under the matrix model
//! causal run --script showcase --model matrix
//!
//! # Load a script from a file and print notifications as JSON lines
//! causal run --script ./chat.json --json
//!
//! # Randomized run with reordering, duplicates and drops
//! causal simulate --seed 42 --sends 200 --faults chaotic
//! ```

use anyhow::{bail, Context, Result};
use causal::sim::{FaultPreset, Simulation};
use causal::{
    ClockModel, ConfigBuilder, DeliveryEngine, EngineConfig, Notification, Script, ScriptRunner,
    StepOutcome, StepResult, BUILTIN_SCRIPTS,
};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Causal message delivery with vector and matrix clocks.
#[derive(Parser)]
#[command(name = "causal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script to completion and print the delivery log.
    Run {
        /// Built-in script name or path to a JSON script.
        #[arg(short, long, default_value = "showcase")]
        script: String,

        /// Clock model (vector-partial, vector-merge, matrix).
        #[arg(short, long, default_value = "vector-partial")]
        model: ClockModel,

        /// Process names in clock order.
        #[arg(short, long, value_delimiter = ',', default_value = "P1,P2,P3")]
        processes: Vec<String>,

        /// Print notifications and final state as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Run a randomized simulation and check the delivery properties.
    Simulate {
        /// Seed for the run; the same seed replays the same run.
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Number of sends.
        #[arg(long, default_value = "100")]
        sends: usize,

        /// Clock model (vector-partial, vector-merge, matrix).
        #[arg(short, long, default_value = "vector-partial")]
        model: ClockModel,

        /// Fault preset (none, reordering, chaotic).
        #[arg(short, long, default_value = "reordering")]
        faults: FaultPreset,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List built-in scripts.
    Scripts,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("causal=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            model,
            processes,
            json,
        } => {
            let config = ConfigBuilder::new()
                .processes(processes)
                .model(model)
                .build()?;
            run(config, load_script(&script)?, json)
        }
        Commands::Simulate {
            seed,
            sends,
            model,
            faults,
            json,
        } => simulate(EngineConfig::with_model(model), faults, seed, sends, json),
        Commands::Scripts => {
            for name in BUILTIN_SCRIPTS {
                if let Some(script) = Script::builtin(name) {
                    println!("{name:<10} {} steps", script.len());
                }
            }
            Ok(())
        }
    }
}

fn load_script(name: &str) -> Result<Script> {
    if let Some(script) = Script::builtin(name) {
        return Ok(script);
    }

    let path = Path::new(name);
    if !path.exists() {
        bail!(
            "no built-in script `{name}` and no such file (built-ins: {})",
            BUILTIN_SCRIPTS.join(", ")
        );
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    Script::from_json(&json).with_context(|| format!("invalid script {}", path.display()))
}

fn run(config: EngineConfig, script: Script, json: bool) -> Result<()> {
    let mut engine = DeliveryEngine::new(config)?;
    engine.subscribe(Arc::new(move |notification: &Notification| {
        if json {
            match serde_json::to_string(notification) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "failed to encode notification"),
            }
        } else {
            println!("  {}", indent(&notification.to_string()));
        }
    }));

    tracing::info!(script = %script.name, model = %engine.model(), "running script");
    let mut runner = ScriptRunner::new(engine, script);

    loop {
        let index = runner.cursor();
        if !json {
            if let Some(step) = runner.script().steps.get(index) {
                println!("Step {}: {}", index + 1, step.summary());
            }
        }

        match runner.next_step() {
            StepResult::Executed {
                outcome: StepOutcome::Sent(message),
                ..
            } if !json => {
                println!(
                    "  {} sent {} {}",
                    message.sender(),
                    message.id(),
                    indent(&message.timestamp().to_string())
                );
            }
            StepResult::Executed { .. } => {}
            StepResult::Complete => break,
        }
    }

    let engine = runner.engine();
    if json {
        for state in engine.states() {
            let pending: Vec<_> = state.pending().map(|m| m.id()).collect();
            println!(
                "{}",
                serde_json::json!({
                    "process": state.id(),
                    "clock": state.clock(),
                    "history": state.history(),
                    "pending": pending,
                })
            );
        }
    } else {
        println!("Simulation complete.");
        for state in engine.states() {
            let history: Vec<_> = state.history().iter().map(ToString::to_string).collect();
            let pending: Vec<_> = state.pending().map(|m| m.id().to_string()).collect();
            println!(
                "{}: {}\n  delivered [{}] pending [{}]",
                state.id(),
                indent(&state.clock().to_string()),
                history.join(", "),
                pending.join(", ")
            );
        }
    }

    Ok(())
}

fn simulate(
    config: EngineConfig,
    faults: FaultPreset,
    seed: u64,
    sends: usize,
    json: bool,
) -> Result<()> {
    let mut sim = Simulation::new(config, faults.config(), seed)?;
    let report = sim.run(sends)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "seed {} model {} faults {}: {} sends, {} copies ({} dropped, {} duplicated)",
            report.seed,
            report.model,
            faults,
            report.sent,
            report.network.messages_sent,
            report.network.messages_dropped,
            report.network.messages_duplicated,
        );
        for (process, history) in &report.histories {
            println!("  {process}: {} delivered", history.len());
        }
        println!(
            "  {} still pending, liveness {}",
            report.engine.pending,
            if report.liveness_checked { "checked" } else { "not checked" }
        );
    }

    if !report.passed() {
        bail!(
            "property check failed: {}",
            report.check.error_message().unwrap_or_default()
        );
    }
    if !json {
        println!("all properties hold");
    }

    Ok(())
}

/// Indent continuation lines of multi-line matrix renderings.
fn indent(text: &str) -> String {
    text.replace('\n', "\n    ")
}
