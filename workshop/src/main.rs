//! Quality-controlled commission workshop.
//!
//! Runs a single commission through plan, generate, and critique cycles
//! using external collaborator commands configured in
//! `.workshop/config.toml`, then archives the result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use workshop::agents::command::agents_from_config;
use workshop::commission::{CommissionRecord, Outcome};
use workshop::core::state_machine::CommissionState;
use workshop::core::types::CommissionId;
use workshop::exit_codes;
use workshop::io::archive::{JsonArchive, load_record};
use workshop::io::config::{DEFAULT_CONFIG_PATH, WorkshopConfig, load_config, write_config};
use workshop::logging;
use workshop::orchestrator::LoopConfig;
use workshop::workshop::Workshop;

#[derive(Parser)]
#[command(
    name = "workshop",
    version,
    about = "Plan, generate, and critique a commission until it is good enough"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run one commission to a terminal state.
    Run {
        /// Natural-language request to fulfil.
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Explicit commission id (default: random `commission-<hex>`).
        #[arg(long)]
        id: Option<String>,
    },
    /// Print the summary of an archived commission record.
    Show { record: PathBuf },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run { prompt, config, id } => cmd_run(&config, prompt, id),
        Command::Show { record } => cmd_show(&record),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &WorkshopConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, prompt: String, id: Option<String>) -> Result<i32> {
    let config = load_config(config_path)?;
    let agents = agents_from_config(&config.agents)?;
    let archive = JsonArchive::new(&config.archive_dir);
    let workshop = Workshop::new(agents, LoopConfig::from(&config)).with_archive(archive.clone());

    let id = match id {
        Some(raw) => {
            let id = CommissionId::parse(raw).context("invalid --id")?;
            workshop.submit_with_id(id, prompt)?
        }
        None => workshop.submit_commission(prompt)?,
    };
    let outcome = workshop.wait(&id)?;

    println!("{id}: {}", outcome.state());
    println!("{}", outcome.summary());
    println!("record: {}", archive.record_path(id.as_str()).display());
    Ok(exit_code(&outcome))
}

fn cmd_show(path: &Path) -> Result<i32> {
    let record = load_record(path)?;
    print!("{}", render_record(&record));
    Ok(exit_codes::OK)
}

fn exit_code(outcome: &Outcome) -> i32 {
    match outcome.state() {
        CommissionState::Stalemate => exit_codes::STALEMATE,
        CommissionState::Escalated => exit_codes::ESCALATED,
        CommissionState::Cancelled => exit_codes::CANCELLED,
        _ => exit_codes::OK,
    }
}

fn render_record(record: &CommissionRecord) -> String {
    let scores: Vec<String> = record
        .history
        .iter()
        .map(|r| format!("{:.3}", r.score.overall))
        .collect();
    let mut out = format!(
        "id: {}\nstate: {}\nsummary: {}\nplans: {}\nversions: {} (discarded {})\nscores: {}\n",
        record.id,
        record.state,
        record.summary,
        record.plan_history.len(),
        record.history.len(),
        record.discarded.len(),
        scores.join(" ")
    );
    if let Some(reason) = record.diagnostics.as_ref().and_then(|d| d.reason.as_ref()) {
        out.push_str(&format!("reason: {reason:?}\n"));
    }
    out
}
