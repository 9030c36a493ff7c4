use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use epidemic_rl::config::Config;
use epidemic_rl::manager::Manager;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// TOML configuration file (built-in defaults when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train and save results, without replay.
    Train,

    /// Replay saved tables and plot the outcome.
    Replay {
        #[arg(long)]
        q_tables: PathBuf,
    },
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mut mgr = match &args.config {
        Some(file) => Manager::from_file(file),
        None => Manager::new(Config::default()),
    }
    .context("failed to construct mgr")?;

    match args.command {
        None => {
            mgr.run()?;
        }
        Some(Command::Train) => {
            mgr.train()?;
        }
        Some(Command::Replay { q_tables }) => {
            mgr.replay_file(q_tables)?;
        }
    }

    Ok(())
}
