mod config;
mod orchestrator;
mod sink;
mod source;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use scoreprobe::Registry;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::level_filters::LevelFilter;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::source::Filesystem;

#[derive(Parser, Debug)]
#[command(name = "scoreprobe", version)]
#[command(about = "Runs scored service checks in fixed rounds and publishes the results")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/scoreprobe/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run check rounds until interrupted
    Run {
        /// Stop after this many rounds
        #[arg(long)]
        rounds: Option<u64>,
    },
    /// Load, render and validate check definitions without running them
    Checks {
        /// Check file or directory, defaults to the configured source path
        path: Option<PathBuf>,

        /// Only show checks for this team
        #[arg(long)]
        team: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::WARN,
            (false, 0) => LevelFilter::INFO,
            (false, 1) => LevelFilter::DEBUG,
            (false, _) => LevelFilter::TRACE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.level());

    let config = Config::from_config(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Command::Run { rounds } => run(&config, rounds).await,
        Command::Checks { path, team } => checks(&config, path, team).await,
        Command::Config => {
            println!("{config}");
            Ok(())
        }
    }
}

async fn run(config: &Config, rounds: Option<u64>) -> Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing in-flight rounds");
                shutdown.cancel();
            }
        }
    });

    let report = Orchestrator::from_config(config, rounds)?.run(shutdown).await?;
    info!(rounds = report.rounds, published = report.published, "agent stopped");
    Ok(())
}

async fn checks(config: &Config, path: Option<PathBuf>, team: Option<String>) -> Result<()> {
    use crate::source::CheckSource;

    let teams = match &team {
        Some(name) => config.teams.iter().filter(|t| &t.name == name).cloned().collect(),
        None => config.teams.clone(),
    };
    if teams.is_empty() {
        bail!("no matching teams configured");
    }

    let path = path.unwrap_or_else(|| config.source.path.clone());
    let configs = Filesystem::new(path, teams).load_all().await?;
    let registry = Registry::with_builtin();

    let mut invalid = 0;
    for check in &configs {
        let metadata = &check.metadata;
        match registry.unpack(check) {
            Ok(_) if !registry.contains(&metadata.kind) => {
                invalid += 1;
                println!("unknown  {} (kind `{}`)", metadata.id, metadata.kind);
            }
            Ok(_) => println!("ok       {} ({})", metadata.id, metadata.kind),
            Err(e) => {
                invalid += 1;
                println!("invalid  {}: {e}", metadata.id);
            }
        }
    }

    if invalid > 0 {
        bail!("{invalid} of {} check definitions are invalid", configs.len());
    }
    println!("{} check definitions are valid", configs.len());
    Ok(())
}
