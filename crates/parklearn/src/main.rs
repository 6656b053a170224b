//! parklearn command-line launcher
//!
//! Runs parking ROI learning jobs against the shared project tree and
//! browses the stored experiment history.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parklearn_logging::{init_logging, LogConfig};
use std::process::ExitCode;

mod cli;

use cli::config::ConfigOverrides;
use cli::error::HelpfulError;

#[derive(Parser, Debug)]
#[command(name = "parklearn", about = "Parking ROI learning jobs", version)]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Learn on a project's images and score a test set; results are stored
    Batch(cli::job::BatchArgs),

    /// Learn, then run over the current live camera images
    Live(cli::job::LiveArgs),

    /// List a project's stored sessions, newest first
    History(cli::history::HistoryArgs),

    /// Show one stored session with its per-camera, per-region results
    Session(cli::history::SessionArgs),

    /// Show resolved configuration and paths
    Config(cli::config::ConfigArgs),
}

fn command_wants_json(cmd: &Commands) -> bool {
    match cmd {
        Commands::Batch(args) => args.learning.json,
        Commands::Live(args) => args.learning.json,
        Commands::History(args) => args.json,
        Commands::Session(args) => args.json,
        Commands::Config(args) => args.json,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    if let Err(err) = init_logging(LogConfig {
        app_name: "parklearn",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else if let Some(helpful) = err.downcast_ref::<HelpfulError>() {
                eprint!("{}", helpful);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let Cli {
        overrides, command, ..
    } = cli;

    if let Commands::Config(args) = command {
        return cli::config::run(args, &overrides);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match command {
            Commands::Batch(args) => cli::job::run_batch(args, &overrides).await,
            Commands::Live(args) => cli::job::run_live(args, &overrides).await,
            Commands::History(args) => cli::history::run_history(args, &overrides).await,
            Commands::Session(args) => cli::history::run_session(args, &overrides).await,
            Commands::Config(args) => cli::config::run(args, &overrides),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_batch_arguments_parse() {
        let cli = Cli::try_parse_from([
            "parklearn",
            "batch",
            "lot-7",
            "--rate",
            "0.01",
            "--iterations",
            "500",
            "--threshold",
            "16",
            "--learning",
            "day1",
            "--test",
            "day2",
            "--roi",
            "roi.json",
            "--deadline-secs",
            "60",
        ])
        .unwrap();

        assert_eq!(cli.overrides.deadline_secs, Some(60));
        match cli.command {
            Commands::Batch(args) => {
                assert_eq!(args.learning.project, "lot-7");
                assert_eq!(args.learning.iterations, 500);
                assert_eq!(args.test, "day2");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_live_has_no_test_argument() {
        let result = Cli::try_parse_from([
            "parklearn", "live", "lot-7", "--rate", "0.01", "--iterations", "5",
            "--threshold", "16", "--learning", "day1", "--roi", "roi.json", "--test", "x",
        ]);
        assert!(result.is_err());
    }
}
