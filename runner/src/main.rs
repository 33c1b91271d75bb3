//! `ticket-runner` command line entry point.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use ticket_runner::core::cancel::CancelToken;
use ticket_runner::exit_codes;
use ticket_runner::io::init::{InitOptions, init_runner};
use ticket_runner::logging;
use ticket_runner::run::{RunOptions, exit_code, retry_from_root, run_from_root};
use ticket_runner::scheduler::{RunStop, RunSummary, SchedulerError};
use ticket_runner::status::status_from_root;
use ticket_runner::validate::validate_runner;

#[derive(Parser)]
#[command(
    name = "ticket-runner",
    version,
    about = "Run dependency-ordered tickets through a coding agent in parallel"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.runner/` with a default config and an empty ticket store.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, ticket schema and dependencies.
    Validate,
    /// Show ticket statuses and what can run next.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Execute every runnable ticket.
    Run {
        /// Maximum concurrent agent invocations (overrides config).
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Do not invoke the agent; mark dispatched tickets complete.
        #[arg(long)]
        dry_run: bool,
        /// Log agent output and mirror it to stderr.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Move a failed ticket back to pending.
    Retry {
        /// Ticket id.
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let verbose = matches!(cli.command, Command::Run { verbose: true, .. });
    logging::init(verbose);

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> Result<i32> {
    let root = Path::new(".");
    match command {
        Command::Init { force } => {
            let paths = init_runner(root, &InitOptions { force })?;
            println!("initialized {}", paths.runner_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Validate => cmd_validate(root),
        Command::Status { json } => {
            let report = status_from_root(root)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serialize status")?
                );
            } else {
                print!("{}", report.render());
            }
            Ok(exit_codes::OK)
        }
        Command::Run {
            max_parallel,
            dry_run,
            verbose,
        } => cmd_run(
            root,
            &RunOptions {
                max_parallel,
                dry_run,
                verbose,
            },
        ),
        Command::Retry { id } => {
            retry_from_root(root, &id)?;
            println!("{id}: pending");
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_runner(root)?;
    if outcome.issues.is_empty() {
        println!("ok: {} tickets", outcome.ticket_count);
        return Ok(exit_codes::OK);
    }
    eprintln!("unsatisfiable dependencies:");
    for issue in &outcome.issues {
        eprintln!("- {issue}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_run(root: &Path, options: &RunOptions) -> Result<i32> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(exit_codes::CANCELLED);
        }
        eprintln!("cancelling; waiting for running agents to stop (Ctrl-C again to force)");
        handler_token.cancel();
    })
    .context("install Ctrl-C handler")?;

    match run_from_root(root, options, cancel) {
        Ok(summary) => {
            print_summary(&summary);
            Ok(exit_code(&summary))
        }
        Err(err) => {
            if let Some(SchedulerError::DependencyUnsatisfiable { issues }) =
                err.downcast_ref::<SchedulerError>()
            {
                warn!(count = issues.len(), "strict dependency check failed");
            }
            Err(err)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "dispatched {}, completed {}, failed {}",
        summary.dispatched,
        summary.completed.len(),
        summary.failed.len()
    );
    for id in &summary.failed {
        println!("failed: {id}");
    }
    for issue in &summary.issues {
        println!("unsatisfiable: {issue}");
    }
    match &summary.stop {
        RunStop::Complete => {}
        RunStop::Stalled { pending } => println!("stalled: {}", pending.join(", ")),
        RunStop::Cancelled => println!("cancelled"),
    }
}
