//! Operational CLI over `questboard_core`.
//!
//! # Responsibility
//! - Run migrations, diagnostics and source syncs against a configured store.
//! - Keep output line-oriented so it can be grepped from scripts.

use clap::{Parser, Subcommand};
use questboard_core::{
    compute_gold_for_label, init_from_config, AppContext, CoreConfig, CoreError, SourceKind,
    UserId,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// Questboard store maintenance and sync.
#[derive(Parser)]
#[command(name = "questboard", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "QUESTBOARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations; safe to run repeatedly.
    Migrate,

    /// Create a user and print its id.
    AddUser {
        #[arg(long)]
        name: String,
        /// IANA time zone, e.g. America/Los_Angeles.
        #[arg(long)]
        time_zone: Option<String>,
    },

    /// Change the time zone used to read date-only due values.
    SetTimeZone {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        time_zone: String,
    },

    /// Print active vs recycled task counts for a user.
    Counts {
        #[arg(long)]
        user: UserId,
    },

    /// Preview the gold a task would earn.
    Gold {
        /// Importance tier label (Low, Med-Low, Medium, Med-High, High, Pareto).
        #[arg(long)]
        importance: Option<String>,
        #[arg(long)]
        minutes: f64,
    },

    /// Print the connection status of every source.
    Sources,

    /// Import and refresh tasks from one source.
    Sync {
        #[arg(long)]
        user: UserId,
        #[arg(long, value_parser = parse_source)]
        source: SourceKind,
    },

    /// Sync one source, then delete its imports missing from the fetch.
    Purge {
        #[arg(long)]
        user: UserId,
        #[arg(long, value_parser = parse_source)]
        source: SourceKind,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            log::error!(
                "event=cli_command module=cli status=error kind={}",
                err.kind().as_str()
            );
            eprintln!("error[{}]: {err}", err.kind().as_str());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CoreError> {
    let config = CoreConfig::load(cli.config.as_deref())?;
    if let Err(err) = init_from_config(&config.logging) {
        eprintln!("warning: logging disabled: {err}");
    }

    if let Command::Gold {
        importance,
        minutes,
    } = &cli.command
    {
        let gold = compute_gold_for_label(importance.as_deref(), *minutes)?;
        println!("gold={gold}");
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = AppContext::open(config)?;
    match cli.command {
        Command::Migrate => {
            let report = ctx.migration_report();
            println!(
                "applied={:?} already_applied={}",
                report.applied,
                report.already_applied.len()
            );
            for failure in &report.failed {
                println!("failed: {failure}");
            }
            if let Err(err) = report.ensure_complete() {
                eprintln!("error[migration]: {err}");
                return Ok(ExitCode::from(2));
            }
        }
        Command::AddUser { name, time_zone } => {
            let user = ctx.create_user(&name, time_zone.as_deref())?;
            println!("user_id={} time_zone={}", user.id, user.time_zone);
        }
        Command::SetTimeZone { user, time_zone } => {
            ctx.set_user_time_zone(user, &time_zone)?;
            println!("ok");
        }
        Command::Counts { user } => {
            let counts = ctx.task_counts(user)?;
            println!(
                "active={} recycled={} completed={}",
                counts.active, counts.recycled, counts.completed
            );
        }
        Command::Sources => {
            for (source, status) in ctx.source_statuses() {
                println!("{source}={}", status.as_str());
            }
        }
        Command::Sync { user, source } => {
            let report = ctx.sync_source(user, source)?;
            let summary = report.summary;
            println!(
                "source={} pages={} complete={} created={} updated={} unchanged={} skipped={} normalization_skipped={}",
                source,
                report.pages,
                report.complete,
                summary.created,
                summary.updated,
                summary.unchanged,
                summary.skipped,
                summary.normalization_skipped
            );
        }
        Command::Purge { user, source } => {
            let (_, purged) = ctx.sync_and_purge(user, source)?;
            for task in &purged.removed {
                println!(
                    "removed task_id={} external_id={} title={:?}",
                    task.task_id, task.external_id, task.title
                );
            }
            println!(
                "source={} removed={} kept_outside_window={}",
                source,
                purged.removed.len(),
                purged.kept_outside_window
            );
        }
        Command::Gold { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn parse_source(value: &str) -> Result<SourceKind, String> {
    SourceKind::parse(value).ok_or_else(|| {
        format!("unknown source `{value}`; expected notion|google_calendar")
    })
}
