//! Command-line front end for the to-do ledger engine.
//!
//! # Responsibility
//! - Apply single calls or whole action feeds to a ledger database file.
//! - Print committed state and failures as JSON for scripting.

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::error;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use todo_core::db::open_db;
use todo_core::{
    default_log_level, ingest_feed, init_logging, init_logging_with, ActionCall, ActionDispatcher,
    ActionKind, EngineConfig, LogTarget, Principal, SqliteTodoRepository, TodoListQuery,
};

/// Exit code for calls rejected by the engine; clap already uses 2 for usage errors.
const EXIT_REJECTED: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "todo", version, about = "To-do ledger state-transition engine")]
struct Cli {
    /// Engine config (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Absolute directory for rotating log files; logs go to stderr otherwise.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a health check and the core version.
    Ping,
    /// Apply one call.
    Apply(ApplyArgs),
    /// Apply a JSON-lines action feed (`-` reads stdin).
    Ingest {
        #[command(flatten)]
        db: DbArgs,
        feed: PathBuf,
    },
    /// List records.
    List(ListArgs),
    /// Show the committed actions of one record.
    History {
        #[command(flatten)]
        db: DbArgs,
        id: u64,
    },
}

#[derive(Debug, Args)]
struct DbArgs {
    /// Ledger database file; created on first use.
    #[arg(long)]
    db: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    Add,
    Edit,
    Toggle,
}

impl From<ActionArg> for ActionKind {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Add => ActionKind::Add,
            ActionArg::Edit => ActionKind::Edit,
            ActionArg::Toggle => ActionKind::Toggle,
        }
    }
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[command(flatten)]
    db: DbArgs,
    /// Authenticated caller account.
    #[arg(long)]
    caller: String,
    #[arg(long)]
    expected_version: Option<u64>,
    #[arg(long)]
    call_id: Option<String>,
    action: ActionArg,
    id: u64,
    text: Option<String>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[command(flatten)]
    db: DbArgs,
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    done: Option<bool>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long, default_value_t = 0)]
    offset: u32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_cli_logging(&cli) {
        eprintln!("todo: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("todo: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_cli_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    match cli.log_dir.as_deref() {
        Some(dir) => init_logging(level, dir)?,
        None => init_logging_with(level, LogTarget::Stderr)?,
    }
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = match cli.config.as_ref() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Ping => {
            println!("todo_core ping={}", todo_core::ping());
            println!("todo_core version={}", todo_core::core_version());
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply(args) => {
            let conn = open_db(&args.db.db)?;
            let dispatcher =
                ActionDispatcher::standalone(SqliteTodoRepository::try_new(&conn)?, config);
            let call = ActionCall {
                action: args.action.into(),
                id: args.id,
                text: args.text,
                caller: Principal::parse(&args.caller)?,
                expected_version: args.expected_version,
                call_id: args.call_id,
            };

            match dispatcher.dispatch(&call) {
                Ok(outcome) => {
                    let replayed = outcome.is_replay();
                    print_json(&serde_json::json!({
                        "replayed": replayed,
                        "record": outcome.into_record(),
                    }))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    print_json(&serde_json::json!({
                        "error": err.kind(),
                        "message": err.to_string(),
                    }))?;
                    Ok(ExitCode::from(EXIT_REJECTED))
                }
            }
        }
        Command::Ingest { db, feed } => {
            let conn = open_db(&db.db)?;
            let dispatcher =
                ActionDispatcher::standalone(SqliteTodoRepository::try_new(&conn)?, config);
            let report = if feed.as_os_str() == "-" {
                ingest_feed(&dispatcher, io::stdin().lock())?
            } else {
                ingest_feed(&dispatcher, BufReader::new(File::open(&feed)?))?
            };
            print_json(&report)?;
            if report.failures.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_REJECTED))
            }
        }
        Command::List(args) => {
            let conn = open_db(&args.db.db)?;
            let dispatcher =
                ActionDispatcher::standalone(SqliteTodoRepository::try_new(&conn)?, config);
            let query = TodoListQuery {
                owner: args.owner.as_deref().map(Principal::parse).transpose()?,
                done: args.done,
                limit: args.limit,
                offset: args.offset,
            };
            print_json(&dispatcher.list(&query)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::History { db, id } => {
            let conn = open_db(&db.db)?;
            let dispatcher =
                ActionDispatcher::standalone(SqliteTodoRepository::try_new(&conn)?, config);
            print_json(&dispatcher.history(id)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
