//! sessync CLI - keeps AI agent session logs synced into SQLite

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sessync_core::db::ListSessionsOptions;
use sessync_core::models::AgentKind;
use sessync_core::{Config, Database};
use sessync_sync::{
    PassOutcome, PassReport, Phase, Progress, ServiceOptions, SyncEngine, SyncEvent, run_service,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sessync",
    author,
    version,
    about = "Sync AI agent session logs into a normalized SQLite store",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "SESSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one sync pass over every enabled agent root
    Sync {
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,

        /// Reparse only the file holding this session id (e.g. `codex:<id>`)
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// Sync now, then keep syncing on file changes and on a timer
    Watch {
        /// Disable the file watcher and rely on the timer alone
        #[arg(long)]
        no_watch: bool,
    },

    /// Show store statistics
    Stats,

    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = load_config(&config_path)?;

    match cli.command {
        Command::Config => cmd_config(&config, &config_path),
        command => {
            let db = Database::open(&config.database)
                .await
                .with_context(|| format!("opening store at {}", config.database.display()))?;
            let result = match command {
                Command::Sync { json, session } => {
                    cmd_sync(&db, &config, json, session.as_deref()).await
                }
                Command::Watch { no_watch } => cmd_watch(&db, &config, no_watch).await,
                Command::Stats => cmd_stats(&db).await,
                Command::Config => Ok(()),
            };
            db.close().await;
            result
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::ensure_at(path).with_context(|| format!("loading config from {}", path.display()))
}

#[derive(Debug, Serialize)]
struct SyncOutput<'a> {
    outcome: &'a PassOutcome,
    report: &'a PassReport,
}

async fn cmd_sync(db: &Database, config: &Config, json: bool, session: Option<&str>) -> Result<()> {
    let engine = Arc::new(SyncEngine::from_config(Arc::new(db.clone()), config));

    let progress = (!json && std::io::stderr().is_terminal()).then(|| {
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SyncEvent::Progress(p) if p.phase == Phase::Syncing => {
                        eprint!("\r{}", progress_line(&p));
                    }
                    SyncEvent::Progress(_) => {}
                    SyncEvent::Done(_) => {
                        eprintln!();
                        break;
                    }
                }
            }
        })
    });

    let wait = async {
        match session {
            Some(id) => engine.sync_session(id).await,
            None => engine.request_sync().wait().await,
        }
    };
    tokio::pin!(wait);
    let outcome = tokio::select! {
        outcome = &mut wait => outcome?,
        _ = tokio::signal::ctrl_c() => {
            engine.abort();
            wait.await?
        }
    };
    if let Some(task) = progress {
        task.await.context("progress printer")?;
    }

    let report = engine.last_report();
    if json {
        let output = SyncOutput {
            outcome: &outcome,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&outcome, &report);
    }

    if let PassOutcome::Failed { error, .. } = outcome {
        bail!("sync failed: {error}");
    }
    Ok(())
}

fn progress_line(progress: &Progress) -> String {
    format!(
        "{}/{} files ({:.0}%)",
        progress.sessions_done,
        progress.sessions_total,
        progress.fraction() * 100.0
    )
}

fn print_report(outcome: &PassOutcome, report: &PassReport) {
    let stats = outcome.stats();
    let verb = match outcome {
        PassOutcome::Completed(_) => "Synced",
        PassOutcome::Cancelled(_) => "Cancelled after syncing",
        PassOutcome::Failed { .. } => "Failed after syncing",
    };
    println!(
        "{verb} {} of {} files ({} unchanged, {} failed)",
        stats.synced, stats.total_sessions, stats.skipped, stats.failed
    );
    if stats.warnings > 0 {
        println!("  {} malformed records skipped", stats.warnings);
    }
    for failure in &report.failures {
        println!(
            "  [{}] {}: {}",
            failure.kind.as_str(),
            failure.path.display(),
            failure.message
        );
    }
}

async fn cmd_watch(db: &Database, config: &Config, no_watch: bool) -> Result<()> {
    let engine = Arc::new(SyncEngine::from_config(Arc::new(db.clone()), config));
    let mut options = ServiceOptions::from_config(&config.sync);
    if no_watch {
        options.watch = false;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    run_service(engine, options, shutdown).await;
    Ok(())
}

async fn cmd_stats(db: &Database) -> Result<()> {
    let counts = db.counts().await?;
    println!("Sessions:   {}", counts.sessions);
    println!("Messages:   {}", counts.messages);
    println!("Tool calls: {}", counts.tool_calls);

    for agent in AgentKind::ALL {
        let sessions = db
            .list_sessions(ListSessionsOptions {
                agent: Some(agent),
                ..Default::default()
            })
            .await?;
        if sessions.is_empty() {
            continue;
        }
        let messages: i64 = sessions.iter().map(|s| s.message_count).sum();
        println!(
            "  {:<8} {} sessions, {messages} messages",
            agent.as_str(),
            sessions.len()
        );
    }
    Ok(())
}

fn cmd_config(config: &Config, path: &Path) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
