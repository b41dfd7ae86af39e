//! columba: run shell commands received by mail through a persistent shell.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cb_core::config::Config;
use cb_daemon::mail::SpoolMailbox;
use cb_daemon::scheduler::Scheduler;
use cb_daemon::worker::{format_result, Worker};
use cb_harness::shutdown::ShutdownSignal;
use cb_session::{SessionHandle, ShellSession};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Columba -- drive a persistent shell session by email.
#[derive(Parser)]
#[command(name = "columba", version, about)]
struct Cli {
    /// Config file (default: ~/.columba/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the mailbox and execute incoming commands until interrupted.
    Run,

    /// Run commands through one session and print the results.
    Exec {
        /// Commands, executed in order.
        #[arg(required = true)]
        commands: Vec<String>,
        /// Per-command timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

fn open_session(config: &Config) -> Result<SessionHandle> {
    let session = ShellSession::from_config(&config.session)
        .context("failed to resolve the session's initial directory")?;
    Ok(SessionHandle::new(session))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let format = cb_telemetry::logging::LogFormat::from_json_flag(
        cli.json_logs || config.general.json_logs,
    );
    cb_telemetry::logging::init("columba", &config.general.log_level, format);

    match cli.command {
        Commands::Run => run_daemon(config).await,
        Commands::Exec { commands, timeout } => exec(config, commands, timeout).await,
    }
}

async fn run_daemon(config: Config) -> Result<()> {
    let session = open_session(&config)?;
    session
        .start()
        .await
        .context("failed to start shell session")?;

    if config.mail.allowed_senders.is_empty() {
        warn!("mail.allowed_senders is empty, every message will be rejected");
    }
    let mailbox = SpoolMailbox::new(&config.mail.spool_dir, config.mail.allowed_senders.clone());
    mailbox
        .ensure_layout()
        .await
        .context("failed to prepare mail spool")?;

    let shutdown = ShutdownSignal::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, shutting down");
                ctrl_c.trigger();
            }
            Err(e) => warn!("failed to listen for ctrl-c: {e}"),
        }
    });

    info!(
        project = %config.general.project_name,
        spool = %config.mail.spool_dir,
        "columba daemon starting"
    );
    let mut scheduler = Scheduler::new(
        config.scheduler.clone(),
        config.mail.reply_subject.clone(),
        Arc::new(mailbox),
        Worker::new(session),
    );
    scheduler.run(shutdown).await;
    info!("columba daemon stopped");
    Ok(())
}

async fn exec(config: Config, commands: Vec<String>, timeout: Option<u64>) -> Result<()> {
    let session = open_session(&config)?;
    let timeout = timeout.map(Duration::from_secs);

    for command in &commands {
        let result = session.execute(command.as_str(), timeout).await;
        println!("{}\n", format_result(command, &result));
    }
    println!("[Working Directory]\n{}", session.working_dir().await.display());

    session.stop().await;
    Ok(())
}
