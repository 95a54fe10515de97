//! Taskmaster CLI - a terminal client for the Taskmaster task board.
//!
//! Every command maps onto a view of the web front end and goes through the
//! same session guard: without a session only `login` and `status` run.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use taskmaster_core::auth::{Navigation, SessionEvent, SessionManager};
use taskmaster_core::config::Config;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

#[derive(Parser)]
#[command(name = "taskmaster")]
#[command(about = "Terminal client for the Taskmaster task board")]
#[command(version)]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, global = true, env = "TASKMASTER_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when `log_dir` is usable, to a daily rolling file.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("taskmaster")
            .filename_suffix("log")
            .build(dir)
            .ok()
    });
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

/// Drain queued session events, reporting whether any was a logout
fn session_ended(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
    let mut ended = false;
    loop {
        match events.try_recv() {
            Ok(event) => ended |= event == SessionEvent::LoggedOut,
            // Missed events are gone; keep reading what is still queued
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Session events lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return ended,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {:#}, using defaults", e);
            Config::default()
        }
    };
    config.apply_env();
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let log_dir = config.data_dir().ok();
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(api = %config.api_base_url, "Taskmaster CLI starting");

    let manager = SessionManager::from_config(&config)?;
    if cli.command.restores_profile() {
        manager.initialize().await;
    } else {
        manager.store().load();
    }
    let mut events = manager.subscribe();

    if let Navigation::Redirect(to) = manager.check_navigation(cli.command.route()) {
        anyhow::bail!(
            "Not logged in (redirected to {}). Run `taskmaster login` first.",
            to
        );
    }

    let logging_out = matches!(cli.command, Command::Logout);
    let result = commands::run(cli.command, &manager, &mut config).await;

    // A refresh that failed mid-command ends the session
    if session_ended(&mut events) && !logging_out {
        warn!("Session ended during command");
        eprintln!("Your session has expired. Run `taskmaster login` to sign in again.");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_found_after_lag() {
        let (sender, mut events) = broadcast::channel(4);
        for _ in 0..10 {
            sender.send(SessionEvent::TokenRefreshed).unwrap();
        }
        sender.send(SessionEvent::LoggedOut).unwrap();

        assert!(session_ended(&mut events));
        assert!(!session_ended(&mut events));
    }

    #[test]
    fn test_refresh_events_are_not_a_logout() {
        let (sender, mut events) = broadcast::channel(16);
        sender.send(SessionEvent::LoggedIn).unwrap();
        sender.send(SessionEvent::TokenRefreshed).unwrap();

        assert!(!session_ended(&mut events));
    }
}
