mod config;
mod credentials;
mod error;
mod extractor;
mod fetcher;
mod models;
mod monitor;
mod ui;

use clap::{Parser, Subcommand};
use config::{config_path, ensure_initialized, load_config, log_dir, AppConfig};
use credentials::CredentialChain;
use error::AppError;
use fetcher::HttpUsageFetcher;
use models::{SectionGroup, Snapshot, UsageSection};
use monitor::{refresh_once, MonitorHandle};
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ui::run::run_tui;

#[derive(Debug, Parser)]
#[command(name = "limiter")]
#[command(about = "Claude plan usage limits, refreshed in the background")]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the config and log directories
    Init,
    /// Fetch usage once and print it
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Keep refreshing and print a line per update
    Watch,
    /// Interactive usage panel (default)
    Tui,
}

fn log_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug {
            "limiter=debug"
        } else {
            "limiter=info"
        })
    })
}

fn setup_stderr_logging(debug: bool) {
    tracing_subscriber::registry()
        .with(log_filter(debug))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// The panel owns the terminal, so its logs go to a file instead.
fn setup_file_logging(debug: bool) -> Result<(), AppError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir()?.join("limiter.log"))?;
    tracing_subscriber::registry()
        .with(log_filter(debug))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn spawn_monitor(cfg: &AppConfig) -> Result<MonitorHandle, AppError> {
    let credentials = CredentialChain::from_settings(&cfg.credentials);
    tracing::debug!(sources = ?credentials.source_names(), "credential sources");
    let fetcher = HttpUsageFetcher::from_config(cfg)?;
    Ok(MonitorHandle::spawn(
        cfg.refresh_policy(),
        Arc::new(credentials),
        Arc::new(fetcher),
    ))
}

fn format_section_row(section: &UsageSection) -> String {
    let row = format!("{:<20} {:>3}%", section.name, section.percent);
    if section.reset_info.is_empty() {
        row
    } else {
        format!("{row}  {}", section.reset_info)
    }
}

fn format_sections(sections: &[UsageSection]) -> String {
    let mut out = Vec::new();
    for group in SectionGroup::ALL {
        let rows: Vec<String> = sections
            .iter()
            .filter(|s| s.group == group)
            .map(format_section_row)
            .collect();
        if rows.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(String::new());
        }
        out.push(format!("[{}]", group.as_label()));
        out.extend(rows);
    }
    out.join("\n")
}

/// One line per finished refresh; `None` while an attempt is running.
fn watch_line(snapshot: &Snapshot) -> Option<String> {
    if snapshot.is_loading {
        return None;
    }
    let stamp = chrono::Local::now().format("%H:%M:%S");
    if let Some(error) = &snapshot.error {
        return Some(format!("{stamp} error: {error}"));
    }
    let summary = snapshot
        .sections
        .iter()
        .map(|s| format!("{} {}%", s.name, s.percent))
        .collect::<Vec<_>>()
        .join(" | ");
    Some(format!("{stamp} max {}% · {summary}", snapshot.max_percent()))
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command.unwrap_or(Commands::Tui) {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized limiter config at {}", config_path()?.display());
        }
        Commands::Status { json } => {
            setup_stderr_logging(cli.debug);
            let cfg = load_config()?;
            let credentials = CredentialChain::from_settings(&cfg.credentials);
            let fetcher = HttpUsageFetcher::from_config(&cfg)?;
            let sections = refresh_once(&credentials, &fetcher).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sections)?);
            } else if sections.is_empty() {
                println!("No usage data reported.");
            } else {
                println!("{}", format_sections(&sections));
            }
        }
        Commands::Watch => {
            setup_stderr_logging(cli.debug);
            let cfg = load_config()?;
            let monitor = spawn_monitor(&cfg)?;
            let mut updates = monitor.subscribe();
            monitor.start_monitoring();

            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = updates.borrow_and_update().clone();
                        if let Some(line) = watch_line(&snapshot) {
                            println!("{line}");
                        }
                    }
                    _ = &mut shutdown => break,
                }
            }
        }
        Commands::Tui => {
            ensure_initialized()?;
            setup_file_logging(cli.debug)?;
            let cfg = load_config()?;
            let monitor = spawn_monitor(&cfg)?;
            run_tui(monitor).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "limiter failed");
            eprintln!("limiter: {err}");
            ExitCode::FAILURE
        }
    }
}
