mod ai;
mod audit;
mod config;
mod directory;
mod error;
mod history;
mod models;
mod tui;
mod view;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use config::{Config, HistoryLocation};
use history::{HistoryAdapter, HistoryCallback, SqliteHistoryStore};
use models::{percent, trend_label, AuditRequest, EmploymentType, HistoryEntry, Industry, RiskTier};
use view::{Controller, NavTarget};

#[derive(Parser)]
#[command(name = "ghostbuster")]
#[command(about = "Ghost job detector - score job postings for ghost-job risk")]
struct Cli {
    /// Model to audit with (gemini-2.5-flash, gemini-2.5-pro, gpt-4o, ...)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// History database path, or "off" for local-only mode
    #[arg(long, global = true)]
    history: Option<String>,

    /// Seconds to wait for the AI service before giving up
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive dashboard (default)
    Dashboard,

    /// Audit a single job posting and print the verdict
    Audit {
        /// Job title
        #[arg(short, long, default_value = "")]
        title: String,

        /// Company name
        #[arg(short, long, default_value = "")]
        company: String,

        /// Job description text
        #[arg(short, long, conflicts_with = "file")]
        requirements: Option<String>,

        /// Read the job description from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Job location
        #[arg(short, long, default_value = "")]
        location: String,

        /// Employment type (Full-time, Part-time, Contract, Freelance, Internship)
        #[arg(long = "type", default_value = "Full-time")]
        employment_type: EmploymentType,

        /// Industry (Technology, Finance, Healthcare, Education, Retail, Manufacturing, Other)
        #[arg(short, long, default_value = "Technology")]
        industry: Industry,

        /// Print the normalized result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the company accountability index
    Directory {
        /// Filter by name or location
        #[arg(short, long)]
        search: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show your 10 most recent audits
    History {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the anonymous identity history is stored under
    Identity,
}

fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(history) = &cli.history {
        config.history = config::parse_history_location(history);
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
}

/// The dashboard owns the terminal, so it logs to a file; one-shot commands
/// log to stderr.
fn init_logging(config: &Config, to_file: bool) {
    let default_level = if to_file { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("GHOSTBUSTER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if !to_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return;
    }

    let log_path = config.log_path();
    let file = log_path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_path));
    match file {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        Err(e) => eprintln!("Logging disabled: cannot open {}: {}", log_path.display(), e),
    }
}

fn open_history(config: &Config) -> HistoryAdapter {
    let path = match &config.history {
        HistoryLocation::Disabled => {
            info!("History disabled, running in local-only mode");
            return HistoryAdapter::local_only();
        }
        HistoryLocation::Path(path) => path,
    };

    let identity = match config.resolve_identity() {
        Ok(identity) => identity,
        Err(e) => {
            warn!("No anonymous identity ({:#}), running in local-only mode", e);
            return HistoryAdapter::local_only();
        }
    };

    match SqliteHistoryStore::open(path, &identity) {
        Ok(store) => {
            info!(path = ?store.path(), identity = %identity, "History store opened");
            HistoryAdapter::new(Arc::new(store))
        }
        Err(e) => {
            warn!("History store unavailable ({}), running in local-only mode", e);
            HistoryAdapter::local_only()
        }
    }
}

fn build_controller(config: &Config) -> Result<Controller> {
    let spec = ai::resolve_model(&config.model)?;
    let provider = ai::create_provider(&spec, config)?;
    Ok(Controller::new(provider, open_history(config)))
}

/// One snapshot of the history feed.
fn history_snapshot(adapter: &HistoryAdapter) -> Vec<HistoryEntry> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: HistoryCallback = Box::new(move |entries: &[HistoryEntry]| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(entries.to_vec());
        }
    });
    let subscription = adapter.subscribe(callback);
    let entries = rx.try_recv().unwrap_or_default();
    subscription.unsubscribe();
    entries
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    apply_overrides(&cli, &mut config);

    let command = cli.command.unwrap_or(Commands::Dashboard);
    init_logging(&config, matches!(command, Commands::Dashboard));

    match command {
        Commands::Dashboard => {
            let mut controller = build_controller(&config)?;
            info!(model = %config.model, "Starting dashboard");
            tui::run_dashboard(&mut controller)?;
        }

        Commands::Audit {
            title,
            company,
            requirements,
            file,
            location,
            employment_type,
            industry,
            json,
        } => {
            let requirements = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read job description: {}", path.display()))?,
                None => requirements.unwrap_or_default(),
            };
            let request = AuditRequest {
                title,
                company,
                requirements,
                location,
                employment_type,
                industry,
            };

            let mut controller = build_controller(&config)?;
            controller.navigate(NavTarget::Audit);
            controller.edit_form(request);
            controller.submit_blocking();

            let state = controller.state();
            if let Some(error) = &state.validation_error {
                return Err(anyhow!("{}", error));
            }
            if let Some(error) = &state.service_error {
                return Err(anyhow!("Failed to audit job post: {}", error));
            }
            let displayed = state
                .current
                .as_ref()
                .ok_or_else(|| anyhow!("Audit produced no result"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&displayed.outcome)?);
            } else {
                print_audit(displayed);
            }
        }

        Commands::Directory { search, json } => {
            let companies = directory::search(search.as_deref().unwrap_or(""));
            if json {
                println!("{}", serde_json::to_string_pretty(&companies)?);
            } else if companies.is_empty() {
                println!("No companies found.");
            } else {
                println!(
                    "{:<4} {:<12} {:<18} {:>6} {:<14} {:>5} {:>7} {:>8}  {}",
                    "ID", "NAME", "LOCATION", "GHOST", "RISK", "JOBS", "AGE", "TREND", "VOLUME"
                );
                println!("{}", "-".repeat(96));
                for company in companies {
                    let tier = RiskTier::from_score(company.ghost_risk);
                    println!(
                        "{:<4} {:<12} {:<18} {:>6} {:<14} {:>5} {:>6}d {:>8}  {}",
                        company.id,
                        truncate(company.name, 12),
                        truncate(company.location, 18),
                        percent(company.ghost_risk),
                        tier.label(),
                        company.metrics.jobs_count,
                        company.metrics.avg_age_days,
                        trend_label(company.metrics.trend),
                        directory::sparkline_text(&company.metrics.sparkline)
                    );
                }
            }
        }

        Commands::History { json } => {
            let adapter = open_history(&config);
            let entries = history_snapshot(&adapter);
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if adapter.is_local_only() {
                println!("History is off (local-only mode).");
            } else if entries.is_empty() {
                println!("No audits found. Start by auditing a job post.");
            } else {
                println!("{:<11} {:>6}  {:<30} {:<20}", "DATE", "RISK", "TITLE", "COMPANY");
                println!("{}", "-".repeat(70));
                for entry in entries {
                    println!(
                        "{:<11} {:>6}  {:<30} {:<20}",
                        entry.date_label(),
                        percent(entry.score),
                        truncate(&entry.job_title, 28),
                        truncate(&entry.company, 18)
                    );
                }
            }
        }

        Commands::Identity => match &config.history {
            HistoryLocation::Disabled => println!("History is off (local-only mode)."),
            HistoryLocation::Path(path) => {
                println!("Identity: {}", config.resolve_identity()?);
                println!("History:  {}", path.display());
            }
        },
    }

    Ok(())
}

fn print_audit(displayed: &view::DisplayedAudit) {
    let result = &displayed.outcome.result;
    let tier = RiskTier::from_score(result.score);

    if displayed.request.company.is_empty() {
        println!("Ghost Job Risk Assessment: {}", displayed.request.title);
    } else {
        println!(
            "Ghost Job Risk Assessment: {} at {}",
            displayed.request.title, displayed.request.company
        );
    }
    println!("Score: {}  {}", percent(result.score), tier.verdict().to_uppercase());
    if displayed.outcome.fallback_applied {
        println!("(The AI returned no usable score; showing the default 50%.)");
    }
    if !result.analysis.is_empty() {
        println!("\n{}", textwrap::fill(&result.analysis, 78));
    }
    if !result.factors.is_empty() {
        println!("\nFactors:");
        for factor in &result.factors {
            println!("  {:>4}  {}", percent(factor.impact), factor.name);
            if !factor.reason.is_empty() {
                println!("{}", textwrap::indent(&textwrap::fill(&factor.reason, 70), "        "));
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
