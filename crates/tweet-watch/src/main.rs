//! tweet-watch CLI - timeline keyword alerts.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tweet_watch::quota::{CredentialRotator, QuotaLedger};
use tweet_watch::storage::DedupStore;
use tweet_watch::{CycleOutcome, KeywordFilter, Monitor, TwitterClient, WatchConfig};

/// tweet-watch - Watch a timeline for keywords and alert a group chat.
#[derive(Parser)]
#[command(name = "tweet-watch")]
#[command(about = "Timeline keyword watcher with credential rotation")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Directory for the quota ledger and dedup files (overrides STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single monitor cycle (for cron use)
    Run,

    /// Run cycles forever at the configured interval
    Watch {
        /// Seconds between cycles (overrides MONITOR_INTERVAL)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show credential quota and dedup state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which keywords a piece of text matches
    Check {
        /// Text to test
        text: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("tweet_watch=debug,notify=debug,info")
        } else {
            EnvFilter::new("tweet_watch=info,notify=info,warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    let mut config = WatchConfig::from_env()?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }

    match cli.command {
        Commands::Run => run_once(&config).await,
        Commands::Watch { interval } => {
            if let Some(secs) = interval {
                config.poll_interval = Duration::from_secs(secs);
            }
            run_watch(&config).await
        }
        Commands::Status { json } => run_status(&config, json),
        Commands::Check { text } => {
            run_check(&config, &text);
            Ok(())
        }
    }
}

fn build_monitor(config: &WatchConfig) -> Result<Monitor<TwitterClient>> {
    let client = TwitterClient::new(config.api_base_url.clone(), config.request_timeout)?;
    Ok(Monitor::new(config, client, config.notifier())?)
}

async fn run_once(config: &WatchConfig) -> Result<()> {
    tracing::info!(
        handle = %config.target_handle,
        credentials = config.credentials.len(),
        state_dir = %config.state_dir.display(),
        "Starting monitor cycle"
    );

    let mut monitor = build_monitor(config)?;
    let outcome = monitor.run_cycle().await?;
    print_outcome(&outcome);
    Ok(())
}

async fn run_watch(config: &WatchConfig) -> Result<()> {
    tracing::info!(
        handle = %config.target_handle,
        interval_secs = config.poll_interval.as_secs(),
        "Starting watch loop"
    );

    loop {
        // State is reloaded from disk every cycle.
        let mut monitor = build_monitor(config)?;
        match monitor.run_cycle().await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("{} {e}", "✗ Cycle aborted:".red().bold()),
        }

        tokio::select! {
            () = tokio::time::sleep(config.poll_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watch loop");
                return Ok(());
            }
        }
    }
}

fn print_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::SkippedOutOfWindow => {
            println!("{}", "⏸  Outside monitoring window, nothing to do".bright_black());
        }
        CycleOutcome::SkippedNoNewItems => {
            println!("{}", "📭 No new items".bright_black());
        }
        CycleOutcome::Completed(report) => {
            println!("\n📊 {}", "Cycle Summary".cyan().bold());
            println!("   Fetched:  {}", report.fetched);
            println!("   Examined: {}", report.examined);
            println!("   Matched:  {}", report.matched);
            println!("   Notified: {}", report.notified.to_string().green());
            if report.notify_failures > 0 {
                println!(
                    "   Failed:   {}",
                    report.notify_failures.to_string().red()
                );
            }
            if !report.persisted {
                println!("   {}", "⚠ dedup state was not saved".yellow());
            }
            if report.ledger_write_failures > 0 {
                println!(
                    "   {}",
                    format!(
                        "⚠ quota ledger failed to save {} time(s)",
                        report.ledger_write_failures
                    )
                    .yellow()
                );
            }
        }
    }
}

fn run_status(config: &WatchConfig, json: bool) -> Result<()> {
    let now = Utc::now();
    let ledger = QuotaLedger::load(&config.ledger_path(), config.quota);
    let mut rotator = CredentialRotator::new(config.credentials.clone(), ledger)?;
    let dedup = DedupStore::load(&config.dedup_path(), config.retention);
    let credentials = rotator.status(now);

    if json {
        let report = serde_json::json!({
            "credentials": credentials,
            "in_window": config.window.contains(now),
            "processed": dedup.processed().len(),
            "notified": dedup.notified().len(),
            "last_item_id": dedup.last_item_id(),
            "last_update": dedup.last_update(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🔑 {}\n", "Credentials".cyan().bold());
    for status in &credentials {
        let marker = if status.usable {
            "●".green()
        } else {
            "●".red()
        };
        println!(
            "   {marker} #{} {}  {}/{}",
            status.index, status.masked_token, status.usage_count, status.limit
        );
        if let Some(last) = &status.last_error {
            println!("      last error: {} at {}", last.error, last.time.to_string().bright_black());
        }
    }

    let window = if config.window.contains(now) {
        "open".green()
    } else {
        "closed".yellow()
    };
    println!("\n🗂  {}\n", "State".cyan().bold());
    println!("   Window:       {window}");
    println!("   Processed:    {}", dedup.processed().len());
    println!("   Notified:     {}", dedup.notified().len());
    println!("   Last item:    {}", dedup.last_item_id().unwrap_or("-"));
    println!(
        "   Last update:  {}",
        dedup
            .last_update()
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    );
    println!(
        "   Webhook:      {}",
        if config.webhook_url.is_some() {
            "configured".green()
        } else {
            "missing".red()
        }
    );

    Ok(())
}

fn run_check(config: &WatchConfig, text: &str) {
    let filter = KeywordFilter::new(&config.keywords);
    let matched = filter.matches(text);

    if matched.is_empty() {
        println!("{} no keyword matched", "✗".red().bold());
    } else {
        println!("{} {}", "✓".green().bold(), matched.join(", ").green());
    }
}
