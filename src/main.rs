mod batch;
mod config;
mod db;
mod error;
mod export;
mod fetcher;
mod input;
mod parser;
mod server;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::batch::BatchResult;
use crate::config::{Cookies, Settings};
use crate::fetcher::Fetcher;
use crate::parser::normalize::{validate_source_url, validate_target_url};

#[derive(Parser)]
#[command(
    name = "profile_harvester",
    about = "Resolve Stack Overflow users to GitHub profiles and harvest them"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load Stack Overflow profile URLs (CSV or one per line) into the queue
    Init {
        /// Input file
        path: PathBuf,
    },
    /// Process the next batch of unprocessed profiles
    Batch {
        /// Profiles per batch (default: HARVEST_BATCH_SIZE or 40)
        #[arg(short = 'n', long)]
        size: Option<usize>,
    },
    /// Run batches until everything is processed or upstream rate limits
    Drain {
        /// Stop after this many batches
        #[arg(short = 'm', long)]
        max_batches: Option<usize>,
        #[arg(short = 'n', long)]
        size: Option<usize>,
    },
    /// Find the GitHub link on one Stack Overflow profile
    Resolve { url: String },
    /// Extract one GitHub profile
    Profile { url: String },
    /// Start the HTTP API
    Serve,
    /// Show progress statistics
    Stats,
    /// Write one CSV row per queued profile with everything harvested so far
    Export {
        /// Output CSV file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Init { path } => {
            let conn = open_store(&settings)?;
            let rows = input::load_sources(&path)?;
            let inserted = db::insert_sources(&conn, &rows)?;
            println!(
                "Inserted {} new profile URLs ({} in file)",
                inserted,
                rows.len()
            );
            Ok(())
        }
        Commands::Batch { size } => {
            let conn = open_store(&settings)?;
            let fetcher = session(&settings)?;
            let size = size.unwrap_or(settings.batch_size);
            let result = batch::run_batch(&conn, &fetcher, size).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Drain { max_batches, size } => {
            let conn = open_store(&settings)?;
            let fetcher = session(&settings)?;
            let size = size.unwrap_or(settings.batch_size);
            drain(&conn, &fetcher, size, max_batches).await
        }
        Commands::Resolve { url } => {
            let url = validate_source_url(&url)?;
            let conn = open_store(&settings)?;
            if db::is_processed(&conn, &url)? {
                println!("Note: {} was already handled by a batch", url);
            }
            let fetcher = session(&settings)?;
            let resolved = batch::resolve_source(&fetcher, &url).await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(())
        }
        Commands::Profile { url } => {
            let url = validate_target_url(&url)?;
            let fetcher = session(&settings)?;
            match batch::fetch_profile(&fetcher, &url).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("Could not extract a profile from {}", url),
            }
            Ok(())
        }
        Commands::Serve => {
            open_store(&settings)?;
            let fetcher = session(&settings)?;
            server::serve(settings, fetcher).await
        }
        Commands::Stats => {
            let conn = open_store(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Total:       {}", s.total);
            println!("Processed:   {}", s.processed);
            println!("Unprocessed: {}", s.unprocessed);
            println!("  success:   {}", s.success);
            println!("  no match:  {}", s.no_match);
            println!("  errors:    {}", s.errors);
            println!("Cursor:      {}", s.cursor);
            println!("Records:     {} ({} with GitHub)", s.records, s.with_github);
            Ok(())
        }
        Commands::Export { path } => {
            let conn = open_store(&settings)?;
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = export::write_results(&conn, file)?;
            println!("Wrote {} rows to {}", rows, path.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> Result<rusqlite::Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

/// Every command that talks to upstream needs the cookie blob.
fn session(settings: &Settings) -> Result<Fetcher> {
    let cookies = Cookies::from_env()?;
    Fetcher::new(settings, &cookies)
}

async fn drain(
    conn: &rusqlite::Connection,
    fetcher: &Fetcher,
    size: usize,
    max_batches: Option<usize>,
) -> Result<()> {
    let remaining = db::get_stats(conn)?.unprocessed;
    if remaining == 0 {
        println!("Nothing to do. Run 'init' first or everything is processed.");
        return Ok(());
    }

    let pb = ProgressBar::new(remaining as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut batches = 0;
    let mut succeeded = 0;
    let mut failed = 0;
    while max_batches.map_or(true, |max| batches < max) {
        let report = match batch::run_batch(conn, fetcher, size).await? {
            BatchResult::Processed(report) => report,
            BatchResult::Done { .. } => break,
        };
        batches += 1;
        for r in &report.results {
            match r.status {
                db::Outcome::Success => succeeded += 1,
                db::Outcome::Error => failed += 1,
                _ => {}
            }
        }
        pb.inc(report.processed as u64);
        pb.set_message(format!("{} ok, {} errors", succeeded, failed));

        if report.rate_limited {
            pb.abandon_with_message("rate limited, stopping");
            println!(
                "{}",
                json!({ "stopped": "rate_limited", "position": report.end_index })
            );
            return Ok(());
        }
    }

    pb.finish_and_clear();
    println!(
        "Ran {} batches: {} succeeded, {} errors.",
        batches, succeeded, failed
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
