mod db;
mod error;
mod export;
mod job;
mod parser;
mod scheduler;
mod settings;
mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use job::ScrapeJob;
use scheduler::Scheduler;
use settings::Settings;

#[derive(Parser)]
#[command(name = "hn_links", about = "Collect links posted in top-level Hacker News comments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the discussion page once and store new links
    Scrape {
        /// Also write the full table to CSV afterwards
        #[arg(long)]
        csv: bool,
        /// CSV destination
        #[arg(short, long, default_value = "hn_links.csv")]
        output: PathBuf,
        /// Item id to scrape (default: configured post)
        #[arg(long)]
        post_id: Option<String>,
    },
    /// Serve the link table and refresh it in the background
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write the full table to CSV without scraping
    Export {
        #[arg(short, long, default_value = "hn_links.csv")]
        output: PathBuf,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;

    match cli.command {
        Commands::Scrape { csv, output, post_id } => {
            let post_id = post_id.unwrap_or_else(|| settings.post_id.clone());
            println!("Scraping HN post: {}", settings::item_url(&settings.base_url, &post_id));
            println!("Fetching top-level comments and extracting links...");

            let job = ScrapeJob::from_settings(&settings)?;
            let new = job
                .run(&post_id)
                .await
                .with_context(|| format!("Scrape of item {post_id} failed"))?;

            let conn = db::initialize(&settings.db_file)?;
            let stats = db::get_stats(&conn)?;
            println!("\nSummary:");
            println!("  New links added:          {}", new);
            println!("  Total links in database:  {}", stats.total);
            println!("  Unique authors:           {}", stats.authors);

            if csv {
                let rows = db::export_all(&conn)?;
                export::export_to_file(&output, &rows)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!("Exported {} links to {}", rows.len(), output.display());
            }
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.host.clone());
            let port = port.unwrap_or(settings.port);
            run_server(&settings, &format!("{host}:{port}")).await?;
        }
        Commands::Export { output } => {
            let conn = db::initialize(&settings.db_file)?;
            let rows = db::export_all(&conn)?;
            export::export_to_file(&output, &rows)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Exported {} links to {}", rows.len(), output.display());
        }
        Commands::Stats => {
            let conn = db::initialize(&settings.db_file)?;
            let s = db::get_stats(&conn)?;
            println!("Database:  {}", settings.db_file.display());
            println!("Links:     {}", s.total);
            println!("Authors:   {}", s.authors);
            match s.newest {
                Some(ts) => println!("Last seen: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("Last seen: never"),
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    Ok(())
}

async fn run_server(settings: &Settings, addr: &str) -> anyhow::Result<()> {
    // fail on an unusable store before anything is scheduled
    db::initialize(&settings.db_file)
        .with_context(|| format!("Failed to open {}", settings.db_file.display()))?;

    let job = Arc::new(ScrapeJob::from_settings(settings)?);
    let scheduler = Scheduler::start(
        Arc::clone(&job),
        settings.post_id.clone(),
        settings.scrape_interval(),
    );
    scheduler.warm_up().await;

    let state = Arc::new(web::AppState {
        db_file: settings.db_file.clone(),
        per_page: settings.per_page,
    });
    let served = web::serve(state, addr, shutdown_signal()).await;

    info!("Shutting down scheduler");
    scheduler.shutdown().await;
    served.with_context(|| format!("Server on {addr} failed"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
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
