//! # PTT Stock Sentiment
//!
//! Collects one day's posts from the PTT Stock board and summarizes the
//! market mood with a language model.
//!
//! ## Usage
//!
//! ```sh
//! ptt_stock_sentiment scrape --date 05-02
//! ptt_stock_sentiment analyze --backend ollama
//! ptt_stock_sentiment sanitize ptt_stock_articles_05-02.csv
//! ```
//!
//! ## Architecture
//!
//! The tool is two independent stages joined by a CSV file:
//! 1. **Scrape**: walk index pages for the target day, fetch and clean each
//!    matched post, and write `ptt_stock_articles_<MM-DD>.csv`
//! 2. **Analyze**: read the newest CSV, chain the previous day's summary into
//!    the prompt, ask the model, and write a Markdown report
//!
//! Everything runs sequentially; the board is crawled politely, one request
//! at a time.

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod analyzer;
mod api;
mod cli;
mod config;
mod error;
mod models;
mod outputs;
mod scrapers;
mod utils;

use analyzer::AnalyzeOptions;
use api::Backend;
use cli::{AnalyzeArgs, BackendKind, Cli, Command, ScrapeArgs};
use config::AppConfig;
use outputs::records;
use scrapers::dates::TargetDate;
use utils::{ensure_writable_dir, taipei_now};

/// Load `~/.env` into the process environment when it exists.
fn load_home_env() {
    let Some(home) = std::env::var_os("HOME") else {
        return;
    };
    let path = PathBuf::from(home).join(".env");
    if !path.exists() {
        return;
    }
    match dotenvy::from_path(&path) {
        Ok(()) => debug!(path = %path.display(), "Loaded environment file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not read environment file"),
    }
}

#[instrument(level = "info", skip_all)]
async fn scrape(config: &mut AppConfig, args: ScrapeArgs) -> Result<(), Box<dyn Error>> {
    if let Some(max_pages) = args.max_pages {
        config.board.max_pages = max_pages;
    }
    if let Some(delay) = args.page_delay_ms {
        config.board.page_delay_ms = delay;
    }
    if let Some(max_length) = args.max_length {
        config.board.max_content_length = max_length;
    }
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| config.paths.articles_dir.clone());

    if let Err(e) = ensure_writable_dir(&output_dir).await {
        error!(
            path = %output_dir.display(),
            error = %e,
            "Article directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let target = TargetDate::resolve(args.date.as_deref(), taipei_now());
    info!(
        target = %target.label(),
        renderings = ?target.renderings().collect::<Vec<_>>(),
        max_pages = config.board.max_pages,
        "Scraping board"
    );

    let report = scrapers::run_scrape(&config.board, &target, &output_dir).await?;

    for (url, reason) in &report.failed {
        warn!(%url, %reason, "Article skipped");
    }
    match &report.output {
        Some(path) => info!(
            path = %path.display(),
            saved = report.saved,
            failed = report.failed.len(),
            pages = report.pages_checked,
            "Saved articles"
        ),
        None => {
            info!(pages = report.pages_checked, "No articles saved");
            for (date, titles) in &report.seen_dates {
                debug!(%date, count = titles.len(), "Seen date");
            }
        }
    }
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn analyze(config: &mut AppConfig, args: AnalyzeArgs) -> Result<(), Box<dyn Error>> {
    if let Some(url) = args.ollama_url {
        config.ollama.url = url;
    }
    if let Some(model) = args.model {
        match args.backend {
            BackendKind::Xai => config.xai.model = model,
            BackendKind::Ollama => config.ollama.model = model,
        }
    }
    if let Some(prompt_file) = args.prompt_file {
        config.paths.prompt_file = prompt_file;
    }

    let backend = match args.backend {
        BackendKind::Xai => {
            if args.xai_api_key.is_none() {
                warn!("XAI_API_KEY is not set; the analysis will carry an error marker");
            }
            Backend::xai(config, args.xai_api_key)
        }
        BackendKind::Ollama => Backend::ollama(config),
    };
    info!(model = %backend.model(), backend = ?args.backend, "Selected backend");

    let opts = AnalyzeOptions {
        csv: args.csv,
        output: args.output,
        articles_dir: config.paths.articles_dir.clone(),
        analysis_dir: config.paths.analysis_dir.clone(),
        prompt_file: config.paths.prompt_file.clone(),
        remove_source: args.remove_csv,
        sanitize_source: args.sanitize_csv,
    };

    let output = analyzer::run_analysis(&opts, &backend, Local::now().fixed_offset()).await?;
    info!(path = %output.display(), "Analysis written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    load_home_env();

    // Parse CLI after the env file so `XAI_API_KEY` can come from it
    let args = Cli::parse();
    debug!(?args.config, "Parsed CLI arguments");

    let mut config = AppConfig::load(args.config.as_deref())?;

    let result = match args.command {
        Command::Scrape(scrape_args) => scrape(&mut config, scrape_args).await,
        Command::Analyze(analyze_args) => analyze(&mut config, analyze_args).await,
        Command::Sanitize { file } => records::sanitize_file(&file).await.map_err(Into::into),
    };
    if let Err(e) = &result {
        error!(error = %e, "Run failed");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    result
}
