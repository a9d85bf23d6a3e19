//! Board scraping: from index pages to a stored article CSV.
//!
//! The scrape follows a two-phase pattern:
//!
//! 1. **Indexing** ([`board`]): walk index pages backwards, keeping entries
//!    whose rendered date matches the target day ([`dates`])
//! 2. **Fetching** ([`article`]): download each matched post, split body from
//!    pushes, and clean the body ([`clean`])
//!
//! The cleaned articles are written as one [`ArticleBatch`] by
//! [`crate::outputs::records`].
//!
//! Index page failures abort the run. A single article that fails to
//! download or parse is logged, recorded in the report, and skipped.

pub mod article;
pub mod board;
pub mod clean;
pub mod dates;

use crate::config::BoardConfig;
use crate::error::Result;
use crate::models::{Article, ArticleBatch, BoardEntry};
use crate::outputs::records::{article_file_name, write_batch};
use crate::utils::{TIMESTAMP_FORMAT, taipei_now};
use board::BoardClient;
use dates::TargetDate;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};

/// Summary of one scrape run.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    /// Where the CSV went; `None` when nothing matched.
    pub output: Option<PathBuf>,
    pub saved: usize,
    /// Articles that could not be fetched, with the reason.
    pub failed: Vec<(String, String)>,
    pub pages_checked: usize,
    /// Raw rendered dates seen while walking, with their titles.
    pub seen_dates: BTreeMap<String, Vec<String>>,
}

/// Fetch and clean every matched entry, one at a time.
#[instrument(level = "info", skip_all, fields(count = entries.len()))]
pub async fn fetch_articles(
    client: &BoardClient,
    entries: Vec<BoardEntry>,
    year: i32,
    max_length: usize,
) -> (Vec<Article>, Vec<(String, String)>) {
    let results: Vec<std::result::Result<Article, (String, String)>> = stream::iter(entries)
        .then(|entry| async move {
            match article::fetch_article(client, &entry.url).await {
                Ok(page) => {
                    let content =
                        clean::clean_article_content(&page.body, Some(&entry.url), max_length);
                    debug!(url = %entry.url, "Fetched article");
                    Ok(Article::from_entry(entry, year, &content, &page.comments))
                }
                Err(e) => {
                    error!(error = %e, url = %entry.url, "Article fetch failed; skipping");
                    Err((entry.url, e.to_string()))
                }
            }
        })
        .collect()
        .await;

    let mut articles = Vec::new();
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(article) => articles.push(article),
            Err(failure) => failed.push(failure),
        }
    }
    info!(fetched = articles.len(), failed = failed.len(), "Fetched article contents");
    (articles, failed)
}

/// Scrape the target day and write `ptt_stock_articles_<MM-DD>.csv` into `output_dir`.
#[instrument(level = "info", skip_all, fields(target = %target.label()))]
pub async fn run_scrape(
    config: &BoardConfig,
    target: &TargetDate,
    output_dir: &Path,
) -> Result<ScrapeReport> {
    let client = BoardClient::new(config)?;
    let walk = board::walk_board(&client, target, config.max_pages, config.page_delay()).await?;

    for entry in &walk.entries {
        info!(
            "[{}/{}] {} ({}) -> {}",
            target.year, entry.date, entry.title, entry.author, entry.url
        );
    }
    debug!(seen_dates = ?walk.seen_dates.keys().collect::<Vec<_>>(), "Rendered dates on walked pages");

    let mut report = ScrapeReport {
        pages_checked: walk.pages_checked,
        seen_dates: walk.seen_dates,
        ..ScrapeReport::default()
    };

    if walk.entries.is_empty() {
        info!(pages = report.pages_checked, "No articles found to save");
        return Ok(report);
    }

    let (articles, failed) =
        fetch_articles(&client, walk.entries, target.year, config.max_content_length).await;
    report.failed = failed;

    if articles.is_empty() {
        info!("Every matched article failed to download; nothing saved");
        return Ok(report);
    }

    let batch = ArticleBatch {
        scanned_at: Some(taipei_now().format(TIMESTAMP_FORMAT).to_string()),
        articles,
    };
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(article_file_name(&target.label()));
    write_batch(&batch, &path).await?;

    report.saved = batch.articles.len();
    report.output = Some(path);
    Ok(report)
}
