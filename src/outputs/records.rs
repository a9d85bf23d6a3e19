//! The article CSV: writing, reading back, and sanitizing.
//!
//! # File Layout
//!
//! ```text
//! # scanned_at: 2025-05-02 22:03:01
//! "year","date","title","author","url","content","comments"
//! "2025","5/02","[新聞] ...","alice","https://...","line one\nline two","推 bob : ..."
//! ```
//!
//! Every field is quoted. `content` and `comments` carry literal `\n`
//! sequences in place of newlines, so each article is exactly one line.
//! Leading `#` lines are metadata and are skipped by readers.

use crate::error::Result;
use crate::models::{Article, ArticleBatch};
use crate::utils::write_atomic;
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

pub const ARTICLE_FILE_PREFIX: &str = "ptt_stock_articles_";
pub const ARTICLE_FILE_EXT: &str = ".csv";

const HEADER: [&str; 7] = ["year", "date", "title", "author", "url", "content", "comments"];
const SCANNED_AT_TAG: &str = "# scanned_at:";

/// File name for the articles of one target day, e.g. `ptt_stock_articles_05-02.csv`.
pub fn article_file_name(target_label: &str) -> String {
    format!("{ARTICLE_FILE_PREFIX}{target_label}{ARTICLE_FILE_EXT}")
}

/// Leading `#` metadata lines and the byte offset where the CSV body starts.
fn split_metadata(raw: &str) -> (Vec<&str>, usize) {
    let mut meta = Vec::new();
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        if !line.starts_with('#') {
            break;
        }
        meta.push(line.trim_end());
        offset += line.len();
    }
    (meta, offset)
}

fn scanned_at(meta: &[&str]) -> Option<String> {
    meta.iter()
        .find_map(|line| line.strip_prefix(SCANNED_AT_TAG))
        .map(|v| v.trim().to_string())
}

fn render_metadata(scanned_at: Option<&str>) -> String {
    scanned_at
        .map(|ts| format!("{SCANNED_AT_TAG} {ts}\n"))
        .unwrap_or_default()
}

/// Serialize a batch to CSV text.
pub fn render_batch(batch: &ArticleBatch) -> Result<Vec<u8>> {
    let mut out = render_metadata(batch.scanned_at.as_deref()).into_bytes();
    {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Always)
            .from_writer(&mut out);
        writer.write_record(HEADER)?;
        for article in &batch.articles {
            writer.serialize(article)?;
        }
        writer.flush()?;
    }
    Ok(out)
}

/// Write a batch to `path`, replacing any existing file atomically.
#[instrument(level = "info", skip(batch), fields(path = %path.display(), count = batch.articles.len()))]
pub async fn write_batch(batch: &ArticleBatch, path: &Path) -> Result<()> {
    let bytes = render_batch(batch)?;
    write_atomic(path, &bytes).await?;
    info!("Wrote article CSV");
    Ok(())
}

/// Parse CSV text produced by [`render_batch`].
pub fn parse_batch(raw: &str) -> Result<ArticleBatch> {
    let (meta, offset) = split_metadata(raw);
    let mut reader = ReaderBuilder::new().from_reader(raw[offset..].as_bytes());
    let articles = reader
        .deserialize::<Article>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ArticleBatch {
        scanned_at: scanned_at(&meta),
        articles,
    })
}

#[instrument(level = "info", fields(path = %path.display()))]
pub async fn read_batch(path: &Path) -> Result<ArticleBatch> {
    let raw = fs::read_to_string(path).await?;
    let batch = parse_batch(&raw)?;
    info!(count = batch.articles.len(), "Loaded article CSV");
    Ok(batch)
}

/// Only the `# scanned_at:` value, without parsing the rows.
pub async fn read_scanned_at(path: &Path) -> Result<Option<String>> {
    let raw = fs::read_to_string(path).await?;
    let (meta, _) = split_metadata(&raw);
    Ok(scanned_at(&meta))
}

/// The columns that survive sanitizing.
#[derive(Debug, Deserialize, Serialize)]
struct SanitizedRow {
    year: String,
    date: String,
    title: String,
    url: String,
}

/// Rewrite an article CSV in place keeping only `year`, `date`, `title`, `url`.
///
/// The scan timestamp line is preserved. The original is only replaced once
/// the sanitized copy is fully written.
#[instrument(level = "info", fields(path = %path.display()))]
pub async fn sanitize_file(path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path).await?;
    let (meta, offset) = split_metadata(&raw);

    let mut out = render_metadata(scanned_at(&meta).as_deref()).into_bytes();
    let mut count = 0usize;
    {
        let mut reader = ReaderBuilder::new().from_reader(raw[offset..].as_bytes());
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(&mut out);
        for row in reader.deserialize::<SanitizedRow>() {
            writer.serialize(row?)?;
            count += 1;
        }
        writer.flush()?;
    }

    write_atomic(path, &out).await?;
    info!(rows = count, "Sanitized article CSV");
    Ok(())
}

/// Delete an article CSV.
#[instrument(level = "info", fields(path = %path.display()))]
pub async fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).await?;
    info!("Removed article CSV");
    Ok(())
}
