//! Data models for board listings, stored articles, and analysis results.
//!
//! This module defines the records that flow through the pipeline:
//! - [`BoardEntry`]: one listing row scraped from a board index page
//! - [`Article`]: the persisted unit, one CSV row
//! - [`ArticleBatch`]: everything a scrape run produced, plus its scan time
//! - [`AnalysisResult`]: one sentiment summary produced by the model
//!
//! Each stage produces a new value; nothing is mutated after it is written.

use serde::{Deserialize, Serialize};

/// A raw listing row from a board index page.
///
/// Entries only live until their article page has been fetched and merged
/// into an [`Article`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEntry {
    pub title: String,
    pub author: String,
    /// Absolute URL of the article page.
    pub url: String,
    /// The date exactly as the board rendered it, e.g. `5/02`.
    pub date: String,
}

/// One stored article.
///
/// `content` and `comments` never contain raw newlines: they are escaped to a
/// literal `\n` so every record stays on a single CSV line. Sanitized files
/// lack `author`, `content`, and `comments`; those read back empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Article {
    pub year: i32,
    pub date: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub comments: String,
}

impl Article {
    /// Merge a listing entry with its cleaned body and comment text.
    pub fn from_entry(entry: BoardEntry, year: i32, content: &str, comments: &str) -> Self {
        Self {
            year,
            date: entry.date,
            title: entry.title,
            author: entry.author,
            url: entry.url,
            content: escape_newlines(content),
            comments: escape_newlines(comments),
        }
    }
}

/// Replace real newlines with a literal `\n` and drop carriage returns.
pub fn escape_newlines(text: &str) -> String {
    text.replace('\r', "").replace('\n', "\\n")
}

/// The articles collected by one scrape run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleBatch {
    /// Wall-clock time the scrape finished, `%Y-%m-%d %H:%M:%S` in UTC+8.
    /// Files written by older tools may lack it.
    pub scanned_at: Option<String>,
    pub articles: Vec<Article>,
}

/// A sentiment summary for one target day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Board-style `MM-DD` label of the analyzed day.
    pub target_date: String,
    /// `%Y-%m-%d %H:%M:%S` local time of the analysis run.
    pub analyzed_at: String,
    pub model: Option<String>,
    /// Heading suffix naming the backend, e.g. `Ollama`.
    pub backend_label: Option<String>,
    pub body: String,
}
