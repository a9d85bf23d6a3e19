//! Board index pages: fetching, parsing, and walking backwards through them.
//!
//! An index page lists posts newest-last inside `div.r-ent` rows and links to
//! the previous (older) page from the paging bar. The walker starts at the
//! board's front index and follows that link until it runs out of pages or
//! hits the page budget.

use crate::config::BoardConfig;
use crate::error::{PttError, Result};
use crate::models::BoardEntry;
use crate::scrapers::dates::TargetDate;
use once_cell::sync::Lazy;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

static ENTRY: Lazy<Selector> = Lazy::new(|| Selector::parse("div.r-ent").unwrap());
static DATE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.date").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.title").unwrap());
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("div.title a[href]").unwrap());
static AUTHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.author").unwrap());
static PAGING_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.btn-group-paging a[href]").unwrap());

const PREV_PAGE_LABEL: &str = "上頁";

/// HTTP client preconfigured with the board's user agent and gate cookie.
#[derive(Debug, Clone)]
pub struct BoardClient {
    client: reqwest::Client,
    base_url: Url,
    index_url: Url,
}

impl BoardClient {
    pub fn new(config: &BoardConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert(COOKIE, HeaderValue::from_str(&config.cookie)?);
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        let base_url = Url::parse(&config.base_url)?;
        let index_url = base_url.join(&config.index_path)?;
        Ok(Self {
            client,
            base_url,
            index_url,
        })
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    /// GET a page and return its body, failing on any non-2xx status.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PttError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }

    fn resolve(&self, href: &str) -> Option<String> {
        self.base_url.join(href).ok().map(|u| u.to_string())
    }
}

/// One `div.r-ent` row. `entry` is `None` when the row lacks a title link or
/// an author (deleted posts, for example).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub date: String,
    /// Visible title text, kept even for malformed rows.
    pub heading: String,
    pub entry: Option<BoardEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPage {
    pub rows: Vec<ListingRow>,
    pub prev_page: Option<String>,
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Parse one index page. Relative links are resolved against `client`'s base URL.
pub fn parse_index(html: &str, client: &BoardClient) -> IndexPage {
    let document = Html::parse_document(html);

    let rows = document
        .select(&ENTRY)
        .map(|row| {
            let date = row.select(&DATE).next().map(element_text).unwrap_or_default();
            let heading = row.select(&TITLE).next().map(element_text).unwrap_or_default();
            let link = row.select(&TITLE_LINK).next();
            let author = row
                .select(&AUTHOR)
                .next()
                .map(element_text)
                .filter(|a| !a.is_empty());

            let entry = match (link, author) {
                (Some(link), Some(author)) => {
                    let title = element_text(link);
                    let url = link.value().attr("href").and_then(|h| client.resolve(h));
                    match url {
                        Some(url) if !title.is_empty() => Some(BoardEntry {
                            title,
                            author,
                            url,
                            date: date.clone(),
                        }),
                        _ => None,
                    }
                }
                _ => None,
            };

            ListingRow {
                date,
                heading,
                entry,
            }
        })
        .collect();

    let prev_page = document
        .select(&PAGING_LINK)
        .find(|a| a.text().any(|t| t.contains(PREV_PAGE_LABEL)))
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| client.resolve(href));

    IndexPage { rows, prev_page }
}

/// What a walk over the index pages found.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Entries whose date matched, in page order (newest page first).
    pub entries: Vec<BoardEntry>,
    /// Every raw date string seen, mapped to the titles listed under it.
    pub seen_dates: BTreeMap<String, Vec<String>>,
    pub pages_checked: usize,
}

/// Walk backwards from the board's front index collecting entries dated `target`.
///
/// Stops when a page has no previous-page link or after `max_pages` pages.
/// A failed index fetch aborts the walk.
#[instrument(level = "info", skip_all, fields(target = %target.label(), max_pages))]
pub async fn walk_board(
    client: &BoardClient,
    target: &TargetDate,
    max_pages: usize,
    page_delay: Duration,
) -> Result<WalkOutcome> {
    let mut outcome = WalkOutcome::default();
    let mut next = Some(client.index_url().to_string());

    while let Some(url) = next.take() {
        if outcome.pages_checked >= max_pages {
            break;
        }
        let html = client.fetch_page(&url).await?;
        let page = parse_index(&html, client);
        outcome.pages_checked += 1;

        let mut kept = 0usize;
        for row in page.rows {
            outcome
                .seen_dates
                .entry(row.date.clone())
                .or_default()
                .push(row.heading.clone());

            if !target.matches(&row.date) {
                continue;
            }
            match row.entry {
                Some(entry) => {
                    kept += 1;
                    outcome.entries.push(entry);
                }
                None => warn!(date = %row.date, heading = %row.heading, "Skipping malformed entry"),
            }
        }
        debug!(%url, kept, page = outcome.pages_checked, "Scanned index page");

        next = page.prev_page;
        if next.is_some() && outcome.pages_checked < max_pages && !page_delay.is_zero() {
            sleep(page_delay).await;
        }
    }

    info!(
        pages = outcome.pages_checked,
        matched = outcome.entries.len(),
        distinct_dates = outcome.seen_dates.len(),
        "Board walk finished"
    );
    Ok(outcome)
}
