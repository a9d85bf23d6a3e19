//! Article pages: separating the post body from its pushes.
//!
//! A post lives in `#main-content`. Header metadata and the push (comment)
//! rows are nested inside that same container, so body extraction walks the
//! tree and skips those subtrees instead of taking the container's full text.
//! Pushes are then read separately from the whole document.

use crate::error::{PttError, Result};
use crate::scrapers::board::BoardClient;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, instrument};

static MAIN_CONTENT: Lazy<Selector> = Lazy::new(|| Selector::parse("div#main-content").unwrap());
static PUSH: Lazy<Selector> = Lazy::new(|| Selector::parse("div.push").unwrap());
static PUSH_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("span.push-tag").unwrap());
static PUSH_USER: Lazy<Selector> = Lazy::new(|| Selector::parse("span.push-userid").unwrap());
static PUSH_CONTENT: Lazy<Selector> = Lazy::new(|| Selector::parse("span.push-content").unwrap());

const EXCLUDED_CLASSES: [&str; 3] = ["article-metaline", "article-metaline-right", "push"];

/// Body text and pushes of one article, each newline-joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticlePage {
    pub body: String,
    pub comments: String,
}

fn is_excluded(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    match value.name() {
        "script" | "style" => true,
        "div" | "span" => value.classes().any(|c| EXCLUDED_CLASSES.contains(&c)),
        _ => false,
    }
}

fn collect_text(el: ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    out.push(text.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    if !is_excluded(&child) {
                        collect_text(child, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn span_text(push: ElementRef<'_>, selector: &Selector) -> Option<String> {
    push.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Split an article page into body text and `tag user content` push lines.
///
/// Pushes missing any of the three parts are dropped.
pub fn parse_article(html: &str, url: &str) -> Result<ArticlePage> {
    let document = Html::parse_document(html);
    let main = document
        .select(&MAIN_CONTENT)
        .next()
        .ok_or_else(|| PttError::MissingElement {
            url: url.to_string(),
            selector: "div#main-content",
        })?;

    let mut lines = Vec::new();
    collect_text(main, &mut lines);

    let comments: Vec<String> = document
        .select(&PUSH)
        .filter_map(|push| {
            let tag = span_text(push, &PUSH_TAG)?;
            let user = span_text(push, &PUSH_USER)?;
            let content = span_text(push, &PUSH_CONTENT)?;
            Some(format!("{tag} {user} {content}"))
        })
        .collect();

    Ok(ArticlePage {
        body: lines.join("\n"),
        comments: comments.join("\n"),
    })
}

/// Download and parse one article page.
#[instrument(level = "info", skip(client))]
pub async fn fetch_article(client: &BoardClient, url: &str) -> Result<ArticlePage> {
    let html = client.fetch_page(url).await?;
    let page = parse_article(&html, url)?;
    debug!(
        body_chars = page.body.chars().count(),
        pushes = page.comments.lines().count(),
        "Parsed article"
    );
    Ok(page)
}
