//! Article body cleanup before storage.
//!
//! Board posts tend to repeat themselves: replies quote the original text,
//! footers repeat the article URL, and the signature block carries origin
//! lines. Cleaning splits the body at the first `--` line into a main part
//! and a signature/reply part, drops noise lines from each, deduplicates
//! lines in first-seen order, and caps the result at a maximum length.
//!
//! Cleaning is idempotent: running it on its own output changes nothing.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_MAX_LENGTH: usize = 2000;

/// Appended when the cleaned body had to be cut.
pub const TRUNCATION_MARKER: &str = "\n...（已截斷）";

const SEPARATOR: &str = "--";
const LITERAL_NEWLINE: &str = "\\n";
const SIGNATURE_PREFIXES: [&str; 2] = ["※ 發信站:", "※ 文章網址:"];
const ORIGIN_PREFIXES: [&str; 1] = ["◆ From:"];

static URL_ANNOUNCEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:※\s*)?(?:文章網址|網址)[:：]?\s*https?://").unwrap());
static NEWLINE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\\n|\n){2,}").unwrap());

/// Trim whitespace and literal `\n` sequences from both ends of a line.
fn tidy(line: &str) -> &str {
    let mut line = line.trim();
    loop {
        let rest = line
            .strip_prefix(LITERAL_NEWLINE)
            .or_else(|| line.strip_suffix(LITERAL_NEWLINE));
        match rest {
            Some(rest) => line = rest.trim(),
            None => return line,
        }
    }
}

/// Tidied lines, split at the first line that is exactly `--`.
fn split_signature(text: &str) -> (Vec<&str>, Vec<&str>) {
    let mut lines: Vec<&str> = text.lines().map(tidy).collect();
    match lines.iter().position(|line| *line == SEPARATOR) {
        Some(at) => {
            let reply = lines.split_off(at + 1);
            lines.pop();
            (lines, reply)
        }
        None => (lines, Vec::new()),
    }
}

fn is_signature_noise(line: &str) -> bool {
    line.is_empty()
        || SIGNATURE_PREFIXES.iter().any(|p| line.starts_with(p))
        || ORIGIN_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Everything except truncation.
fn normalize(raw: &str, url: Option<&str>) -> String {
    // Runs of literal or real newlines become line breaks before any line is judged.
    let collapsed = NEWLINE_RUNS.replace_all(raw, "\n");
    let (main, reply) = split_signature(&collapsed);

    let main = main
        .into_iter()
        .filter(|line| !line.is_empty())
        .filter(|line| !URL_ANNOUNCEMENT.is_match(line))
        .filter(|line| Some(*line) != url)
        .unique()
        .join("\n");

    let reply = reply
        .into_iter()
        .filter(|line| !is_signature_noise(line))
        .unique()
        .join("\n");

    if reply.is_empty() {
        main
    } else if main.is_empty() {
        format!("{SEPARATOR}\n{reply}")
    } else {
        format!("{main}\n{SEPARATOR}\n{reply}")
    }
}

/// Clean a raw article body.
///
/// `url` is the article's own address; a line consisting of just that URL is
/// dropped. The output never exceeds `max_length` characters plus
/// [`TRUNCATION_MARKER`].
pub fn clean_article_content(raw: &str, url: Option<&str>, max_length: usize) -> String {
    let cleaned = normalize(raw, url);
    if cleaned.chars().count() <= max_length {
        return cleaned;
    }

    // Already carries the marker from an earlier pass.
    let marker_line = TRUNCATION_MARKER.trim_start();
    if let Some(kept) = cleaned.strip_suffix(marker_line) {
        if kept.trim_end().chars().count() <= max_length {
            return cleaned;
        }
    }

    let prefix: String = cleaned.chars().take(max_length).collect();
    let prefix = normalize(&prefix, url);
    if prefix.is_empty() {
        marker_line.to_string()
    } else {
        format!("{prefix}{TRUNCATION_MARKER}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn clean(raw: &str) -> String {
        clean_article_content(raw, None, DEFAULT_MAX_LENGTH)
    }

    fn assert_unique_per_segment(text: &str) {
        let (main, reply) = split_signature(text);
        for segment in [main, reply] {
            let mut seen = HashSet::new();
            for line in segment.into_iter().filter(|l| !l.is_empty()) {
                assert!(seen.insert(line), "duplicate line {line:?} in {text:?}");
            }
        }
    }

    #[test]
    fn test_dedupes_and_strips_signature() {
        let raw = "標題行\n標題行\n--\n※ 發信站: abc\n回覆內容\n回覆內容";
        assert_eq!(clean(raw), "標題行\n--\n回覆內容");
    }

    #[test]
    fn test_no_separator_keeps_main_only() {
        assert_eq!(clean("  a  \n\n b\n a\n"), "a\nb");
    }

    #[test]
    fn test_signature_only_reply_is_dropped() {
        let raw = "內文\n--\n※ 發信站: 批踢踢實業坊(ptt.cc)\n◆ From: 1.2.3.4\n\n";
        assert_eq!(clean(raw), "內文");
    }

    #[test]
    fn test_url_lines_removed_from_main() {
        let url = "https://www.ptt.cc/bbs/Stock/M.1.A.1.html";
        let raw = format!(
            "新聞內容\n網址：https://news.example.com/a\n文章網址: http://x.y\n{url}\n網址 不是連結"
        );
        assert_eq!(
            clean_article_content(&raw, Some(url), DEFAULT_MAX_LENGTH),
            "新聞內容\n網址 不是連結"
        );
    }

    #[test]
    fn test_article_url_footer_removed_from_reply() {
        let raw = "內文\n--\n※ 文章網址: https://www.ptt.cc/bbs/Stock/M.1.html\n補充";
        assert_eq!(clean(raw), "內文\n--\n補充");
    }

    #[test]
    fn test_only_first_separator_splits() {
        let raw = "a\n--\nb\n--\nb";
        assert_eq!(clean(raw), "a\n--\nb\n--");
    }

    #[test]
    fn test_literal_newline_runs_collapse() {
        assert_eq!(clean("a\\n\\n\\nb"), "a\nb");
    }

    #[test]
    fn test_truncation_adds_marker() {
        let raw = "一".repeat(50);
        let out = clean_article_content(&raw, None, 10);
        assert_eq!(out, format!("{}{}", "一".repeat(10), TRUNCATION_MARKER));
        assert!(out.chars().count() <= 10 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_truncation_never_leaves_duplicate_partial_line() {
        let raw = "abcdef\nxyz\nabc";
        let out = clean_article_content(raw, None, 14);
        assert_eq!(out, "abcdef\nxyz\nabc");
        let out = clean_article_content("abc\nxyz\nabcdef", None, 11);
        assert_eq!(out, format!("abc\nxyz{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_zero_length_budget() {
        assert_eq!(clean_article_content("hello", None, 0), "...（已截斷）");
        assert_eq!(clean_article_content("", None, 0), "");
    }

    #[test]
    fn test_idempotent() {
        let long_reply = (0..300).map(|i| format!("回覆{i}")).join("\n");
        let samples = [
            "標題行\n標題行\n--\n※ 發信站: abc\n回覆內容\n回覆內容".to_string(),
            "  x \n\n\n y\n--\n\n--\nz".to_string(),
            "--\n只有回覆".to_string(),
            format!("主文\n{}\n--\n{long_reply}", "長".repeat(1500)),
            "一".repeat(5000),
            "a\\n\\nb".to_string(),
            "a\\n\\na".to_string(),
            "x\\n\\n y".to_string(),
            "重複\\n\\n重複\n重複\\n\n--\n回覆\\n\\n 回覆".to_string(),
        ];
        for max in [0, 5, 100, DEFAULT_MAX_LENGTH] {
            for raw in &samples {
                let once = clean_article_content(raw, None, max);
                let twice = clean_article_content(&once, None, max);
                assert_eq!(once, twice, "max={max} raw={raw:?}");
            }
        }
    }

    #[test]
    fn test_length_bound_and_uniqueness() {
        let raw = (0..400)
            .map(|i| format!("第{}行 重複內容", i % 37))
            .join("\n")
            + "\n--\n"
            + &(0..200).map(|i| format!("推文{}", i % 11)).join("\n");
        let escaped = (0..120)
            .map(|i| format!("  段落{}\\n\\n", i % 9))
            .join("")
            + "\n--\n"
            + &"推\\n\\n推\\n".repeat(40);
        for max in [1, 50, 500, DEFAULT_MAX_LENGTH] {
            for raw in [&raw, &escaped] {
                let out = clean_article_content(raw, None, max);
                assert!(out.chars().count() <= max + TRUNCATION_MARKER.chars().count());
                assert_unique_per_segment(&out);
            }
        }
    }

    #[test]
    fn test_literal_newline_runs_are_deduped_and_trimmed() {
        assert_eq!(clean("a\\n\\na"), "a");
        assert_eq!(clean("x\\n\\n y"), "x\ny");
        assert_eq!(clean("單行\\n保留"), "單行\\n保留");
        assert_eq!(clean("內文\\n\\n--\\n\\n回覆\\n"), "內文\n--\n回覆");
    }
}
