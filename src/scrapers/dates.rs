//! Target-day resolution and board date matching.
//!
//! The board renders listing dates with inconsistent zero padding (`5/02`,
//! `05/02`, ...), depending on list width. Rather than re-parsing those
//! strings, a [`TargetDate`] precomputes every rendering it accepts and
//! matching is exact set membership. That keeps `1/12` from ever matching
//! `11/2` or `1/2`.

use chrono::{DateTime, Datelike, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, warn};

static STRICT_INPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d{4})-)?(\d{1,2})-(\d{1,2})$").unwrap());
static NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// A calendar day plus the finite set of strings the board may render it as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    renderings: BTreeSet<String>,
}

impl TargetDate {
    /// Build the rendering set for `month`/`day`.
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        let renderings = [
            format!("{month:02}/{day:02}"),
            format!("{month}/{day}"),
            format!("{month}/{day:02}"),
            format!("{month:02}/{day}"),
        ]
        .into_iter()
        .collect();
        Self {
            year,
            month,
            day,
            renderings,
        }
    }

    /// Today in the board's timezone.
    pub fn today(now: DateTime<FixedOffset>) -> Self {
        Self::new(now.year(), now.month(), now.day())
    }

    /// Resolve an optional user-supplied day (`MM-DD` or `YYYY-MM-DD`).
    ///
    /// Input that does not parse strictly goes through best-effort numeric
    /// extraction; if that also fails the result is today. Never errors.
    pub fn resolve(input: Option<&str>, now: DateTime<FixedOffset>) -> Self {
        let Some(raw) = input.map(str::trim) else {
            return Self::today(now);
        };

        let parsed = STRICT_INPUT
            .captures(raw)
            .and_then(|caps| {
                let year = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok());
                let month = caps[2].parse::<u32>().ok()?;
                let day = caps[3].parse::<u32>().ok()?;
                Some((year, month, day))
            })
            .or_else(|| {
                debug!(input = raw, "Date input not in MM-DD form; extracting numbers");
                extract_numbers(raw)
            });

        match parsed {
            Some((year, month, day)) if valid_month_day(month, day) => {
                let year = year.filter(|y| *y > 1900).unwrap_or_else(|| now.year());
                Self::new(year, month, day)
            }
            _ => {
                warn!(input = raw, "Unusable date input; falling back to today");
                Self::today(now)
            }
        }
    }

    /// Whether `rendered` is exactly one of the accepted renderings.
    pub fn matches(&self, rendered: &str) -> bool {
        self.renderings.contains(rendered)
    }

    pub fn renderings(&self) -> impl Iterator<Item = &str> {
        self.renderings.iter().map(String::as_str)
    }

    /// Zero-padded `MM-DD`, used in file names.
    pub fn label(&self) -> String {
        format!("{:02}-{:02}", self.month, self.day)
    }
}

fn extract_numbers(raw: &str) -> Option<(Option<i32>, u32, u32)> {
    let numbers: Vec<&str> = NUMBERS.find_iter(raw).map(|m| m.as_str()).collect();
    match numbers.as_slice() {
        [month, day] => Some((None, month.parse().ok()?, day.parse().ok()?)),
        [year, month, day] => Some((year.parse().ok(), month.parse().ok()?, day.parse().ok()?)),
        _ => None,
    }
}

fn valid_month_day(month: u32, day: u32) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day)
}
