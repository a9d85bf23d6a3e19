//! Error taxonomy for the scrape and analysis stages.
//!
//! Scrape-stage failures (board index pages, file writes) surface as
//! [`PttError`] and terminate the run. The analysis stage only treats
//! [`PttError::SourceNotFound`] and [`PttError::MissingPromptFile`] as fatal;
//! model transport failures are folded into the output file instead (see
//! [`crate::api::ApiError`]).

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the scraper, the CSV store, and the analysis pipeline.
#[derive(Error, Debug)]
pub enum PttError {
    /// No article CSV matched the naming pattern in the search directory.
    #[error("no article file matching {pattern} found in {dir}")]
    SourceNotFound { dir: PathBuf, pattern: String },

    /// The prompt template could not be read.
    #[error("prompt file {path} could not be read: {source}")]
    MissingPromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure talking to the board.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The board answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// A page was missing a structural element every page must have.
    #[error("{url} has no element matching {selector}")]
    MissingElement { url: String, selector: &'static str },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

pub type Result<T> = std::result::Result<T, PttError>;
