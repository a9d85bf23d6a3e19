//! Files written by the pipeline.
//!
//! # Submodules
//!
//! - [`records`]: the article CSV (scan line, header, one row per article),
//!   plus the sanitizer that strips it down to metadata
//! - [`markdown`]: the sentiment summary written by the analyzer
//!
//! # Output Structure
//!
//! ```text
//! articles_dir/
//! ├── ptt_stock_articles_05-01.csv
//! └── ptt_stock_articles_05-02.csv
//!
//! analysis_dir/
//! ├── ptt_stock_sentiment_05-01_2025-05-01_220301.md
//! └── ptt_stock_sentiment_05-02_2025-05-02_221544_ollama.md
//! ```

pub mod markdown;
pub mod records;
