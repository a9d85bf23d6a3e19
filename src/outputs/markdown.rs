//! Markdown rendering of sentiment analysis results.
//!
//! ```text
//! # PTT Stock Sentiment Analysis (Ollama)
//! - 分析目標日期 (Target Day): 05-02
//! - 分析執行時間 (Analysis Time): 2025-05-02 23:10:00
//! - 模型: gpt-oss:20b
//!
//! <model output>
//! ```

use crate::error::Result;
use crate::models::AnalysisResult;
use crate::utils::write_atomic;
use std::fmt::Write;
use std::path::Path;
use tracing::{info, instrument};

pub const ANALYSIS_FILE_PREFIX: &str = "ptt_stock_sentiment_";

/// Default output file name for one analysis run.
pub fn analysis_file_name(target_label: &str, stamp: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{ANALYSIS_FILE_PREFIX}{target_label}_{stamp}_{suffix}.md"),
        None => format!("{ANALYSIS_FILE_PREFIX}{target_label}_{stamp}.md"),
    }
}

pub fn render_analysis(result: &AnalysisResult) -> String {
    let mut md = String::new();
    match &result.backend_label {
        Some(label) => writeln!(md, "# PTT Stock Sentiment Analysis ({label})").unwrap(),
        None => writeln!(md, "# PTT Stock Sentiment Analysis").unwrap(),
    }
    writeln!(md, "- 分析目標日期 (Target Day): {}", result.target_date).unwrap();
    writeln!(md, "- 分析執行時間 (Analysis Time): {}", result.analyzed_at).unwrap();
    if let Some(model) = &result.model {
        writeln!(md, "- 模型: {model}").unwrap();
    }
    md.push('\n');
    md.push_str(&result.body);
    md
}

#[instrument(level = "info", skip(result), fields(path = %path.display()))]
pub async fn write_analysis(result: &AnalysisResult, path: &Path) -> Result<()> {
    write_atomic(path, render_analysis(result).as_bytes()).await?;
    info!(body_chars = result.body.chars().count(), "Analysis saved");
    Ok(())
}
