//! Command-line interface definitions.
//!
//! Every flag is optional: unset flags fall back to the YAML config, and the
//! YAML config falls back to built-in defaults. The xAI key is read from
//! `XAI_API_KEY` when not passed explicitly.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Scrape the PTT Stock board and summarize the day's sentiment.
///
/// # Examples
///
/// ```sh
/// # Today's posts into ./ptt_stock_articles_<MM-DD>.csv
/// ptt_stock_sentiment scrape
///
/// # A specific day, then analyze it locally and drop the bodies
/// ptt_stock_sentiment scrape --date 2025-05-02
/// ptt_stock_sentiment analyze --backend ollama --sanitize-csv
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect one day's posts into a CSV file
    Scrape(ScrapeArgs),
    /// Summarize an article CSV with a language model
    Analyze(AnalyzeArgs),
    /// Strip author, content and comments from an article CSV in place
    Sanitize {
        /// CSV file to rewrite
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Target day as MM-DD or YYYY-MM-DD (default: today, UTC+8)
    #[arg(short, long)]
    pub date: Option<String>,

    /// Maximum number of index pages to walk
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Pause between index pages, in milliseconds
    #[arg(long)]
    pub page_delay_ms: Option<u64>,

    /// Maximum cleaned body length, in characters
    #[arg(long)]
    pub max_length: Option<usize>,

    /// Directory for the article CSV
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Hosted xAI chat completions
    Xai,
    /// Local Ollama server
    Ollama,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Article CSV to analyze (default: newest in the articles directory)
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Where to write the Markdown summary
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Delete the CSV after a successful analysis
    #[arg(long)]
    pub remove_csv: bool,

    /// Keep only year, date, title and url in the CSV after analysis
    #[arg(long)]
    pub sanitize_csv: bool,

    #[arg(long, value_enum, default_value_t = BackendKind::Xai)]
    pub backend: BackendKind,

    /// Ollama server URL
    #[arg(long)]
    pub ollama_url: Option<String>,

    /// Model name for the selected backend
    #[arg(short, long)]
    pub model: Option<String>,

    /// Prompt template file
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// xAI API key
    #[arg(long, env = "XAI_API_KEY", hide_env_values = true)]
    pub xai_api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_parsing() {
        let cli = Cli::parse_from([
            "ptt_stock_sentiment",
            "scrape",
            "--date",
            "2025-05-02",
            "--max-pages",
            "3",
            "-o",
            "/tmp/articles",
        ]);

        assert!(cli.config.is_none());
        let Command::Scrape(args) = cli.command else {
            panic!("expected scrape");
        };
        assert_eq!(args.date.as_deref(), Some("2025-05-02"));
        assert_eq!(args.max_pages, Some(3));
        assert_eq!(args.page_delay_ms, None);
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/articles")));
    }

    #[test]
    fn test_analyze_flags() {
        let cli = Cli::parse_from([
            "ptt_stock_sentiment",
            "analyze",
            "--backend",
            "ollama",
            "--sanitize-csv",
            "--csv",
            "a.csv",
            "--config",
            "config.yaml",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("config.yaml")));
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.backend, BackendKind::Ollama);
        assert!(args.sanitize_csv);
        assert!(!args.remove_csv);
        assert_eq!(args.csv, Some(PathBuf::from("a.csv")));
    }

    #[test]
    fn test_sanitize_requires_file() {
        assert!(Cli::try_parse_from(["ptt_stock_sentiment", "sanitize"]).is_err());
        let cli = Cli::parse_from(["ptt_stock_sentiment", "sanitize", "x.csv"]);
        assert!(matches!(cli.command, Command::Sanitize { file } if file == PathBuf::from("x.csv")));
    }
}
