//! The sentiment pipeline: article CSV in, Markdown summary out.
//!
//! The run is linear:
//!
//! 1. **Select source**: explicit CSV, or the newest `ptt_stock_articles_*.csv`
//! 2. **Load prompt**: the template file is required
//! 3. **Prior summary**: the previous day's analysis, prepended when present
//! 4. **Load articles** and **build input**: one text block per article
//! 5. **Invoke** the configured backend (errors become an inline marker)
//! 6. **Persist** the Markdown result
//! 7. **Post-process** the source CSV (sanitize/remove), failures only logged
//!
//! Only a missing source or prompt aborts the run; otherwise a result file is
//! always written.

use crate::api::Backend;
use crate::error::{PttError, Result};
use crate::models::{AnalysisResult, Article};
use crate::outputs::markdown::{ANALYSIS_FILE_PREFIX, analysis_file_name, write_analysis};
use crate::outputs::records::{self, ARTICLE_FILE_EXT, ARTICLE_FILE_PREFIX};
use crate::utils::TIMESTAMP_FORMAT;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

const PRIOR_SUMMARY_LABEL: &str = "【前一日分析摘要】";

/// Inputs for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Explicit CSV; otherwise the newest match in `articles_dir`.
    pub csv: Option<PathBuf>,
    /// Explicit output path; otherwise derived inside `analysis_dir`.
    pub output: Option<PathBuf>,
    pub articles_dir: PathBuf,
    pub analysis_dir: PathBuf,
    pub prompt_file: PathBuf,
    pub remove_source: bool,
    pub sanitize_source: bool,
}

/// Newest `ptt_stock_articles_*.csv` in `dir` by modification time.
#[instrument(level = "info", fields(dir = %dir.display()))]
pub async fn find_latest_source(dir: &Path) -> Result<PathBuf> {
    let not_found = || PttError::SourceNotFound {
        dir: dir.to_path_buf(),
        pattern: format!("{ARTICLE_FILE_PREFIX}*{ARTICLE_FILE_EXT}"),
    };

    let mut entries = fs::read_dir(dir).await.map_err(|_| not_found())?;
    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(ARTICLE_FILE_PREFIX) && name.ends_with(ARTICLE_FILE_EXT)) {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if latest.as_ref().is_none_or(|(best, _)| modified > *best) {
            latest = Some((modified, entry.path()));
        }
    }

    let (_, path) = latest.ok_or_else(not_found)?;
    info!(path = %path.display(), "Selected newest article file");
    Ok(path)
}

/// Target day label and run stamp encoded in an article file name.
///
/// `ptt_stock_articles_04-14_20250415-2203.csv` carries both; for the plain
/// `ptt_stock_articles_04-16.csv` form the stamp is taken from the file's
/// `# scanned_at:` line (`2025-04-16 22:03:01` becomes `2025-04-16_220301`).
pub async fn source_labels(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parts: Vec<&str> = stem.split('_').collect();

    match parts.as_slice() {
        [_, _, _, target, stamp, ..] => (target.to_string(), stamp.to_string()),
        [_, _, _, target] => {
            let stamp = match records::read_scanned_at(path).await {
                Ok(Some(ts)) => ts.replace(' ', "_").replace(':', ""),
                Ok(None) => String::new(),
                Err(e) => {
                    warn!(error = %e, "Could not read scan time from source");
                    String::new()
                }
            };
            (target.to_string(), stamp)
        }
        _ => ("Unknown".to_string(), String::new()),
    }
}

/// Read the prompt template; there is no built-in fallback.
pub async fn load_prompt(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|source| PttError::MissingPromptFile {
            path: path.to_path_buf(),
            source,
        })
}

/// `MM-DD` of the day before `label`, or `None` if `label` is not a day.
pub fn previous_day_label(label: &str, year: i32) -> Option<String> {
    let (month, day) = label.split_once('-')?;
    let (month, day) = (month.parse::<u32>().ok()?, day.parse::<u32>().ok()?);
    // 02-29 outside leap years still has a predecessor.
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(2000, month, day))?;
    Some((date - Duration::days(1)).format("%m-%d").to_string())
}

/// Most recently modified analysis file for the day before `target_label`.
///
/// Ties on modification time go to the lexicographically last name.
#[instrument(level = "info", fields(dir = %dir.display()))]
pub async fn find_prior_summary(dir: &Path, target_label: &str, year: i32) -> Option<PathBuf> {
    let prev = previous_day_label(target_label, year)?;
    let prefix = format!("{ANALYSIS_FILE_PREFIX}{prev}_");

    let mut entries = fs::read_dir(dir).await.ok()?;
    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.starts_with(&prefix) && name.ends_with(".md")) {
            continue;
        }
        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable summary");
                continue;
            }
        };
        let candidate = (modified, entry.path());
        if latest.as_ref().is_none_or(|best| candidate > *best) {
            latest = Some(candidate);
        }
    }
    latest.map(|(_, path)| path)
}

/// Prefix `prompt` with the previous day's summary.
pub fn with_prior_context(prior: &str, prompt: &str) -> String {
    format!("{PRIOR_SUMMARY_LABEL}\n{prior}\n\n{prompt}")
}

/// One text block per article, in file order.
pub fn build_input(articles: &[Article]) -> String {
    articles
        .iter()
        .map(|a| {
            format!(
                "【標題】{}\n【作者】{}\n【日期】{}/{}\n【內文】{}\n【留言】{}\n---",
                a.title, a.author, a.year, a.date, a.content, a.comments
            )
        })
        .join("\n")
}

async fn post_process(opts: &AnalyzeOptions, source: &Path) {
    if opts.sanitize_source {
        if let Err(e) = records::sanitize_file(source).await {
            error!(path = %source.display(), error = %e, "Failed to sanitize source CSV");
        }
    }
    if opts.remove_source {
        if let Err(e) = records::remove_file(source).await {
            error!(path = %source.display(), error = %e, "Failed to remove source CSV");
        }
    }
}

/// Run the whole pipeline and return the path of the written analysis.
#[instrument(level = "info", skip_all)]
pub async fn run_analysis(
    opts: &AnalyzeOptions,
    backend: &Backend,
    now: DateTime<FixedOffset>,
) -> Result<PathBuf> {
    let source = match &opts.csv {
        Some(path) => path.clone(),
        None => find_latest_source(&opts.articles_dir).await?,
    };
    let (target_label, stamp) = source_labels(&source).await;
    info!(source = %source.display(), %target_label, %stamp, "Analyzing article file");

    let output = match &opts.output {
        Some(path) => path.clone(),
        None => {
            fs::create_dir_all(&opts.analysis_dir).await?;
            let suffix = backend.label().map(str::to_lowercase);
            opts.analysis_dir
                .join(analysis_file_name(&target_label, &stamp, suffix.as_deref()))
        }
    };

    let mut prompt = load_prompt(&opts.prompt_file).await?;

    match find_prior_summary(&opts.analysis_dir, &target_label, now.year()).await {
        Some(prior_path) => match fs::read_to_string(&prior_path).await {
            Ok(prior) => {
                info!(path = %prior_path.display(), "Chaining previous day's summary");
                prompt = with_prior_context(&prior, &prompt);
            }
            Err(e) => warn!(path = %prior_path.display(), error = %e, "Could not read previous summary"),
        },
        None => info!("No previous day's summary found"),
    }

    let batch = records::read_batch(&source).await?;
    let input = build_input(&batch.articles);
    debug!(articles = batch.articles.len(), input_chars = input.chars().count(), "Built model input");

    let body = backend.analyze(&prompt, &input).await;

    let result = AnalysisResult {
        target_date: target_label,
        analyzed_at: now.format(TIMESTAMP_FORMAT).to_string(),
        model: Some(backend.model().to_string()),
        backend_label: backend.label().map(str::to_string),
        body,
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    write_analysis(&result, &output).await?;

    post_process(opts, &source).await;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{OllamaClient, RetryAsk};
    use crate::models::{ArticleBatch, escape_newlines};
    use crate::outputs::records::{article_file_name, write_batch};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROMPT: &str = "請分析以下文章的市場情緒。";

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 2, 23, 10, 0)
            .unwrap()
    }

    fn article(title: &str) -> Article {
        Article {
            year: 2025,
            date: "5/02".to_string(),
            title: title.to_string(),
            author: "alice".to_string(),
            url: "https://www.ptt.cc/bbs/Stock/M.1.html".to_string(),
            content: escape_newlines("第一行\n第二行"),
            comments: "推 bob : 噴".to_string(),
        }
    }

    struct Workspace {
        _dir: TempDir,
        opts: AnalyzeOptions,
        source: PathBuf,
    }

    async fn workspace() -> Workspace {
        let dir = tempfile::tempdir().unwrap();
        let articles_dir = dir.path().join("articles");
        let analysis_dir = dir.path().join("analysis");
        std::fs::create_dir_all(&articles_dir).unwrap();
        let prompt_file = dir.path().join("prompt.txt");
        std::fs::write(&prompt_file, PROMPT).unwrap();

        let source = articles_dir.join(article_file_name("05-02"));
        let batch = ArticleBatch {
            scanned_at: Some("2025-05-02 22:03:01".to_string()),
            articles: vec![article("[新聞] 台積電"), article("[心得] 存股")],
        };
        write_batch(&batch, &source).await.unwrap();

        Workspace {
            _dir: dir,
            opts: AnalyzeOptions {
                csv: None,
                output: None,
                articles_dir,
                analysis_dir,
                prompt_file,
                remove_source: false,
                sanitize_source: false,
            },
            source,
        }
    }

    async fn ollama(status: u16, content: &str) -> (MockServer, Backend) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "message": {"role": "assistant", "content": content}
            })))
            .mount(&server)
            .await;
        let client = OllamaClient::new(&server.uri(), "test-model", StdDuration::from_secs(5));
        let backend = Backend::Ollama(RetryAsk::new(client, 0, StdDuration::from_millis(1)));
        (server, backend)
    }

    fn sent_user_message(body: &[u8]) -> String {
        let sent: serde_json::Value = serde_json::from_slice(body).unwrap();
        sent["messages"][1]["content"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_build_input_blocks() {
        let input = build_input(&[article("A"), article("B")]);
        assert_eq!(
            input,
            "【標題】A\n【作者】alice\n【日期】2025/5/02\n【內文】第一行\\n第二行\n【留言】推 bob : 噴\n---\n\
             【標題】B\n【作者】alice\n【日期】2025/5/02\n【內文】第一行\\n第二行\n【留言】推 bob : 噴\n---"
        );
        assert_eq!(build_input(&[]), "");
    }

    #[test]
    fn test_previous_day_label() {
        assert_eq!(previous_day_label("05-02", 2025).as_deref(), Some("05-01"));
        assert_eq!(previous_day_label("01-01", 2025).as_deref(), Some("12-31"));
        assert_eq!(previous_day_label("03-01", 2024).as_deref(), Some("02-29"));
        assert_eq!(previous_day_label("03-01", 2025).as_deref(), Some("02-28"));
        assert_eq!(previous_day_label("02-29", 2025).as_deref(), Some("02-28"));
        assert_eq!(previous_day_label("Unknown", 2025), None);
    }

    #[tokio::test]
    async fn test_source_labels() {
        let ws = workspace().await;
        assert_eq!(
            source_labels(&ws.source).await,
            ("05-02".to_string(), "2025-05-02_220301".to_string())
        );
        assert_eq!(
            source_labels(Path::new("ptt_stock_articles_04-14_20250415-2203.csv")).await,
            ("04-14".to_string(), "20250415-2203".to_string())
        );
        assert_eq!(
            source_labels(Path::new("other.csv")).await,
            ("Unknown".to_string(), String::new())
        );
    }

    #[tokio::test]
    async fn test_latest_source_by_mtime() {
        let ws = workspace().await;
        let newer = ws.opts.articles_dir.join(article_file_name("05-03"));
        std::fs::copy(&ws.source, &newer).unwrap();
        let old = std::fs::File::options().write(true).open(&ws.source).unwrap();
        old.set_modified(std::time::SystemTime::now() - StdDuration::from_secs(3600))
            .unwrap();
        std::fs::write(ws.opts.articles_dir.join("notes.csv"), "x").unwrap();

        assert_eq!(find_latest_source(&ws.opts.articles_dir).await.unwrap(), newer);
    }

    #[tokio::test]
    async fn test_no_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_latest_source(dir.path()).await.unwrap_err();
        assert!(matches!(err, PttError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_prompt_is_fatal() {
        let mut ws = workspace().await;
        ws.opts.prompt_file = ws.opts.analysis_dir.join("nope.txt");
        let (_server, backend) = ollama(200, "x").await;
        let err = run_analysis(&ws.opts, &backend, now()).await.unwrap_err();
        assert!(matches!(err, PttError::MissingPromptFile { .. }));
    }

    #[tokio::test]
    async fn test_full_run_without_prior_summary() {
        let ws = workspace().await;
        let (server, backend) = ollama(200, "市場情緒：多頭").await;

        let output = run_analysis(&ws.opts, &backend, now()).await.unwrap();
        assert_eq!(
            output,
            ws.opts
                .analysis_dir
                .join("ptt_stock_sentiment_05-02_2025-05-02_220301_ollama.md")
        );
        let md = std::fs::read_to_string(&output).unwrap();
        assert!(md.starts_with("# PTT Stock Sentiment Analysis (Ollama)\n"));
        assert!(md.contains("- 分析目標日期 (Target Day): 05-02\n"));
        assert!(md.contains("- 分析執行時間 (Analysis Time): 2025-05-02 23:10:00\n"));
        assert!(md.contains("- 模型: test-model\n"));
        assert!(md.ends_with("\n\n市場情緒：多頭"));

        let requests = server.received_requests().await.unwrap();
        let user = sent_user_message(&requests[0].body);
        assert!(user.starts_with(&format!("{PROMPT}\n\n這些文章來自 2025/5/02")));
        assert!(!user.contains(PRIOR_SUMMARY_LABEL));
        assert!(user.contains("【標題】[心得] 存股"));
        assert!(ws.source.exists());
    }

    #[tokio::test]
    async fn test_prior_summary_is_chained() {
        let ws = workspace().await;
        std::fs::create_dir_all(&ws.opts.analysis_dir).unwrap();
        std::fs::write(
            ws.opts.analysis_dir.join("ptt_stock_sentiment_05-01_2025-05-01_220000.md"),
            "older",
        )
        .unwrap();
        std::fs::write(
            ws.opts.analysis_dir.join("ptt_stock_sentiment_05-01_2025-05-01_230000.md"),
            "昨日偏空",
        )
        .unwrap();
        let (server, backend) = ollama(200, "ok").await;

        run_analysis(&ws.opts, &backend, now()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let user = sent_user_message(&requests[0].body);
        assert!(user.starts_with(&format!("【前一日分析摘要】\n昨日偏空\n\n{PROMPT}")));
    }

    #[tokio::test]
    async fn test_prior_summary_prefers_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let stamped = dir.path().join("ptt_stock_sentiment_05-01_2025-05-01_230000.md");
        let unstamped = dir.path().join("ptt_stock_sentiment_05-01__ollama.md");
        std::fs::write(&stamped, "xai").unwrap();
        std::fs::write(&unstamped, "ollama").unwrap();
        std::fs::write(dir.path().join("ptt_stock_sentiment_05-02_x.md"), "today").unwrap();

        let age = |path: &Path, secs: u64| {
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(std::time::SystemTime::now() - StdDuration::from_secs(secs))
                .unwrap();
        };
        age(&unstamped, 7200);
        age(&stamped, 3600);
        assert_eq!(find_prior_summary(dir.path(), "05-02", 2025).await, Some(stamped.clone()));

        age(&stamped, 10800);
        assert_eq!(find_prior_summary(dir.path(), "05-02", 2025).await, Some(unstamped));
        assert_eq!(find_prior_summary(dir.path(), "05-04", 2025).await, None);
    }

    #[tokio::test]
    async fn test_model_failure_still_writes_output() {
        let mut ws = workspace().await;
        ws.opts.csv = Some(ws.source.clone());
        ws.opts.output = Some(ws.opts.analysis_dir.join("custom/out.md"));
        let (_server, backend) = ollama(500, "").await;

        let output = run_analysis(&ws.opts, &backend, now()).await.unwrap();
        let md = std::fs::read_to_string(output).unwrap();
        assert!(md.ends_with("\n\n[Ollama API error: HTTP 500]"));
    }

    #[tokio::test]
    async fn test_post_processing_sanitize_then_remove() {
        let mut ws = workspace().await;
        ws.opts.sanitize_source = true;
        let (_server, backend) = ollama(200, "ok").await;
        run_analysis(&ws.opts, &backend, now()).await.unwrap();
        let text = std::fs::read_to_string(&ws.source).unwrap();
        assert!(!text.contains("alice"));

        ws.opts.remove_source = true;
        ws.opts.csv = Some(ws.source.clone());
        run_analysis(&ws.opts, &backend, now()).await.unwrap();
        assert!(!ws.source.exists());
    }
}
