//! Utility functions for board-local time, log truncation, and file system operations.
//!
//! This module provides helper functions used throughout the application:
//! - Clock helpers pinned to the board's UTC+8 timezone
//! - String truncation for logging previews
//! - Output directory validation
//! - Crash-safe file replacement (write to a sibling temp file, then rename)

use chrono::{DateTime, FixedOffset, Utc};
use std::error::Error;
use std::fs as stdfs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

const WRITE_CHECK_FILE: &str = "..__probe_write__";

/// Timestamp format used in CSV headers and analysis metadata.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The board's fixed UTC+8 offset.
pub fn board_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

/// Current time in the board's timezone.
pub fn taipei_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&board_offset())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a count of
/// the dropped bytes appended. Cuts always land on a character boundary.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a check file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let check_path = path.join(WRITE_CHECK_FILE);
    match stdfs::File::create(&check_path) {
        Ok(_) => {
            if let Err(e) = stdfs::remove_file(&check_path) {
                warn!(file = %check_path.display(), error = %e, "Could not remove write check file");
            }
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

fn temp_sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Replace `path` with `contents` without ever leaving a half-written file
/// at `path`.
#[instrument(level = "debug", skip(contents), fields(path = %path.display(), bytes = contents.len()))]
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = temp_sibling(path, ".tmp");
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        if let Err(cleanup) = fs::remove_file(&tmp).await {
            warn!(tmp = %tmp.display(), error = %cleanup, "Could not remove temp file");
        }
        return Err(e);
    }
    debug!("Replaced file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let result = truncate_for_log("台積電大漲", 2);
        assert_eq!(result, "台積…(+9 bytes)");
    }

    #[test]
    fn test_taipei_now_is_utc_plus_eight() {
        let now = taipei_now();
        assert_eq!(now.offset().local_minus_utc(), 8 * 3600);
        let utc_hour = Utc::now().hour();
        assert!(now.hour() == (utc_hour + 8) % 24 || now.hour() == (utc_hour + 9) % 24);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("out.csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_cleans_up_check_file() {
        let dir = tempfile::tempdir().unwrap();
        ensure_writable_dir(dir.path()).await.unwrap();
        ensure_writable_dir(dir.path()).await.unwrap();
        assert!(!dir.path().join(WRITE_CHECK_FILE).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
