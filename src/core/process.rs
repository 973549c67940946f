//! Process execution utilities with timeout support
//!
//! yt-dlp lookups and downloads go through here so a hung extractor never
//! blocks a chat forever.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use crate::core::error::AppError;

/// Run an async Command with a timeout.
///
/// The child is killed when the timeout fires (`kill_on_drop`).
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, AppError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::Io(e)),
        Err(_) => Err(AppError::Download(format!(
            "Process timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// `ERROR: [youtube] abc123: Video unavailable` -> `Video unavailable`
static YTDLP_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ERROR:\s*(?:\[[^\]]+\]\s*)?(?:[\w-]+:\s+)?(.+)$").expect("Failed to compile yt-dlp error regex")
});

/// Human-readable failure reason from a finished process.
///
/// Prefers the last yt-dlp `ERROR:` line, otherwise the last non-empty line.
pub fn stderr_summary(output: &Output) -> String {
    summarize_stderr(&String::from_utf8_lossy(&output.stderr))
}

fn summarize_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|line| !line.is_empty()).collect();

    if let Some(reason) = lines
        .iter()
        .rev()
        .find_map(|line| YTDLP_ERROR_RE.captures(line))
        .and_then(|caps| caps.get(1))
    {
        return reason.as_str().trim().to_string();
    }

    lines.last().copied().unwrap_or("no error output").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_timeout_success() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let output = run_with_timeout(&mut cmd, Duration::from_secs(5)).await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_timeout_expires() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_with_timeout(&mut cmd, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_summarize_stderr_prefers_ytdlp_error() {
        let stderr = "[youtube] abc123: Downloading webpage\n\
                      ERROR: [youtube] abc123: Video unavailable\n\
                      WARNING: something else\n";
        assert_eq!(summarize_stderr(stderr), "Video unavailable");
    }

    #[test]
    fn test_summarize_stderr_falls_back_to_last_line() {
        assert_eq!(summarize_stderr("first\nConversion failed!\n\n"), "Conversion failed!");
        assert_eq!(summarize_stderr(""), "no error output");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let mut cmd = Command::new("/nonexistent/yt-dlp");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
