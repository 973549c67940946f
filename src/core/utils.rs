//! Formatting helpers for chat replies and file names.

use std::time::Duration;

/// Formats a track length: `45s`, `03:25`, `01:02:03`.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{:02}:{:02}", seconds / 60, seconds % 60)
    } else {
        format!(
            "{:02}:{:02}:{:02}",
            seconds / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }
}

/// Formats process uptime with its two most significant units.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Human-readable byte count with one decimal: `3.4 MB`.
pub fn format_file_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Makes a track title safe to use as a file name.
///
/// Path separators and characters reserved on Windows become `_`, runs of
/// whitespace collapse into a single `_`, and the result is capped at 200
/// characters.
pub fn clean_filename(filename: &str) -> String {
    let mut result = String::with_capacity(filename.len());
    let mut in_space = false;

    for c in filename.chars() {
        if c.is_whitespace() {
            if !in_space {
                result.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => result.push('_'),
            c if c.is_control() => result.push('_'),
            _ => result.push(c),
        }
    }

    let result: String = result.chars().take(200).collect();
    if result.is_empty() {
        "unnamed".to_string()
    } else {
        result
    }
}

/// Shortens `text` to `max_chars`, appending `...` when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// True for anything that looks like an http(s) link rather than a search query.
pub fn is_url(input: &str) -> bool {
    url::Url::parse(input.trim())
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(205), "03:25");
        assert_eq!(format_duration(3723), "01:02:03");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(7380)), "2h 3m");
        assert_eq!(format_uptime(Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("AC/DC: Back  In Black?"), "AC_DC__Back_In_Black_");
        assert_eq!(clean_filename(""), "unnamed");
        assert_eq!(clean_filename(&"a".repeat(300)).len(), 200);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a very long title", 10), "a very ...");
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("  http://example.com/a  "));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ftp://example.com/file"));
    }
}
