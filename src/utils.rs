//! Utility functions for file naming, log formatting, and file system checks.
//!
//! - Title sanitization for archive file names
//! - String truncation for logging
//! - Writable-directory probing for the archive root
//! - Table formatting for the `--list` view

use crate::models::MixSummary;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Longest file stem (in characters) produced by [`sanitize_title`].
const MAX_STEM_CHARS: usize = 120;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Turn a mix title into a file stem that is safe on common filesystems.
///
/// Path separators and control characters become spaces, whitespace runs
/// collapse to one space, leading and trailing dots are removed so the
/// file is never hidden or a relative path, and the result is capped at
/// 120 characters. Falls back to `fallback` (the mix id) when nothing
/// usable is left.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(sanitize_title("Axe / to\tGrind", "5170"), "Axe to Grind");
/// assert_eq!(sanitize_title("../..", "5170"), "5170");
/// ```
pub fn sanitize_title(title: &str, fallback: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = WHITESPACE.replace_all(&replaced, " ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let capped: String = trimmed.chars().take(MAX_STEM_CHARS).collect();
    let capped = capped.trim_end();

    if capped.is_empty() {
        fallback.to_string()
    } else {
        capped.to_string()
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test
/// by creating and immediately deleting a probe file.
///
/// # Arguments
///
/// * `path` - Directory to create and test
///
/// # Errors
///
/// Returns the I/O error from creating the directory or the probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    fs::File::create(&probe_path).await?;
    let _ = fs::remove_file(&probe_path).await;
    info!("Archive directory is writable");
    Ok(())
}

/// Render the catalog as a padded table, marking archived mixes.
///
/// Column widths follow the widest artist and mix name in the list.
pub fn format_mix_table(mixes: &[MixSummary], archived: &HashSet<String>) -> String {
    let unknown = "?";
    let artist_of = |m: &MixSummary| m.artist.clone().unwrap_or_else(|| unknown.to_string());
    let name_of = |m: &MixSummary| m.name.clone().unwrap_or_else(|| unknown.to_string());

    let id_len = mixes.iter().map(|m| m.id.chars().count()).max().unwrap_or(0).max(2);
    let artist_len = mixes
        .iter()
        .map(|m| artist_of(m).chars().count())
        .max()
        .unwrap_or(0)
        .max("artist".len());
    let name_len = mixes
        .iter()
        .map(|m| name_of(m).chars().count())
        .max()
        .unwrap_or(0)
        .max("mix name".len());

    let separator = format!("|{}|", "=".repeat(id_len + artist_len + name_len + 2 + 4));
    let mut lines = vec![
        separator.clone(),
        format!(
            "|{:<id_len$}|{:<artist_len$}|{:<name_len$}|{:<3}|",
            "id", "artist", "mix name", "got"
        ),
        separator.clone(),
    ];
    for mix in mixes {
        let mark = if archived.contains(&mix.id) { "yes" } else { "no" };
        lines.push(format!(
            "|{:<id_len$}|{:<artist_len$}|{:<name_len$}|{:<3}|",
            mix.id,
            artist_of(mix),
            name_of(mix),
            mark
        ));
    }
    lines.push(separator);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_separators_and_controls() {
        assert_eq!(sanitize_title("Axe / to\tGrind", "5170"), "Axe to Grind");
        assert_eq!(sanitize_title("a\\b:c\u{7}d", "1"), "a b c d");
        assert_eq!(sanitize_title("  many    spaces  ", "1"), "many spaces");
    }

    #[test]
    fn test_sanitize_never_escapes_or_hides() {
        assert_eq!(sanitize_title("../..", "5170"), "5170");
        assert_eq!(sanitize_title(".hidden mix", "1"), "hidden mix");
        assert_eq!(sanitize_title("   ", "42"), "42");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_title(&long, "1").chars().count(), MAX_STEM_CHARS);
    }

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
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé";
        assert_eq!(truncate_for_log(s, 2), "éé…(+6 bytes)");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }

    #[test]
    fn test_format_mix_table_pads_and_marks() {
        let mixes = vec![
            MixSummary {
                id: "5170".into(),
                detail_ref: "http://x/5170/axe-to-grind/".into(),
                name: Some("Axe to Grind".into()),
                artist: Some("Lovefingers".into()),
            },
            MixSummary {
                id: "12".into(),
                detail_ref: "http://x/12/b/".into(),
                name: None,
                artist: Some("DJ".into()),
            },
        ];
        let archived: HashSet<String> = ["5170".to_string()].into_iter().collect();

        let table = format_mix_table(&mixes, &archived);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[3].starts_with("|5170|Lovefingers|Axe to Grind|yes|"));
        assert!(lines[4].starts_with("|12  |DJ         |?           |no |"));
        let width = lines[0].len();
        assert!(lines.iter().all(|l| l.len() == width));
    }
}
