//! Text helpers shared by the adapters, the page crawler and the scorer.

use chrono::{DateTime, NaiveDate, Utc};
use scraper::Html;

const REMOTE_PHRASES: &[&str] = &[
    "remote",
    "anywhere",
    "work from home",
    "wfh",
    "distributed",
    "telecommute",
    "home based",
    "home-based",
];

/// True when a location string reads like a remote arrangement.
pub fn looks_remote(location: &str) -> bool {
    let lower = location.to_lowercase();
    REMOTE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Case-insensitive whole-word match. "US" matches "Remote, US" but not "Austin".
///
/// A match must sit between the start/end of the text or a non-word
/// character, so needles ending in punctuation ("C++") still match.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    let haystack = haystack.to_lowercase();

    let mut from = 0;
    while let Some(offset) = haystack[from..].find(&needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before_ok = haystack[..start].chars().next_back().map_or(true, |c| !is_word_char(c));
        let after_ok = haystack[end..].chars().next().map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            return true;
        }
        // Step one char so overlapping candidates are still tried
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Flatten an HTML fragment into whitespace-normalised text. Providers that
/// ship entity-escaped markup (`&lt;p&gt;`) are unescaped by a second pass.
pub fn html_to_text(html: &str) -> String {
    let mut text = fragment_text(html);
    if text.contains('<') && text.contains('>') {
        text = fragment_text(&text);
    }
    text
}

fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let joined = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_word_respects_boundaries() {
        assert!(contains_word("Remote, US", "US"));
        assert!(contains_word("remote, us", "US"));
        assert!(!contains_word("Austin, TX", "US"));
        assert!(contains_word("New York, NY", "new york"));
        assert!(!contains_word("Anything", ""));
    }

    #[test]
    fn test_contains_word_escapes_regex() {
        assert!(contains_word("C++ Developer", "C++"));
        assert!(!contains_word("Developer", "(dev"));
    }

    #[test]
    fn test_contains_word_retries_after_inner_match() {
        // First "us" is inside "Austin", the second stands alone
        assert!(contains_word("Austin, US", "us"));
        assert!(contains_word("Zürich, CH", "zürich"));
        assert!(!contains_word("Berlin_Mitte", "berlin"));
        assert!(contains_word("San Francisco Bay Area", "francisco bay"));
    }

    #[test]
    fn test_looks_remote() {
        assert!(looks_remote("Remote - Europe"));
        assert!(looks_remote("Anywhere in the world"));
        assert!(!looks_remote("San Francisco, CA"));
    }

    #[test]
    fn test_html_to_text_handles_escaped_markup() {
        assert_eq!(html_to_text("<p>Build <b>things</b></p>"), "Build things");
        assert_eq!(
            html_to_text("&lt;p&gt;Ship &amp;amp; iterate&lt;/p&gt;"),
            "Ship & iterate"
        );
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let full = parse_timestamp("2024-03-01T10:00:00-05:00").unwrap();
        assert_eq!(full.to_rfc3339(), "2024-03-01T15:00:00+00:00");
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("last week").is_none());
    }
}
