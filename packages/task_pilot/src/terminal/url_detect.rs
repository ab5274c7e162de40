//! Detection of URLs a process wants opened in the user's browser.
//!
//! Scanning is per chunk: a URL split across two PTY reads is not seen.

use regex::Regex;
use std::sync::OnceLock;

const URL: &str = r"(https?://[^\s\x1b\x07]+)";

/// Result of scanning one output chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlScan {
    /// Distinct URLs in pattern order
    pub urls: Vec<String>,
    /// Chunk to forward, with out-of-band markers rewritten
    pub output: String,
}

fn pattern_sources() -> Vec<String> {
    vec![
        // Opener commands echoed by the process
        format!(r"\b(?:xdg-open|open|start)\s+{}", URL),
        // Out-of-band marker
        format!(r"OPEN_URL:\s*{}", URL),
        format!(r"(?i)\bopening\s+{}", URL),
        format!(r"(?i)\bvisit:?\s*{}", URL),
        format!(r"(?i)\bview at:?\s*{}", URL),
        format!(r"(?i)\bbrowse to:?\s*{}", URL),
    ]
}

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        pattern_sources()
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(&format!(r"OPEN_URL:\s*{}", URL)).ok())
        .as_ref()
}

pub fn scan_output(chunk: &str) -> UrlScan {
    let mut urls: Vec<String> = Vec::new();
    for pattern in patterns() {
        for caps in pattern.captures_iter(chunk) {
            if let Some(url) = caps.get(1) {
                if !urls.iter().any(|u| u == url.as_str()) {
                    urls.push(url.as_str().to_string());
                }
            }
        }
    }

    let output = match marker() {
        Some(marker) if !urls.is_empty() => marker
            .replace_all(chunk, "[INFO] Opening in browser: $1")
            .into_owned(),
        _ => chunk.to_string(),
    };

    UrlScan { urls, output }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(patterns().len(), pattern_sources().len());
        assert!(marker().is_some());
    }

    #[test]
    fn test_plain_output_untouched() {
        let scan = scan_output("compiling...\r\n");
        assert!(scan.urls.is_empty());
        assert_eq!(scan.output, "compiling...\r\n");
    }

    #[test]
    fn test_opener_command() {
        let scan = scan_output("xdg-open https://example.com/auth?x=1\r\n");
        assert_eq!(scan.urls, vec!["https://example.com/auth?x=1"]);
        assert_eq!(scan.output, "xdg-open https://example.com/auth?x=1\r\n");
    }

    #[test]
    fn test_marker_is_rewritten() {
        let scan = scan_output("OPEN_URL: https://login.dev/cb\n");
        assert_eq!(scan.urls, vec!["https://login.dev/cb"]);
        assert_eq!(scan.output, "[INFO] Opening in browser: https://login.dev/cb\n");
    }

    #[test]
    fn test_phrasings() {
        assert_eq!(
            scan_output("Please visit: http://localhost:3000").urls,
            vec!["http://localhost:3000"]
        );
        assert_eq!(
            scan_output("Opening https://a.dev in your browser").urls,
            vec!["https://a.dev"]
        );
        assert_eq!(
            scan_output("View at https://b.dev/report").urls,
            vec!["https://b.dev/report"]
        );
        assert_eq!(
            scan_output("browse to http://c.dev").urls,
            vec!["http://c.dev"]
        );
    }

    #[test]
    fn test_url_stops_at_escape() {
        let scan = scan_output("visit https://d.dev\x1b[0m");
        assert_eq!(scan.urls, vec!["https://d.dev"]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let scan = scan_output("open https://e.dev\r\nvisit https://e.dev");
        assert_eq!(scan.urls, vec!["https://e.dev"]);
    }

    #[test]
    fn test_bare_url_ignored() {
        assert!(scan_output("docs live at https://f.dev").urls.is_empty());
    }
}
