//! Candidate extraction from page text and candidate list files

use crate::error::SetupError;
use crate::proxy::models::{Candidate, CandidateSet};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::fs;
use std::path::Path;

/// `a.b.c.d:port`, tolerating blanks around the separators
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:[ \t]*\.[ \t]*\d{1,3}){3})[ \t]*:[ \t]*(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// A whole line holding one candidate, optionally written as a proxy URL
static LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:https?|socks[45])://)?(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})/?$")
        .expect("Invalid candidate line regex")
});

/// Parser for pulling candidates out of arbitrary text
pub struct ProxyParser;

impl ProxyParser {
    /// Extract every valid `IPv4:port` pair from a page body.
    ///
    /// Near-matches with an octet above 255 or a port outside `1..=65535`
    /// are dropped without complaint. Order of first appearance is kept.
    pub fn extract(text: &str) -> CandidateSet {
        IP_PORT_REGEX
            .captures_iter(text)
            .filter_map(|cap| {
                let host: String = cap
                    .get(1)?
                    .as_str()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                Self::validate(&host, cap.get(2)?.as_str())
            })
            .collect()
    }

    /// Extract candidates from the text content of a fetched page.
    ///
    /// Text nodes are joined with blanks, so an entry split by markup such as
    /// `1.2.3.4<span>:</span>8080` is still found. Plain text bodies pass
    /// through unchanged.
    pub fn extract_page(body: &str) -> CandidateSet {
        let document = Html::parse_document(body);
        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        Self::extract(&text)
    }

    /// Parse a single `host:port` line.
    ///
    /// Blank lines, `#` comments and anything outside the candidate grammar
    /// yield `None`.
    pub fn parse_line(line: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let caps = LINE_REGEX.captures(line)?;
        Self::validate(&caps[1], &caps[2])
    }

    /// Parse candidates from multi-line content, keeping duplicates
    pub fn parse_string(content: &str) -> Vec<Candidate> {
        content.lines().filter_map(Self::parse_line).collect()
    }

    /// Parse candidates from a file, keeping duplicates
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Candidate>, SetupError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SetupError::InputFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse_string(&content))
    }

    fn validate(host: &str, port: &str) -> Option<Candidate> {
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() != 4 {
            return None;
        }
        for part in parts {
            let num: u32 = part.parse().ok()?;
            if num > 255 {
                return None;
            }
        }

        let port: u32 = port.parse().ok()?;
        if !(1..=65535).contains(&port) {
            return None;
        }

        Some(Candidate::new(host, port as u16))
    }
}
