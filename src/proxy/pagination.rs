//! Next-page discovery for paginated listing sites
//!
//! How a site links to its next page is site specific, so the crawler asks a
//! [`PaginationPolicy`] instead of hard-coding one convention.

use crate::proxy::parser::ProxyParser;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Hosts serving raw lists that never paginate
const RAW_LIST_HOSTS: &[&str] = &["raw.githubusercontent.com", "github.com"];

/// Anchor texts that mean "next page"
static NEXT_LINK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"next\s*page",
        r"next\s*>",
        r">\s*next",
        r"^next$",
        r"more\s*proxies",
        r"load\s*more",
        r"^continue$",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("Invalid pagination regex"))
    .collect()
});

/// Strategy for deriving the next page from the current one
pub trait PaginationPolicy: Send + Sync + fmt::Debug {
    /// `pages_fetched` counts the pages fetched so far, including `current`.
    fn next_page(&self, current: &Url, body: &str, pages_fetched: usize) -> Option<Url>;
}

/// Follows anchors labelled "next", "more proxies" or the next page number
#[derive(Debug, Clone, Default)]
pub struct LinkTextPagination;

impl LinkTextPagination {
    /// True for the raw-list hosts and any of their subdomains
    fn is_raw_list(url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        RAW_LIST_HOSTS
            .iter()
            .any(|raw| host == *raw || host.ends_with(&format!(".{raw}")))
    }

    fn resolve(current: &Url, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        let next = current.join(href).ok()?;
        if !matches!(next.scheme(), "http" | "https") || next == *current {
            return None;
        }
        Some(next)
    }
}

impl PaginationPolicy for LinkTextPagination {
    fn next_page(&self, current: &Url, body: &str, pages_fetched: usize) -> Option<Url> {
        if Self::is_raw_list(current) {
            return None;
        }

        let document = Html::parse_document(body);
        let anchors = Selector::parse("a[href]").ok()?;
        let links: Vec<(String, String)> = document
            .select(&anchors)
            .filter_map(|a| {
                let href = a.value().attr("href")?.to_string();
                let text = a.text().collect::<String>().trim().to_string();
                Some((text, href))
            })
            .collect();

        let labelled = links.iter().find_map(|(text, href)| {
            NEXT_LINK_PATTERNS
                .iter()
                .any(|p| p.is_match(text))
                .then(|| Self::resolve(current, href))
                .flatten()
        });
        if labelled.is_some() {
            return labelled;
        }

        let wanted = (pages_fetched + 1).to_string();
        links
            .iter()
            .filter(|(text, _)| *text == wanted)
            .find_map(|(_, href)| Self::resolve(current, href))
    }
}

/// Sets `?<name>=N` on the URL, stopping at the first page without candidates
#[derive(Debug, Clone)]
pub struct QueryParamPagination {
    name: String,
}

impl QueryParamPagination {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PaginationPolicy for QueryParamPagination {
    fn next_page(&self, current: &Url, body: &str, pages_fetched: usize) -> Option<Url> {
        if ProxyParser::extract_page(body).is_empty() {
            return None;
        }

        let kept: Vec<(String, String)> = current
            .query_pairs()
            .filter(|(k, _)| *k != self.name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut next = current.clone();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&self.name, &(pages_fetched + 1).to_string());
        Some(next)
    }
}

/// Only the seed page is fetched
#[derive(Debug, Clone, Default)]
pub struct NoPagination;

impl PaginationPolicy for NoPagination {
    fn next_page(&self, _current: &Url, _body: &str, _pages_fetched: usize) -> Option<Url> {
        None
    }
}

/// Pagination strategy selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationKind {
    #[default]
    LinkText,
    QueryParam,
    None,
}

impl PaginationKind {
    pub fn into_policy(self, page_param: &str) -> Arc<dyn PaginationPolicy> {
        match self {
            PaginationKind::LinkText => Arc::new(LinkTextPagination),
            PaginationKind::QueryParam => Arc::new(QueryParamPagination::new(page_param)),
            PaginationKind::None => Arc::new(NoPagination),
        }
    }
}

impl std::str::FromStr for PaginationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "link-text" | "links" => Ok(PaginationKind::LinkText),
            "query-param" | "query" => Ok(PaginationKind::QueryParam),
            "none" => Ok(PaginationKind::None),
            _ => Err(format!(
                "invalid pagination: {s}. Use: link-text, query-param, none"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_link_text_follows_next_anchor() {
        let body = r#"<a href="/about">About</a> <a href="/list?p=2">Next Page</a>"#;
        let next = LinkTextPagination.next_page(&url("https://example.com/list"), body, 1);
        assert_eq!(next, Some(url("https://example.com/list?p=2")));
    }

    #[test]
    fn test_link_text_falls_back_to_page_number() {
        let body = r#"<a href="page/1">1</a> <a href="page/2">2</a> <a href="page/3">3</a>"#;
        let policy = LinkTextPagination;
        let current = url("https://example.com/proxies/");

        assert_eq!(
            policy.next_page(&current, body, 1),
            Some(url("https://example.com/proxies/page/2"))
        );
        assert_eq!(
            policy.next_page(&current, body, 2),
            Some(url("https://example.com/proxies/page/3"))
        );
        assert_eq!(policy.next_page(&current, body, 3), None);
    }

    #[test]
    fn test_link_text_ignores_self_and_script_links() {
        let body = r##"<a href="#">next</a> <a href="javascript:void(0)">Next page</a>
            <a href="https://example.com/list">next</a>"##;
        assert_eq!(
            LinkTextPagination.next_page(&url("https://example.com/list"), body, 1),
            None
        );
    }

    #[test]
    fn test_link_text_skips_raw_lists() {
        let body = r#"<a href="/next">next page</a>"#;
        let current = url("https://raw.githubusercontent.com/u/r/master/http.txt");
        assert_eq!(LinkTextPagination.next_page(&current, body, 1), None);
    }

    #[test]
    fn test_link_text_skips_github_subdomains() {
        let body = r#"<a href="/next">next page</a>"#;
        for page in [
            "https://gist.github.com/u/abc",
            "https://www.github.com/u/r",
            "https://GitHub.com/u/r",
        ] {
            assert_eq!(LinkTextPagination.next_page(&url(page), body, 1), None, "{page}");
        }
        assert!(LinkTextPagination
            .next_page(&url("https://notgithub.com/list"), body, 1)
            .is_some());
    }

    #[test]
    fn test_query_param_sets_page() {
        let policy = QueryParamPagination::new("page");
        let body = "1.2.3.4:8080";

        let second = policy
            .next_page(&url("https://example.com/list?type=http"), body, 1)
            .unwrap();
        assert_eq!(second.as_str(), "https://example.com/list?type=http&page=2");

        let third = policy.next_page(&second, body, 2).unwrap();
        assert_eq!(third.as_str(), "https://example.com/list?type=http&page=3");
    }

    #[test]
    fn test_query_param_stops_on_empty_page() {
        let policy = QueryParamPagination::new("page");
        assert_eq!(
            policy.next_page(&url("https://example.com/list"), "no proxies here", 1),
            None
        );
    }

    #[test]
    fn test_pagination_kind_parse() {
        assert_eq!("query-param".parse::<PaginationKind>(), Ok(PaginationKind::QueryParam));
        assert_eq!("NONE".parse::<PaginationKind>(), Ok(PaginationKind::None));
        assert!("sideways".parse::<PaginationKind>().is_err());
    }
}
