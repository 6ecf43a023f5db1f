//! Proxy module for scraping and checking proxies
//!
//! This module provides functionality for:
//! - Extracting `ip:port` candidates from arbitrary text
//! - Crawling proxy list websites, following pagination
//! - Probing candidates as HTTP, HTTPS, SOCKS4 and SOCKS5 proxies

pub mod checker;
pub mod crawler;
pub mod models;
pub mod pagination;
pub mod parser;
pub mod probe;

pub use checker::{CheckOutcome, CheckProgress, CheckerConfig, ProgressSnapshot, ProxyChecker};
pub use crawler::{
    CrawlResult, CrawlerConfig, HttpFetcher, PageFetcher, ProxyCrawler, ScrapeOutcome,
};
pub use models::{
    Candidate, CandidateSet, CheckResult, CheckSummary, ProbeOutcome, ProbeStatus, ProxyType,
    ScrapeSummary, SourceSummary,
};
pub use pagination::{PaginationKind, PaginationPolicy};
pub use parser::ProxyParser;
pub use probe::{NetworkProber, ProbeTargets, Prober};
