//! Proxy crawler module for scraping candidates from listing sites
//!
//! This module provides functionality for:
//! - Fetching a seed URL and following its pagination chain
//! - Extracting candidates from every fetched page
//! - Fanning the work out over many seed URLs with a bounded worker pool

use crate::error::{FetchError, SetupError};
use crate::pool::run_bounded;
use crate::proxy::models::{Candidate, CandidateSet, ScrapeSummary, SourceSummary};
use crate::proxy::pagination::{LinkTextPagination, PaginationPolicy};
use crate::proxy::parser::ProxyParser;
use async_trait::async_trait;
use chrono::Local;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Url};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default number of seed URLs scraped at once
const DEFAULT_MAX_WORKERS: usize = 50;

/// Default number of pages followed per seed URL
const DEFAULT_MAX_PAGES: usize = 5;

/// Default pause between two pages of the same seed URL
const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Source of page bodies
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// [`PageFetcher`] backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, SetupError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

struct ChainState {
    next: Option<Url>,
    fetched: usize,
    visited: HashSet<String>,
}

/// Lazily fetch `seed` and the pages that follow it.
///
/// Pages are fetched strictly one after another, with `delay` between two
/// fetches, until `max_pages` pages were fetched, the policy finds no next
/// page, or a fetch fails. A failure is yielded as the last item; pages
/// yielded before it stay valid.
pub fn paginate<'a>(
    fetcher: &'a dyn PageFetcher,
    policy: &'a dyn PaginationPolicy,
    seed: Url,
    max_pages: usize,
    delay: Duration,
) -> impl Stream<Item = Result<Page, FetchError>> + Send + 'a {
    let state = ChainState {
        next: Some(seed),
        fetched: 0,
        visited: HashSet::new(),
    };

    stream::unfold(state, move |mut state| async move {
        if state.fetched >= max_pages {
            return None;
        }
        let url = state.next.take()?;
        if state.fetched > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match fetcher.fetch(&url).await {
            Ok(body) => {
                state.fetched += 1;
                state.visited.insert(url.to_string());
                if state.fetched < max_pages {
                    state.next = policy
                        .next_page(&url, &body, state.fetched)
                        .filter(|next| !state.visited.contains(next.as_str()));
                }
                Some((Ok(Page { url, body }), state))
            }
            Err(e) => Some((Err(e), state)),
        }
    })
}

/// Result of crawling a single seed URL
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The seed URL as given
    pub source: String,
    /// Distinct candidates seen on this source's pages
    pub found: usize,
    /// Candidates this source added to the shared set
    pub added: usize,
    /// Pages fetched successfully
    pub pages: usize,
    /// Error that ended the pagination chain, if any
    pub error: Option<String>,
}

impl CrawlResult {
    fn new(source: String) -> Self {
        Self {
            source,
            found: 0,
            added: 0,
            pages: 0,
            error: None,
        }
    }

    /// Check if the crawl ran without any fetch error
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn into_summary(self) -> SourceSummary {
        SourceSummary {
            source: self.source,
            candidates: self.found,
            pages: self.pages,
            error: self.error,
        }
    }
}

/// Candidate set and summary produced by a scrape
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub candidates: CandidateSet,
    pub summary: ScrapeSummary,
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Seed URLs scraped at once
    pub max_workers: usize,
    /// Pages followed per seed URL, the seed included
    pub max_pages: usize,
    /// Pause between two pages of the same seed URL
    pub delay: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            max_pages: DEFAULT_MAX_PAGES,
            delay: DEFAULT_DELAY,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Proxy crawler fanning pagination chains out over a worker pool
pub struct ProxyCrawler {
    config: CrawlerConfig,
    fetcher: Arc<dyn PageFetcher>,
    pagination: Arc<dyn PaginationPolicy>,
    finished: Arc<AtomicUsize>,
    discovered: Option<UnboundedSender<Candidate>>,
}

impl ProxyCrawler {
    /// Create a crawler fetching over HTTP and following "next" links
    pub fn new(config: CrawlerConfig) -> Result<Self, SetupError> {
        let fetcher = HttpFetcher::new(config.timeout, &config.user_agent)?;
        Ok(Self::with_parts(
            config,
            Arc::new(fetcher),
            Arc::new(LinkTextPagination),
        ))
    }

    /// Create a crawler from explicit collaborators
    pub fn with_parts(
        config: CrawlerConfig,
        fetcher: Arc<dyn PageFetcher>,
        pagination: Arc<dyn PaginationPolicy>,
    ) -> Self {
        Self {
            config,
            fetcher,
            pagination,
            finished: Arc::new(AtomicUsize::new(0)),
            discovered: None,
        }
    }

    /// Send every candidate on `sender` the moment it first enters the set
    pub fn with_discovery_channel(mut self, sender: UnboundedSender<Candidate>) -> Self {
        self.discovered = Some(sender);
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Seed URLs of the current (or last) scrape whose crawl has ended
    pub fn finished_sources(&self) -> usize {
        self.finished.load(Ordering::Relaxed)
    }

    /// Scrape every seed URL into one deduplicated candidate set.
    ///
    /// `known` seeds the shared set, so candidates already in it are not
    /// counted as new. One seed URL failing never affects the others.
    pub async fn scrape(&self, seeds: &[String], known: CandidateSet) -> ScrapeOutcome {
        info!(
            "Scraping {} URLs with {} workers, up to {} pages each",
            seeds.len(),
            self.config.max_workers,
            self.config.max_pages
        );

        let known_count = known.len();
        let shared = Arc::new(Mutex::new(known));
        let indexed: Vec<(usize, String)> = seeds.iter().cloned().enumerate().collect();
        let total = indexed.len();

        let fetcher = Arc::clone(&self.fetcher);
        let pagination = Arc::clone(&self.pagination);
        let max_pages = self.config.max_pages;
        let delay = self.config.delay;
        let accumulator = Arc::clone(&shared);
        let finished = Arc::clone(&self.finished);
        finished.store(0, Ordering::Relaxed);
        let discovered = self.discovered.clone();

        let mut results = run_bounded(indexed, self.config.max_workers, move |(index, seed)| {
            let fetcher = Arc::clone(&fetcher);
            let pagination = Arc::clone(&pagination);
            let accumulator = Arc::clone(&accumulator);
            let finished = Arc::clone(&finished);
            let discovered = discovered.clone();
            async move {
                let result = crawl_source(
                    fetcher.as_ref(),
                    pagination.as_ref(),
                    &seed,
                    max_pages,
                    delay,
                    &accumulator,
                    discovered.as_ref(),
                )
                .await;
                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    "Progress: {}/{} URLs - {} candidates from {}",
                    done,
                    total,
                    result.found,
                    result.source
                );
                (index, result)
            }
        })
        .await;

        results.sort_by_key(|(index, _)| *index);

        let candidates = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|e| e.into_inner()),
            Err(shared) => lock(&shared).clone(),
        };

        let summary = ScrapeSummary {
            timestamp: Local::now(),
            sources: results
                .into_iter()
                .map(|(_, result)| result.into_summary())
                .collect(),
            total_unique: candidates.len(),
            new_candidates: candidates.len() - known_count,
        };

        info!(
            "Scraping finished: {} unique candidates ({} new)",
            summary.total_unique, summary.new_candidates
        );

        ScrapeOutcome {
            candidates,
            summary,
        }
    }
}

/// Crawl one seed URL's pagination chain into the shared set
async fn crawl_source(
    fetcher: &dyn PageFetcher,
    pagination: &dyn PaginationPolicy,
    seed: &str,
    max_pages: usize,
    delay: Duration,
    shared: &Mutex<CandidateSet>,
    discovered: Option<&UnboundedSender<Candidate>>,
) -> CrawlResult {
    let mut result = CrawlResult::new(seed.to_string());

    let url = match Url::parse(&normalize_seed(seed)) {
        Ok(url) => url,
        Err(e) => {
            warn!("Skipping {}: {}", seed, e);
            result.error = Some(FetchError::InvalidUrl(e.to_string()).to_string());
            return result;
        }
    };

    let mut seen = CandidateSet::new();
    let mut pages = Box::pin(paginate(fetcher, pagination, url, max_pages, delay));

    while let Some(page) = pages.next().await {
        match page {
            Ok(page) => {
                result.pages += 1;
                let extracted = ProxyParser::extract_page(&page.body);
                debug!("{} candidates on {}", extracted.len(), page.url);

                {
                    let mut shared = lock(shared);
                    for candidate in extracted.iter() {
                        if shared.insert(candidate.clone()) {
                            result.added += 1;
                            if let Some(sender) = discovered {
                                sender.send(candidate.clone()).ok();
                            }
                        }
                    }
                }
                seen.merge(extracted);
            }
            Err(e) => {
                warn!("Error scraping {} (page {}): {}", seed, result.pages + 1, e);
                result.error = Some(e.to_string());
            }
        }
    }

    result.found = seen.len();
    result
}

fn lock(shared: &Mutex<CandidateSet>) -> std::sync::MutexGuard<'_, CandidateSet> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Prepend `http://` to seed URLs given without a scheme
pub fn normalize_seed(seed: &str) -> String {
    let seed = seed.trim();
    if seed.starts_with("http://") || seed.starts_with("https://") {
        seed.to_string()
    } else {
        format!("http://{seed}")
    }
}

/// Read seed URLs from a file, one per line, skipping blanks and `#` comments
pub fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>, SetupError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| SetupError::InputFile {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Candidate;
    use crate::proxy::pagination::{NoPagination, QueryParamPagination};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed bodies by URL and fails everything else
    struct MapFetcher {
        pages: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(u, b)| (u.to_string(), b.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Other(format!("unreachable: {url}")))
        }
    }

    fn crawler(fetcher: MapFetcher, pagination: Arc<dyn PaginationPolicy>, max_pages: usize) -> ProxyCrawler {
        let config = CrawlerConfig::new()
            .with_max_workers(4)
            .with_max_pages(max_pages)
            .with_delay(Duration::ZERO);
        ProxyCrawler::with_parts(config, Arc::new(fetcher), pagination)
    }

    #[test]
    fn test_crawler_config_default() {
        let config = CrawlerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.delay, DEFAULT_DELAY);
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string())
            .with_max_workers(0)
            .with_max_pages(2);

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.max_pages, 2);
    }

    #[test]
    fn test_normalize_seed() {
        assert_eq!(normalize_seed("example.com/list"), "http://example.com/list");
        assert_eq!(normalize_seed(" https://example.com "), "https://example.com");
    }

    #[tokio::test]
    async fn test_paginate_follows_chain() {
        let fetcher = MapFetcher::new(&[
            ("http://s.test/list", "1.1.1.1:80 <a href=\"/list?page=2\">next</a>"),
            ("http://s.test/list?page=2", "2.2.2.2:80 <a href=\"/list?page=3\">next</a>"),
            ("http://s.test/list?page=3", "3.3.3.3:80"),
        ]);
        let seed = Url::parse("http://s.test/list").unwrap();
        let pages: Vec<_> = paginate(&fetcher, &LinkTextPagination, seed, 5, Duration::ZERO)
            .collect()
            .await;

        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| p.is_ok()));
    }

    #[tokio::test]
    async fn test_paginate_respects_max_pages_of_one() {
        let fetcher = MapFetcher::new(&[
            ("http://s.test/list", "1.1.1.1:80 <a href=\"/list?page=2\">next</a>"),
            ("http://s.test/list?page=2", "2.2.2.2:80"),
        ]);
        let seed = Url::parse("http://s.test/list").unwrap();
        let pages: Vec<_> = paginate(&fetcher, &LinkTextPagination, seed, 1, Duration::ZERO)
            .collect()
            .await;

        assert_eq!(pages.len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paginate_keeps_pages_before_failure() {
        let fetcher = MapFetcher::new(&[("http://s.test/list", "1.1.1.1:80")]);
        let seed = Url::parse("http://s.test/list").unwrap();
        let pages: Vec<_> = paginate(
            &fetcher,
            &QueryParamPagination::new("page"),
            seed,
            5,
            Duration::ZERO,
        )
        .collect()
        .await;

        assert_eq!(pages.len(), 2);
        assert!(pages[0].is_ok());
        assert!(pages[1].is_err());
    }

    #[tokio::test]
    async fn test_paginate_does_not_revisit() {
        let fetcher = MapFetcher::new(&[
            ("http://s.test/a", "<a href=\"/b\">next</a>"),
            ("http://s.test/b", "<a href=\"/a\">next</a>"),
        ]);
        let seed = Url::parse("http://s.test/a").unwrap();
        let pages: Vec<_> = paginate(&fetcher, &LinkTextPagination, seed, 10, Duration::ZERO)
            .collect()
            .await;

        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_paginate_waits_between_pages() {
        let fetcher = MapFetcher::new(&[
            ("http://s.test/a", "<a href=\"/b\">next</a>"),
            ("http://s.test/b", ""),
        ]);
        let seed = Url::parse("http://s.test/a").unwrap();
        let start = std::time::Instant::now();
        let pages: Vec<_> = paginate(
            &fetcher,
            &LinkTextPagination,
            seed,
            5,
            Duration::from_millis(100),
        )
        .collect()
        .await;

        assert_eq!(pages.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_scrape_isolates_failing_source() {
        let fetcher = MapFetcher::new(&[("http://good.test/", "proxy 1.2.3.4:8080 here")]);
        let crawler = crawler(fetcher, Arc::new(NoPagination), 5);
        let seeds = vec!["http://good.test/".to_string(), "http://bad.test/".to_string()];

        let outcome = crawler.scrape(&seeds, CandidateSet::new()).await;

        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.candidates.contains(&Candidate::new("1.2.3.4", 8080)));
        assert_eq!(outcome.summary.count_for("http://good.test/"), Some(1));
        assert_eq!(outcome.summary.count_for("http://bad.test/"), Some(0));
        assert!(outcome.summary.sources[1].error.is_some());
        assert_eq!(outcome.summary.total_unique, 1);
    }

    #[tokio::test]
    async fn test_scrape_merges_across_sources() {
        let fetcher = MapFetcher::new(&[
            ("http://a.test/", "1.1.1.1:80 2.2.2.2:80"),
            ("http://b.test/", "2.2.2.2:80 3.3.3.3:80"),
        ]);
        let crawler = crawler(fetcher, Arc::new(NoPagination), 5);
        let seeds = vec!["a.test/".to_string(), "b.test/".to_string()];
        let known: CandidateSet = vec![Candidate::new("3.3.3.3", 80)].into_iter().collect();

        let outcome = crawler.scrape(&seeds, known).await;

        assert_eq!(outcome.candidates.len(), 3);
        assert_eq!(outcome.summary.total_unique, 3);
        assert_eq!(outcome.summary.new_candidates, 2);
        assert_eq!(outcome.summary.count_for("a.test/"), Some(2));
        assert_eq!(outcome.summary.count_for("b.test/"), Some(2));
    }

    #[tokio::test]
    async fn test_scrape_reports_invalid_seed() {
        let crawler = crawler(MapFetcher::new(&[]), Arc::new(NoPagination), 5);
        let outcome = crawler
            .scrape(&["http://[::1".to_string()], CandidateSet::new())
            .await;

        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.summary.sources[0].candidates, 0);
        assert!(outcome.summary.sources[0].error.is_some());
    }

    /// Holds `slow.test` until released, serves everything else at once
    struct GatedFetcher {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl PageFetcher for GatedFetcher {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            if url.host_str() == Some("slow.test") {
                self.release.notified().await;
            }
            Ok("1.2.3.4:8080".to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finished_sources_counts_completions() {
        let fetcher = Arc::new(GatedFetcher {
            release: tokio::sync::Notify::new(),
        });
        let config = CrawlerConfig::new()
            .with_max_workers(4)
            .with_delay(Duration::ZERO);
        let crawler = Arc::new(ProxyCrawler::with_parts(
            config,
            Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
            Arc::new(NoPagination),
        ));

        let running = Arc::clone(&crawler);
        let scrape = tokio::spawn(async move {
            let seeds = vec!["http://slow.test/".to_string(), "http://fast.test/".to_string()];
            running.scrape(&seeds, CandidateSet::new()).await
        });

        for _ in 0..200 {
            if crawler.finished_sources() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(crawler.finished_sources(), 1);

        fetcher.release.notify_one();
        let outcome = scrape.await.unwrap();
        assert_eq!(crawler.finished_sources(), 2);
        assert_eq!(outcome.summary.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_new_candidates_are_sent_once() {
        let fetcher = MapFetcher::new(&[
            ("http://a.test/", "1.1.1.1:80 2.2.2.2:80"),
            ("http://b.test/", "2.2.2.2:80 3.3.3.3:80"),
        ]);
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let crawler =
            crawler(fetcher, Arc::new(NoPagination), 5).with_discovery_channel(sender);
        let seeds = vec!["http://a.test/".to_string(), "http://b.test/".to_string()];
        let known: CandidateSet = vec![Candidate::new("3.3.3.3", 80)].into_iter().collect();

        let outcome = crawler.scrape(&seeds, known).await;
        drop(crawler);

        let mut sent = Vec::new();
        while let Some(candidate) = receiver.recv().await {
            sent.push(candidate.to_string());
        }
        sent.sort();

        assert_eq!(sent, vec!["1.1.1.1:80", "2.2.2.2:80"]);
        assert_eq!(outcome.summary.new_candidates, 2);
    }

    #[test]
    fn test_load_seed_file() {
        let path = std::env::temp_dir().join(format!("proxy-sweep-seeds-{}.txt", std::process::id()));
        std::fs::write(&path, "# sources\nhttps://a.test/\n\n  https://b.test/  \n").unwrap();
        let seeds = load_seed_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(seeds, vec!["https://a.test/", "https://b.test/"]);
    }

    #[test]
    fn test_load_missing_seed_file() {
        let result = load_seed_file("/nonexistent/proxy_sources.txt");
        assert!(matches!(result, Err(SetupError::InputFile { .. })));
    }
}
