//! Scrape and check composed into one run

use crate::config::{Mode, RunOptions};
use crate::error::SetupError;
use crate::proxy::crawler::{HttpFetcher, PageFetcher};
use crate::proxy::models::{Candidate, CandidateSet, CheckResult};
use crate::proxy::pagination::PaginationPolicy;
use crate::proxy::probe::{NetworkProber, Prober};
use crate::proxy::{CheckOutcome, ProxyChecker, ProxyCrawler, ScrapeOutcome};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// What a run starts from
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    /// Seed URLs to scrape
    pub seeds: Vec<String>,
    /// Candidates to check when the run does not scrape
    pub candidates: Vec<Candidate>,
    /// Candidates already known before scraping
    pub known: CandidateSet,
}

/// Where results go the moment they are known, ahead of the final report
#[derive(Debug, Clone, Default)]
pub struct LiveChannels {
    /// Candidates new to the scraped set
    pub discovered: Option<UnboundedSender<Candidate>>,
    /// Results of fully checked candidates
    pub checked: Option<UnboundedSender<CheckResult>>,
}

/// Outcomes of the phases a run executed
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub scrape: Option<ScrapeOutcome>,
    pub check: Option<CheckOutcome>,
}

/// Runs the scrape and check phases selected by [`RunOptions::mode`]
pub struct Pipeline {
    options: RunOptions,
    fetcher: Arc<dyn PageFetcher>,
    pagination: Arc<dyn PaginationPolicy>,
    prober: Arc<dyn Prober>,
    live: LiveChannels,
}

impl Pipeline {
    /// Create a pipeline talking to the network
    pub fn new(options: RunOptions) -> Result<Self, SetupError> {
        let crawler_config = options.crawler_config();
        let fetcher = HttpFetcher::new(crawler_config.timeout, &crawler_config.user_agent)?;
        let pagination = options.pagination.into_policy(&options.page_param);
        let prober = NetworkProber::new(options.probe_targets.clone());

        Ok(Self::with_components(
            options,
            Arc::new(fetcher),
            pagination,
            Arc::new(prober),
        ))
    }

    /// Create a pipeline from explicit collaborators
    pub fn with_components(
        options: RunOptions,
        fetcher: Arc<dyn PageFetcher>,
        pagination: Arc<dyn PaginationPolicy>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            options,
            fetcher,
            pagination,
            prober,
            live: LiveChannels::default(),
        }
    }

    /// Stream results to `live` while the run is in progress
    pub fn with_live_channels(mut self, live: LiveChannels) -> Self {
        self.live = live;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run the configured phases.
    ///
    /// When both phases run, the scraped set is checked directly and
    /// `input.candidates` is ignored, unless there are no seeds: then the
    /// scrape is skipped and `input.candidates` is checked instead. Only a
    /// missing seed list is fatal; fetch and probe failures end up in the
    /// report.
    pub async fn run(&self, input: PipelineInput) -> Result<PipelineReport, SetupError> {
        let mut mode = self.options.mode;
        if mode.scrapes() && input.seeds.is_empty() {
            if mode != Mode::Both || input.candidates.is_empty() {
                return Err(SetupError::NoSeedUrls);
            }
            warn!(
                "No seed URLs, checking {} existing candidates",
                input.candidates.len()
            );
            mode = Mode::Check;
        }

        let mut report = PipelineReport::default();
        let mut candidates = input.candidates;

        if mode.scrapes() {
            let mut crawler = ProxyCrawler::with_parts(
                self.options.crawler_config(),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.pagination),
            );
            if let Some(sender) = &self.live.discovered {
                crawler = crawler.with_discovery_channel(sender.clone());
            }
            let outcome = crawler.scrape(&input.seeds, input.known).await;
            candidates = outcome.candidates.iter().cloned().collect();
            report.scrape = Some(outcome);
        }

        if mode.checks() {
            if mode.scrapes() && candidates.is_empty() {
                warn!("Scraping found no candidates, skipping the check phase");
                report.check = Some(CheckOutcome::from_results(Vec::new(), 0.0));
                return Ok(report);
            }

            info!("Checking {} candidates", candidates.len());
            let mut checker =
                ProxyChecker::with_prober(self.options.checker_config(), Arc::clone(&self.prober));
            if let Some(sender) = &self.live.checked {
                checker = checker.with_result_channel(sender.clone());
            }
            report.check = Some(checker.check(candidates).await);
        }

        Ok(report)
    }
}
