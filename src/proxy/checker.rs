//! Proxy checker module for classifying candidates by protocol

use crate::pool::run_bounded;
use crate::proxy::models::{
    Candidate, CandidateSet, CheckResult, CheckSummary, ProbeOutcome, ProxyType,
};
use crate::proxy::probe::{NetworkProber, Prober};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of probes in flight
const DEFAULT_MAX_WORKERS: usize = 50;

/// Default interval between progress log lines
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Hard limit for each probe
    pub timeout: Duration,
    /// Number of probes in flight
    pub max_workers: usize,
    /// How often progress is logged while checking
    pub report_interval: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_workers: DEFAULT_MAX_WORKERS,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

/// Live counters of a running check.
///
/// Workers only ever increment; readers take a [`ProgressSnapshot`] without
/// blocking anyone.
#[derive(Debug, Default)]
pub struct CheckProgress {
    total_units: AtomicUsize,
    completed_units: AtomicUsize,
    candidates_done: AtomicUsize,
    working: AtomicUsize,
    passed: [AtomicUsize; 4],
}

impl CheckProgress {
    fn reset(&self, total_units: usize) {
        self.total_units.store(total_units, Ordering::Relaxed);
        self.completed_units.store(0, Ordering::Relaxed);
        self.candidates_done.store(0, Ordering::Relaxed);
        self.working.store(0, Ordering::Relaxed);
        for counter in &self.passed {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn unit_done(&self, proxy_type: ProxyType, passed: bool) {
        if passed {
            self.passed[proxy_type.index()].fetch_add(1, Ordering::Relaxed);
        }
        self.completed_units.fetch_add(1, Ordering::Relaxed);
    }

    fn candidate_done(&self, working: bool) {
        if working {
            self.working.fetch_add(1, Ordering::Relaxed);
        }
        self.candidates_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_units: self.total_units.load(Ordering::Relaxed),
            completed_units: self.completed_units.load(Ordering::Relaxed),
            candidates_done: self.candidates_done.load(Ordering::Relaxed),
            working: self.working.load(Ordering::Relaxed),
            passed: [
                self.passed[0].load(Ordering::Relaxed),
                self.passed[1].load(Ordering::Relaxed),
                self.passed[2].load(Ordering::Relaxed),
                self.passed[3].load(Ordering::Relaxed),
            ],
        }
    }
}

/// Point-in-time copy of [`CheckProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_units: usize,
    pub completed_units: usize,
    pub candidates_done: usize,
    pub working: usize,
    pub passed: [usize; 4],
}

impl ProgressSnapshot {
    pub fn passed(&self, proxy_type: ProxyType) -> usize {
        self.passed[proxy_type.index()]
    }

    pub fn percent(&self) -> f64 {
        if self.total_units == 0 {
            100.0
        } else {
            self.completed_units as f64 / self.total_units as f64 * 100.0
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%) - HTTP: {}, HTTPS: {}, SOCKS4: {}, SOCKS5: {}",
            self.completed_units,
            self.total_units,
            self.percent(),
            self.passed(ProxyType::Http),
            self.passed(ProxyType::Https),
            self.passed(ProxyType::Socks4),
            self.passed(ProxyType::Socks5),
        )
    }
}

/// Classification of every checked candidate plus its summary
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub results: BTreeMap<Candidate, CheckResult>,
    pub summary: CheckSummary,
}

impl CheckOutcome {
    /// Build an outcome from finished results, e.g. the ones collected
    /// before a check was interrupted
    pub fn from_results<I>(results: I, duration_secs: f64) -> Self
    where
        I: IntoIterator<Item = CheckResult>,
    {
        let results: BTreeMap<Candidate, CheckResult> = results
            .into_iter()
            .map(|r| (r.candidate.clone(), r))
            .collect();
        let summary = CheckSummary::from_results(results.values(), duration_secs);
        Self { results, summary }
    }

    /// Candidates that passed `proxy_type`, sorted
    pub fn working(&self, proxy_type: ProxyType) -> Vec<&Candidate> {
        self.results
            .values()
            .filter(|r| r.passes(proxy_type))
            .map(|r| &r.candidate)
            .collect()
    }

    /// Candidates that passed no protocol, sorted
    pub fn failed(&self) -> Vec<&Candidate> {
        self.results
            .values()
            .filter(|r| r.is_failed())
            .map(|r| &r.candidate)
            .collect()
    }
}

/// Per-candidate accumulator, written only by that candidate's probes
struct Slot {
    result: Mutex<CheckResult>,
    remaining: AtomicUsize,
}

/// Proxy checker probing every candidate for every protocol
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    prober: Arc<dyn Prober>,
    progress: Arc<CheckProgress>,
    finished: Option<UnboundedSender<CheckResult>>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker probing over the network
    pub fn with_config(config: CheckerConfig) -> Self {
        Self::with_prober(config, Arc::new(NetworkProber::default()))
    }

    /// Create a new proxy checker with a custom prober
    pub fn with_prober(config: CheckerConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            config,
            prober,
            progress: Arc::new(CheckProgress::default()),
            finished: None,
        }
    }

    /// Send every candidate's result on `sender` as soon as all of its
    /// probes are done
    pub fn with_result_channel(mut self, sender: UnboundedSender<CheckResult>) -> Self {
        self.finished = Some(sender);
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Counters of the current (or last) check, readable from any thread
    pub fn progress(&self) -> Arc<CheckProgress> {
        Arc::clone(&self.progress)
    }

    /// Probe every candidate for all four protocols and classify it.
    ///
    /// Duplicates in the input are dropped first. Returns once every probe
    /// has finished or hit its timeout; exactly one result exists per
    /// distinct candidate.
    pub async fn check<I>(&self, candidates: I) -> CheckOutcome
    where
        I: IntoIterator<Item = Candidate>,
    {
        let start = Instant::now();
        let mut loaded = 0;
        let unique: CandidateSet = candidates.into_iter().inspect(|_| loaded += 1).collect();
        if loaded > unique.len() {
            info!(
                "Removed {} duplicates - {} unique candidates to check",
                loaded - unique.len(),
                unique.len()
            );
        }

        let slots: Arc<Vec<Slot>> = Arc::new(
            unique
                .into_iter()
                .map(|candidate| Slot {
                    result: Mutex::new(CheckResult::new(candidate)),
                    remaining: AtomicUsize::new(ProxyType::ALL.len()),
                })
                .collect(),
        );
        let total_units = slots.len() * ProxyType::ALL.len();
        self.progress.reset(total_units);

        info!(
            "Checking {} candidates ({} probes) with {} workers, timeout {:?}",
            slots.len(),
            total_units,
            self.config.max_workers,
            self.config.timeout
        );

        let reporter = self.spawn_reporter();

        let units = (0..slots.len())
            .flat_map(|index| ProxyType::ALL.into_iter().map(move |t| (index, t)));
        let prober = Arc::clone(&self.prober);
        let progress = Arc::clone(&self.progress);
        let timeout = self.config.timeout;
        let shared = Arc::clone(&slots);
        let finished = self.finished.clone();

        run_bounded(units, self.config.max_workers, move |(index, proxy_type)| {
            let prober = Arc::clone(&prober);
            let progress = Arc::clone(&progress);
            let slots = Arc::clone(&shared);
            let finished = finished.clone();
            async move {
                let slot = &slots[index];
                let candidate = lock(&slot.result).candidate.clone();

                let outcome = match tokio::time::timeout(
                    timeout,
                    prober.probe(&candidate, proxy_type, timeout),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::timeout(),
                };

                let passed = outcome.is_passed();
                lock(&slot.result).record(proxy_type, &outcome);
                progress.unit_done(proxy_type, passed);

                if slot.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let result = lock(&slot.result).clone();
                    progress.candidate_done(result.is_working());
                    if result.is_working() {
                        let protocols: Vec<&str> =
                            result.passed.iter().map(|t| t.label()).collect();
                        info!("{} works for {}", candidate, protocols.join(", "));
                    } else {
                        debug!("{} failed every protocol", candidate);
                    }
                    if let Some(sender) = &finished {
                        sender.send(result).ok();
                    }
                }
            }
        })
        .await;

        reporter.abort();

        let results: Vec<CheckResult> = slots.iter().map(|slot| lock(&slot.result).clone()).collect();
        info!("Progress: {}", self.progress.snapshot());

        CheckOutcome::from_results(results, start.elapsed().as_secs_f64())
    }

    fn spawn_reporter(&self) -> tokio::task::JoinHandle<()> {
        let progress = Arc::clone(&self.progress);
        let interval = self.config.report_interval.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("Progress: {}", progress.snapshot());
            }
        })
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(result: &Mutex<CheckResult>) -> std::sync::MutexGuard<'_, CheckResult> {
    result.lock().unwrap_or_else(|e| e.into_inner())
}
