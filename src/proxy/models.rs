//! Proxy data models

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Protocol a candidate can be probed for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Every protocol, in probe order
    pub const ALL: [ProxyType; 4] = [
        ProxyType::Http,
        ProxyType::Https,
        ProxyType::Socks4,
        ProxyType::Socks5,
    ];

    /// Stable slot of this protocol in per-protocol arrays
    pub fn index(self) -> usize {
        match self {
            ProxyType::Http => 0,
            ProxyType::Https => 1,
            ProxyType::Socks4 => 2,
            ProxyType::Socks5 => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProxyType::Http => "HTTP",
            ProxyType::Https => "HTTPS",
            ProxyType::Socks4 => "SOCKS4",
            ProxyType::Socks5 => "SOCKS5",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(format!(
                "invalid proxy type: {s}. Use: http, https, socks4, socks5"
            )),
        }
    }
}

/// A possible proxy endpoint discovered on a listing page.
///
/// Two candidates are the same iff their `host:port` forms are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Candidate {
    host: String,
    port: u16,
}

impl Candidate {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Proxy URL for the given scheme, e.g. `http://1.2.3.4:8080`
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Insertion-ordered set of candidates
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    order: Vec<Candidate>,
    seen: HashSet<Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate, returning `false` if it was already present
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        if self.seen.contains(&candidate) {
            return false;
        }
        self.seen.insert(candidate.clone());
        self.order.push(candidate);
        true
    }

    /// Union `other` into this set, returning how many entries were new
    pub fn merge<I: IntoIterator<Item = Candidate>>(&mut self, other: I) -> usize {
        other
            .into_iter()
            .map(|c| self.insert(c))
            .filter(|added| *added)
            .count()
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.seen.contains(candidate)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.order.iter()
    }

    /// Candidates sorted by their `host:port` text
    pub fn sorted(&self) -> Vec<Candidate> {
        let mut list = self.order.clone();
        list.sort_by_key(|c| c.to_string());
        list
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.order
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        let mut set = CandidateSet::new();
        set.merge(iter);
        set
    }
}

impl IntoIterator for CandidateSet {
    type Item = Candidate;
    type IntoIter = std::vec::IntoIter<Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Passed,
    Failed(String),
    Timeout,
}

/// One (candidate, protocol) probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    pub latency_ms: Option<u64>,
}

impl ProbeOutcome {
    pub fn passed(latency_ms: u64) -> Self {
        Self {
            status: ProbeStatus::Passed,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Failed(error.into()),
            latency_ms: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: ProbeStatus::Timeout,
            latency_ms: None,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self.status, ProbeStatus::Passed)
    }
}

/// Classification of one candidate after all of its probes finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub candidate: Candidate,
    pub passed: BTreeSet<ProxyType>,
    pub latency_ms: BTreeMap<ProxyType, u64>,
}

impl CheckResult {
    pub fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            passed: BTreeSet::new(),
            latency_ms: BTreeMap::new(),
        }
    }

    /// Record a probe. Only passing probes change the classification.
    pub fn record(&mut self, proxy_type: ProxyType, outcome: &ProbeOutcome) {
        if !outcome.is_passed() {
            return;
        }
        self.passed.insert(proxy_type);
        if let Some(ms) = outcome.latency_ms {
            self.latency_ms
                .entry(proxy_type)
                .and_modify(|best| *best = (*best).min(ms))
                .or_insert(ms);
        }
    }

    pub fn passes(&self, proxy_type: ProxyType) -> bool {
        self.passed.contains(&proxy_type)
    }

    pub fn is_working(&self) -> bool {
        !self.passed.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.passed.is_empty()
    }
}

/// Candidates found by one seed URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub candidates: usize,
    pub pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate record of a scrape phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub timestamp: DateTime<Local>,
    pub sources: Vec<SourceSummary>,
    pub total_unique: usize,
    pub new_candidates: usize,
}

impl ScrapeSummary {
    /// Candidate count recorded for `source`, if it was scraped
    pub fn count_for(&self, source: &str) -> Option<usize> {
        self.sources
            .iter()
            .find(|s| s.source == source)
            .map(|s| s.candidates)
    }
}

/// Aggregate record of a check phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub timestamp: DateTime<Local>,
    pub attempted: usize,
    pub per_protocol: BTreeMap<ProxyType, usize>,
    pub working: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub duration_secs: f64,
}

impl CheckSummary {
    pub fn from_results<'a, I>(results: I, duration_secs: f64) -> Self
    where
        I: IntoIterator<Item = &'a CheckResult>,
    {
        let mut per_protocol: BTreeMap<ProxyType, usize> =
            ProxyType::ALL.iter().map(|t| (*t, 0)).collect();
        let mut attempted = 0;
        let mut working = 0;

        for result in results {
            attempted += 1;
            if result.is_working() {
                working += 1;
            }
            for proxy_type in &result.passed {
                *per_protocol.entry(*proxy_type).or_insert(0) += 1;
            }
        }

        let success_rate = if attempted == 0 {
            0.0
        } else {
            working as f64 / attempted as f64 * 100.0
        };

        Self {
            timestamp: Local::now(),
            attempted,
            per_protocol,
            working,
            failed: attempted - working,
            success_rate,
            duration_secs,
        }
    }

    pub fn passed(&self, proxy_type: ProxyType) -> usize {
        self.per_protocol.get(&proxy_type).copied().unwrap_or(0)
    }
}
