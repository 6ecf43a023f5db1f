//! Run options
//!
//! Options are layered: built-in defaults, then an optional TOML file, then
//! `PROXY_SWEEP_*` environment variables. Command-line flags are applied on
//! top by the binary.

use crate::error::SetupError;
use crate::proxy::pagination::PaginationKind;
use crate::proxy::probe::ProbeTargets;
use crate::proxy::{CheckerConfig, CrawlerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable prefix, e.g. `PROXY_SWEEP_MAX_WORKERS=100`
const ENV_PREFIX: &str = "PROXY_SWEEP";

/// Which phases a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Scrape,
    Check,
    #[default]
    Both,
}

impl Mode {
    pub fn scrapes(self) -> bool {
        matches!(self, Mode::Scrape | Mode::Both)
    }

    pub fn checks(self) -> bool {
        matches!(self, Mode::Check | Mode::Both)
    }
}

/// Everything a run can be tuned with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub mode: Mode,
    /// Size of the scrape and check worker pools
    pub max_workers: usize,
    /// Hard limit for each probe
    pub timeout_seconds: f64,
    /// Pages followed per seed URL, the seed included
    pub max_pages: usize,
    /// Pause between two pages of the same seed URL
    pub delay_seconds: f64,
    /// Timeout for each page fetch
    pub fetch_timeout_seconds: f64,
    pub pagination: PaginationKind,
    /// Query parameter used by `query-param` pagination
    pub page_param: String,
    /// Directory receiving summaries and classified lists
    pub output_dir: PathBuf,
    /// Deduplicated scrape output, also the default check input
    pub proxy_file: PathBuf,
    /// Seed list used when no seed URLs are given
    pub sources_file: PathBuf,
    pub probe_targets: ProbeTargets,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Both,
            max_workers: 50,
            timeout_seconds: 10.0,
            max_pages: 5,
            delay_seconds: 1.0,
            fetch_timeout_seconds: 15.0,
            pagination: PaginationKind::LinkText,
            page_param: "page".to_string(),
            output_dir: PathBuf::from("."),
            proxy_file: PathBuf::from("proxy_list.txt"),
            sources_file: PathBuf::from("proxy_sources.txt"),
            probe_targets: ProbeTargets::default(),
        }
    }
}

impl RunOptions {
    /// Load defaults, then `file` (if any), then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, SetupError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&RunOptions::default())?);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        let options: RunOptions = builder.build()?.try_deserialize()?;
        Ok(options)
    }

    /// Reject values no run can work with; clamp `max_workers` to at least 1
    pub fn validate(mut self) -> Result<Self, SetupError> {
        if self.max_workers == 0 {
            warn!("max_workers must be at least 1, using 1");
            self.max_workers = 1;
        }
        if !positive(self.timeout_seconds) {
            return Err(SetupError::InvalidOption(format!(
                "timeout_seconds must be > 0, got {}",
                self.timeout_seconds
            )));
        }
        if self.max_pages == 0 {
            return Err(SetupError::InvalidOption(
                "max_pages must be > 0".to_string(),
            ));
        }
        if !(self.delay_seconds == 0.0 || positive(self.delay_seconds)) {
            return Err(SetupError::InvalidOption(format!(
                "delay_seconds must be >= 0, got {}",
                self.delay_seconds
            )));
        }
        if !positive(self.fetch_timeout_seconds) {
            return Err(SetupError::InvalidOption(format!(
                "fetch_timeout_seconds must be > 0, got {}",
                self.fetch_timeout_seconds
            )));
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_seconds)
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new()
            .with_timeout(Duration::from_secs_f64(self.fetch_timeout_seconds))
            .with_max_workers(self.max_workers)
            .with_max_pages(self.max_pages)
            .with_delay(self.delay())
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig::new()
            .with_max_workers(self.max_workers)
            .with_timeout(self.timeout())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
