//! Error types
//!
//! Only [`SetupError`] ever reaches the caller of a run. Fetch and probe
//! failures are turned into data at the edge of their unit of work.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a run before any worker pool is started
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no seed URLs given and no proxy_sources.txt found")]
    NoSeedUrls,
    #[error("candidate file {} not found", .0.display())]
    NoCandidateInput(PathBuf),
    #[error("cannot read {path}: {source}")]
    InputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A single page fetch that did not produce a body
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("invalid URL {0}")]
    InvalidUrl(String),
    #[error("{0}")]
    Other(String),
}

/// Why a probe did not pass
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("handshake rejected: {0}")]
    Rejected(String),
}
