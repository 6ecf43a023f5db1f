//! Proxy Sweep - Proxy Scraper and Checker
//!
//! Scrapes `ip:port` candidates from proxy listing sites and checks each one
//! as an HTTP, HTTPS, SOCKS4 and SOCKS5 proxy, both on bounded worker pools.

pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod proxy;

pub use config::{Mode, RunOptions};
pub use error::{FetchError, ProbeError, SetupError};
pub use output::{LiveOutput, LiveRecord, OutputWriter};
pub use pipeline::{LiveChannels, Pipeline, PipelineInput, PipelineReport};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
