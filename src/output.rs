//! Writing run results to disk

use crate::error::SetupError;
use crate::proxy::models::{Candidate, CandidateSet, CheckResult, ProxyType};
use crate::proxy::{CheckOutcome, ScrapeOutcome};
use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Writes candidate lists and summaries under one directory.
///
/// Every file of a run shares the timestamp taken when the writer was
/// prepared.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    timestamp: String,
}

impl OutputWriter {
    /// Create `dir` if needed and make sure it is writable
    pub fn prepare<P: AsRef<Path>>(dir: P) -> Result<Self, SetupError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| SetupError::Output {
            path: dir.clone(),
            source,
        })?;

        let metadata = fs::metadata(&dir).map_err(|source| SetupError::Output {
            path: dir.clone(),
            source,
        })?;
        if metadata.permissions().readonly() {
            return Err(SetupError::Output {
                path: dir,
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "directory is read-only",
                ),
            });
        }

        Ok(Self {
            dir,
            timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Write the scraped set sorted to `proxy_file`, plus the scrape summary
    pub fn write_scrape(
        &self,
        outcome: &ScrapeOutcome,
        proxy_file: &Path,
    ) -> Result<Vec<PathBuf>, SetupError> {
        let list = self.write_candidates(proxy_file, &outcome.candidates)?;
        let summary = self.write_json(
            &format!("scrape_summary_{}.json", self.timestamp),
            &outcome.summary,
        )?;
        Ok(vec![list, summary])
    }

    /// Open the files that are appended to while the run is in progress.
    ///
    /// `proxy_file` receives new candidates as they are found; it is
    /// truncated first unless `keep_existing`. With `check`, the
    /// per-protocol and failed lists of this run receive each candidate as
    /// soon as all its probes are done. The final writes replace these
    /// files with sorted versions.
    pub async fn open_live(
        &self,
        proxy_file: Option<&Path>,
        keep_existing: bool,
        check: bool,
    ) -> Result<LiveOutput, SetupError> {
        let mut live = LiveOutput::default();

        if let Some(path) = proxy_file {
            live.proxy_list = Some(open_for_append(&self.resolve(path), !keep_existing).await?);
        }
        if check {
            for proxy_type in ProxyType::ALL {
                let name = format!("working_{}_proxies_{}.txt", proxy_type, self.timestamp);
                let file = open_for_append(&self.dir.join(name), true).await?;
                live.working.push((proxy_type, file));
            }
            let name = format!("failed_proxies_{}.txt", self.timestamp);
            live.failed = Some(open_for_append(&self.dir.join(name), true).await?);
        }

        Ok(live)
    }

    /// Write one list per protocol, the failed list and the check summary
    pub fn write_check(&self, outcome: &CheckOutcome) -> Result<Vec<PathBuf>, SetupError> {
        let mut written = Vec::new();

        for proxy_type in ProxyType::ALL {
            let name = format!("working_{}_proxies_{}.txt", proxy_type, self.timestamp);
            written.push(self.write_lines(&name, outcome.working(proxy_type))?);
        }
        let name = format!("failed_proxies_{}.txt", self.timestamp);
        written.push(self.write_lines(&name, outcome.failed())?);

        written.push(self.write_json(
            &format!("check_summary_{}.json", self.timestamp),
            &outcome.summary,
        )?);

        Ok(written)
    }

    /// Write a candidate set sorted, resolving relative paths against the
    /// output directory
    pub fn write_candidates(
        &self,
        path: &Path,
        candidates: &CandidateSet,
    ) -> Result<PathBuf, SetupError> {
        let sorted = candidates.sorted();
        let path = self.resolve(path);
        write_file(&path, render_lines(sorted.iter()))?;
        info!("Saved {} candidates to {}", sorted.len(), path.display());
        Ok(path)
    }

    fn write_lines<'a, I>(&self, name: &str, candidates: I) -> Result<PathBuf, SetupError>
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        let path = self.dir.join(name);
        write_file(&path, render_lines(candidates))?;
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, SetupError> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value).map_err(|e| SetupError::Output {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_file(&path, json)?;
        info!("Summary saved to {}", path.display());
        Ok(path)
    }

    /// Resolve a relative path against the output directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

/// Files fed line by line while a run is in progress
#[derive(Debug, Default)]
pub struct LiveOutput {
    proxy_list: Option<File>,
    working: Vec<(ProxyType, File)>,
    failed: Option<File>,
}

/// Everything that reached a [`LiveOutput`]
#[derive(Debug, Default)]
pub struct LiveRecord {
    pub discovered: Vec<Candidate>,
    pub checked: Vec<CheckResult>,
}

impl LiveOutput {
    /// Append from both channels until every sender is gone.
    ///
    /// Write failures are logged and do not stop the recording, so the
    /// returned record is complete either way.
    pub async fn record(
        mut self,
        mut discovered: UnboundedReceiver<Candidate>,
        mut checked: UnboundedReceiver<CheckResult>,
    ) -> LiveRecord {
        let mut record = LiveRecord::default();

        loop {
            tokio::select! {
                Some(candidate) = discovered.recv() => {
                    if let Some(file) = &mut self.proxy_list {
                        append_line(file, &candidate).await;
                    }
                    record.discovered.push(candidate);
                }
                Some(result) = checked.recv() => {
                    self.append_result(&result).await;
                    record.checked.push(result);
                }
                else => break,
            }
        }

        debug!(
            "Live output closed after {} candidates and {} results",
            record.discovered.len(),
            record.checked.len()
        );
        record
    }

    async fn append_result(&mut self, result: &CheckResult) {
        if result.is_working() {
            for (proxy_type, file) in &mut self.working {
                if result.passes(*proxy_type) {
                    append_line(file, &result.candidate).await;
                }
            }
        } else if let Some(file) = &mut self.failed {
            append_line(file, &result.candidate).await;
        }
    }
}

async fn open_for_append(path: &Path, truncate: bool) -> Result<File, SetupError> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(path).await.map_err(|source| SetupError::Output {
        path: path.to_path_buf(),
        source,
    })
}

async fn append_line(file: &mut File, candidate: &Candidate) {
    let line = format!("{candidate}\n");
    if let Err(e) = file.write_all(line.as_bytes()).await {
        warn!("Failed to save {}: {}", candidate, e);
        return;
    }
    if let Err(e) = file.flush().await {
        warn!("Failed to save {}: {}", candidate, e);
    }
}

/// Newline-delimited `host:port` text, newline-terminated when non-empty
fn render_lines<'a, I>(candidates: I) -> String
where
    I: IntoIterator<Item = &'a Candidate>,
{
    candidates
        .into_iter()
        .map(|c| format!("{c}\n"))
        .collect()
}

fn write_file(path: &Path, content: String) -> Result<(), SetupError> {
    fs::write(path, content).map_err(|source| SetupError::Output {
        path: path.to_path_buf(),
        source,
    })
}
