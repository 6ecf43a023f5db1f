use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use proxy_sweep::{
    logging::init_logging,
    proxy::crawler::load_seed_file,
    Candidate, CandidateSet, CheckOutcome, LiveChannels, Mode, OutputWriter, PaginationKind,
    Pipeline, PipelineInput, ProxyParser, ProxyType, RunOptions, ScrapeOutcome, SetupError,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};

/// Scrape proxy lists from the web and check which proxies work
#[derive(Parser)]
#[command(name = "proxy-sweep")]
#[command(about = "Scrape proxy lists from the web and check which proxies work")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML file with run options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Less log output
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,

    /// Number of concurrent workers
    #[arg(short = 'n', long, global = true)]
    max_workers: Option<usize>,

    /// Directory for summaries and classified lists
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape candidates from proxy listing sites
    Scrape(ScrapeArgs),
    /// Check candidates from a file
    Check(CheckArgs),
    /// Scrape, then check what was found
    Run {
        #[command(flatten)]
        scrape: ScrapeArgs,
        /// Timeout in seconds for each probe
        #[arg(long)]
        timeout: Option<f64>,
    },
}

#[derive(Args)]
struct ScrapeArgs {
    /// URLs to scrape (can specify multiple)
    #[arg(short, long)]
    url: Vec<String>,
    /// File containing URLs to scrape (one URL per line)
    #[arg(short = 'f', long)]
    url_file: Option<PathBuf>,
    /// Pages followed per URL
    #[arg(long)]
    max_pages: Option<usize>,
    /// Seconds to wait between pages of the same URL
    #[arg(long)]
    delay: Option<f64>,
    /// Next-page discovery (link-text, query-param, none)
    #[arg(long)]
    pagination: Option<PaginationKind>,
    /// Query parameter for query-param pagination
    #[arg(long)]
    page_param: Option<String>,
    /// Output file for scraped candidates
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Keep candidates already in the output file
    #[arg(long)]
    merge_existing: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Input file containing candidates (defaults to the scrape output)
    input: Option<PathBuf>,
    /// Timeout in seconds for each probe
    #[arg(long)]
    timeout: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose.min(3) as i8 - cli.quiet.min(3) as i8)?;

    let mut options = RunOptions::load(cli.config.as_deref())?;
    if let Some(max_workers) = cli.max_workers {
        options.max_workers = max_workers;
    }
    if let Some(output_dir) = &cli.output_dir {
        options.output_dir = output_dir.clone();
    }

    let (scrape_args, check_input) = match &cli.command {
        Some(Commands::Scrape(args)) => {
            options.mode = Mode::Scrape;
            apply_scrape_args(&mut options, args);
            (Some(args), None)
        }
        Some(Commands::Check(args)) => {
            options.mode = Mode::Check;
            if let Some(timeout) = args.timeout {
                options.timeout_seconds = timeout;
            }
            (None, args.input.as_deref())
        }
        Some(Commands::Run { scrape, timeout }) => {
            options.mode = Mode::Both;
            apply_scrape_args(&mut options, scrape);
            if let Some(timeout) = timeout {
                options.timeout_seconds = *timeout;
            }
            (Some(scrape), None)
        }
        None => (None, None),
    };

    let options = options.validate()?;
    let writer = OutputWriter::prepare(&options.output_dir)?;

    let proxy_file = writer.resolve(&options.proxy_file);
    let merge_existing = scrape_args.is_some_and(|args| args.merge_existing);
    let mut input = PipelineInput::default();
    if options.mode.scrapes() {
        match resolve_seeds(scrape_args, &options) {
            Ok(seeds) => {
                input.seeds = seeds;
                if merge_existing {
                    input.known = load_existing(&proxy_file)?;
                }
            }
            Err(SetupError::NoSeedUrls) if options.mode == Mode::Both && proxy_file.exists() => {
                warn!("No seed URLs, falling back to {}", proxy_file.display());
                input.candidates = load_candidates(&proxy_file)?;
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        let path = match check_input {
            Some(path) => path.to_path_buf(),
            None => writer.resolve(&options.proxy_file),
        };
        input.candidates = load_candidates(&path)?;
    }

    let scraping = !input.seeds.is_empty();
    let live = writer
        .open_live(
            scraping.then_some(options.proxy_file.as_path()),
            merge_existing,
            options.mode.checks(),
        )
        .await?;
    let (discovered_tx, discovered_rx) = unbounded_channel();
    let (checked_tx, checked_rx) = unbounded_channel();
    let recorder = tokio::spawn(live.record(discovered_rx, checked_rx));

    let pipeline = Pipeline::new(options.clone())?.with_live_channels(LiveChannels {
        discovered: Some(discovered_tx),
        checked: Some(checked_tx),
    });
    let known = input.known.clone();
    let started = Instant::now();

    let report = tokio::select! {
        report = pipeline.run(input) => Some(report?),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, saving partial results");
            None
        }
    };
    drop(pipeline);
    let record = recorder.await?;

    let Some(report) = report else {
        if scraping {
            let mut found = known;
            found.merge(record.discovered);
            writer.write_candidates(&options.proxy_file, &found)?;
        }
        if options.mode.checks() {
            let outcome =
                CheckOutcome::from_results(record.checked, started.elapsed().as_secs_f64());
            writer.write_check(&outcome)?;
            log_check(&outcome);
        }
        return Ok(());
    };

    if let Some(outcome) = &report.scrape {
        writer.write_scrape(outcome, &options.proxy_file)?;
        log_scrape(outcome);
    }
    if let Some(outcome) = &report.check {
        writer.write_check(outcome)?;
        log_check(outcome);
    }

    Ok(())
}

fn apply_scrape_args(options: &mut RunOptions, args: &ScrapeArgs) {
    if let Some(max_pages) = args.max_pages {
        options.max_pages = max_pages;
    }
    if let Some(delay) = args.delay {
        options.delay_seconds = delay;
    }
    if let Some(pagination) = args.pagination {
        options.pagination = pagination;
    }
    if let Some(page_param) = &args.page_param {
        options.page_param = page_param.clone();
    }
    if let Some(output) = &args.output {
        options.proxy_file = output.clone();
    }
}

/// Seed URLs from the command line and `--url-file`, else the sources file
fn resolve_seeds(
    args: Option<&ScrapeArgs>,
    options: &RunOptions,
) -> Result<Vec<String>, SetupError> {
    let mut seeds = Vec::new();
    if let Some(args) = args {
        seeds.extend(args.url.iter().cloned());
        if let Some(path) = &args.url_file {
            let loaded = load_seed_file(path)?;
            info!("Loaded {} URLs from {}", loaded.len(), path.display());
            seeds.extend(loaded);
        }
    }

    if seeds.is_empty() && options.sources_file.exists() {
        seeds = load_seed_file(&options.sources_file)?;
        info!(
            "Loaded {} URLs from {}",
            seeds.len(),
            options.sources_file.display()
        );
    }

    if seeds.is_empty() {
        return Err(SetupError::NoSeedUrls);
    }
    Ok(seeds)
}

fn load_existing(path: &Path) -> Result<CandidateSet, SetupError> {
    if !path.exists() {
        return Ok(CandidateSet::new());
    }
    let existing: CandidateSet = ProxyParser::parse_file(path)?.into_iter().collect();
    info!(
        "Loaded {} existing candidates from {}",
        existing.len(),
        path.display()
    );
    Ok(existing)
}

fn load_candidates(path: &Path) -> Result<Vec<Candidate>, SetupError> {
    if !path.exists() {
        return Err(SetupError::NoCandidateInput(path.to_path_buf()));
    }
    let candidates = ProxyParser::parse_file(path)?;
    if candidates.is_empty() {
        warn!("No candidates found in {}", path.display());
    } else {
        info!("Loaded {} candidates from {}", candidates.len(), path.display());
    }
    Ok(candidates)
}

fn log_scrape(outcome: &ScrapeOutcome) {
    let summary = &outcome.summary;
    for source in &summary.sources {
        match &source.error {
            Some(error) if source.pages == 0 => {
                warn!("{}: 0 candidates ({})", source.source, error)
            }
            _ => info!(
                "{}: {} candidates from {} pages",
                source.source, source.candidates, source.pages
            ),
        }
    }
    info!(
        "Total unique candidates: {} ({} new)",
        summary.total_unique, summary.new_candidates
    );
}

fn log_check(outcome: &CheckOutcome) {
    let summary = &outcome.summary;
    info!(
        "Checked {} candidates in {:.1}s",
        summary.attempted, summary.duration_secs
    );
    for proxy_type in ProxyType::ALL {
        info!("{}: {}", proxy_type.label(), summary.passed(proxy_type));
    }
    info!(
        "Working: {}, failed: {}, success rate: {:.1}%",
        summary.working, summary.failed, summary.success_rate
    );
}
