use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use harx::index::EntryMetadata;
use harx::output;
use harx::scanner::ScannerKind;
use harx::search::{SearchMode, SearchOptions};
use harx::streamer::{HarStreamer, IndexStore, StreamerConfig};
use harx::utils::{AppConfig, CancelToken, ScanProgress};
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "harx")]
#[command(about = "Random-access explorer for HTTP Archive (HAR) files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable the decoded-entry cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Do not read or write a persisted index
    #[arg(long, global = true)]
    no_persist: bool,

    /// Scan through a memory map instead of buffered reads
    #[arg(long, global = true)]
    mapped: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or validate) the index for a HAR file
    Index {
        file: PathBuf,

        /// Ignore any persisted index and rebuild
        #[arg(short, long)]
        force: bool,
    },
    /// Show file and index statistics
    Stats { file: PathBuf },
    /// Show one entry
    Show {
        file: PathBuf,
        index: usize,

        /// Write the response body to stdout instead of the entry
        #[arg(short, long)]
        body: bool,
    },
    /// List entries, optionally filtered by metadata
    List {
        file: PathBuf,

        #[arg(short, long)]
        status: Option<u16>,

        #[arg(short, long)]
        method: Option<String>,

        /// Keep entries whose URL contains this text
        #[arg(short, long)]
        url_contains: Option<String>,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Search entries for a pattern
    Search {
        file: PathBuf,
        pattern: String,

        /// Treat the pattern as a regular expression
        #[arg(short, long)]
        regex: bool,

        #[arg(short, long)]
        ignore_case: bool,

        /// Also search response bodies
        #[arg(short, long)]
        deep: bool,

        /// Worker threads (0 = one per CPU)
        #[arg(short, long, default_value_t = 0)]
        workers: usize,

        /// Entries per work batch (0 = split evenly)
        #[arg(short, long, default_value_t = 0)]
        chunk: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "harx=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let app_config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load config, using defaults");
        AppConfig::default()
    });

    let mut config = StreamerConfig::from(&app_config);
    if cli.no_cache {
        config.cache_capacity = 0;
    }
    if cli.no_persist {
        config.index_store = IndexStore::Disabled;
    }
    if cli.mapped {
        config.scanner = ScannerKind::Mapped;
    }

    match cli.command {
        Commands::Index { file, force } => {
            config.force_rebuild = force;
            let streamer = open(&file, config)?;
            let summary = streamer.index()?.summary();
            let stats = streamer.stats()?;
            println!(
                "{} {} entries from {} in {} ms",
                if stats.index_from_disk { "Loaded" } else { "Indexed" },
                summary.total_entries,
                file.display(),
                stats.index_time_ms
            );
            if let Some(path) = streamer.index_path() {
                println!("Index location: {}", path.display());
            }
        }
        Commands::Stats { file } => {
            let streamer = open(&file, config)?;
            let index_path = streamer.index_path();
            let mut out = output::stdout(color());
            output::print_summary(
                &mut out,
                streamer.index()?,
                index_path.as_deref(),
                &streamer.stats()?,
            )?;
        }
        Commands::Show { file, index, body } => {
            let streamer = open(&file, config)?;
            if body {
                show_body(&streamer, index)?;
            } else {
                let entry = streamer
                    .get_entry(index)
                    .with_context(|| format!("Failed to read entry {}", index))?;
                output::print_entry_detail(&mut output::stdout(color()), index, &entry)?;
            }
        }
        Commands::List {
            file,
            status,
            method,
            url_contains,
            limit,
        } => {
            let streamer = open(&file, config)?;
            let matches = |meta: &EntryMetadata| {
                status.is_none_or(|s| meta.status == s)
                    && method
                        .as_deref()
                        .is_none_or(|m| meta.method.eq_ignore_ascii_case(m))
                    && url_contains
                        .as_deref()
                        .is_none_or(|u| meta.url.contains(u))
            };

            let mut out = output::stdout(color());
            let rows = streamer
                .index()?
                .entries()
                .iter()
                .enumerate()
                .filter(|(_, meta)| matches(meta))
                .take(limit.unwrap_or(usize::MAX));
            for (i, meta) in rows {
                output::print_entry_row(&mut out, i, meta)?;
            }
        }
        Commands::Search {
            file,
            pattern,
            regex,
            ignore_case,
            deep,
            workers,
            chunk,
        } => {
            let streamer = open(&file, config)?;
            let options = SearchOptions {
                mode: if regex {
                    SearchMode::Regex
                } else {
                    SearchMode::Literal
                },
                deep_body: deep,
                worker_count: workers,
                chunk_size: chunk,
                case_insensitive: ignore_case,
            };

            let stream = streamer
                .search(&pattern, &options, CancelToken::new())
                .context("Search failed")?;
            let results = stream.into_results();
            output::print_search_results(&mut output::stdout(color()), streamer.index()?, &results)?;

            let stats = streamer.stats()?;
            let matched = results.iter().filter(|r| r.is_match()).count();
            eprintln!(
                "{} matches, {} unreadable entries, {} us",
                matched,
                results.len() - matched,
                stats.last_search_us
            );
            output::print_run_stats(&mut io::stderr(), &stats)?;
        }
    }

    Ok(())
}

fn color() -> bool {
    io::stdout().is_terminal()
}

/// Initialize a streamer, drawing a progress bar while a build runs
fn open(file: &Path, config: StreamerConfig) -> Result<HarStreamer> {
    let size = fs::metadata(file)
        .with_context(|| format!("Cannot open {}", file.display()))?
        .len();
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }

    let mut streamer = HarStreamer::new(file, config);
    let progress = ScanProgress::new(size);
    let report = |bytes: u64| progress.update(bytes);
    let result = streamer.initialize_with_progress(&CancelToken::new(), &report);
    progress.finish();

    result.with_context(|| format!("Failed to index {}", file.display()))?;
    Ok(streamer)
}

fn show_body(streamer: &HarStreamer, index: usize) -> Result<()> {
    let mut body = streamer
        .stream_response_body(index)
        .with_context(|| format!("Failed to locate body of entry {}", index))?;
    if body.is_base64() {
        eprintln!("(body is base64 encoded)");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut body, &mut out).context("Failed to stream body")?;
    out.flush()?;
    Ok(())
}
