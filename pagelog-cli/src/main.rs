//! Pagelog CLI - inspect partitions under a local data directory

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pagelog_core::page::{PageCodec, PageHeader};
use pagelog_core::query::{Filter, FilterSpec, LogQuery, OnDiskQueryProcessor, QueryProcessor};
use pagelog_core::storage::{LogsConfig, PageIndex, DATA_FILE, INDEX_FILE};
use pagelog_core::StreamKey;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "pagelog", version, about = "Inspect pagelog partitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the page index of a partition
    Index {
        /// Partition directory or logfile.idx path
        path: PathBuf,
    },
    /// Decode one page of a partition and print its documents
    Page {
        /// Partition directory
        dir: PathBuf,
        /// Position of the page in the index
        #[arg(long, default_value_t = 0)]
        entry: usize,
    },
    /// Run a filtered query against a data directory
    Query {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        stream: String,
        /// Range start, epoch millis
        #[arg(long, default_value_t = 0)]
        start: i64,
        /// Range end, epoch millis
        #[arg(long, default_value_t = i64::MAX)]
        end: i64,
        #[arg(long, conflicts_with_all = ["trace", "regex", "filter"])]
        level: Option<i32>,
        #[arg(long, conflicts_with_all = ["regex", "filter"])]
        trace: Option<String>,
        #[arg(long, conflicts_with = "filter")]
        regex: Option<String>,
        /// Filter as JSON, e.g. {"kind":"LEVEL","levelCode":40}
        #[arg(long)]
        filter: Option<String>,
        /// Engine configuration as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Index { path } => show_index(path),
        Command::Page { dir, entry } => show_page(dir, entry),
        Command::Query {
            data_dir,
            tenant,
            stream,
            start,
            end,
            level,
            trace,
            regex,
            filter,
            config,
        } => {
            let filter = match (level, trace, regex, filter) {
                (Some(code), _, _, _) => Filter::level(code),
                (_, Some(id), _, _) => Filter::trace(id),
                (_, _, Some(pattern), _) => Filter::regex(&pattern)?,
                (_, _, _, Some(json)) => {
                    let spec: FilterSpec = serde_json::from_str(&json).context("parsing --filter")?;
                    Filter::try_from(spec)?
                }
                _ => Filter::regex("")?,
            };
            let mut config = load_config(config)?;
            config.layout.data_dir = data_dir;
            let query = LogQuery::new(StreamKey::new(tenant, stream), start, end, filter);
            run_query(config, query).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<LogsConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => LogsConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn index_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        path.join(INDEX_FILE)
    } else {
        path
    }
}

fn show_index(path: PathBuf) -> anyhow::Result<()> {
    let path = index_path(path);
    let index = PageIndex::read_from(&path).with_context(|| format!("reading {}", path.display()))?;

    println!(
        "{:>5} {:>12} {:>10} {:>15} {:>15} {:>8} {:>10}",
        "#", "offset", "length", "ts_start", "ts_end", "docs", "crc32"
    );
    for (i, e) in index.entries().iter().enumerate() {
        println!(
            "{:>5} {:>12} {:>10} {:>15} {:>15} {:>8} {:>10x}",
            i, e.offset, e.length, e.ts_start, e.ts_end, e.doc_count, e.crc32
        );
    }
    println!("{} pages, {} documents", index.len(), index.total_docs());
    Ok(())
}

fn show_page(dir: PathBuf, entry: usize) -> anyhow::Result<()> {
    let index = PageIndex::read_from(&dir.join(INDEX_FILE))?;
    let Some(e) = index.entries().get(entry) else {
        bail!("index has {} entries, no entry {}", index.len(), entry);
    };

    let data = std::fs::read(dir.join(DATA_FILE))?;
    let range = e.byte_range();
    let Some(bytes) = data.get(range.start as usize..range.end as usize) else {
        bail!("data file is {} bytes, page ends at {}", data.len(), range.end);
    };

    let header = PageHeader::parse(bytes)?;
    info!("Header: {:?}", header);
    let page = PageCodec::decode(bytes)?;
    eprintln!(
        "page {}: {} docs, ts {}..{}, {} trigram keys, {} level keys",
        entry,
        page.doc_count(),
        page.ts_start(),
        page.ts_end(),
        page.trigram_index().len(),
        page.level_index().len()
    );
    for doc in page.docs() {
        println!("{}", serde_json::to_string(doc)?);
    }
    Ok(())
}

async fn run_query(config: LogsConfig, query: LogQuery) -> anyhow::Result<()> {
    info!("Querying {} in {:?} with {}", query.stream, query.range, query.filter);

    let processor = OnDiskQueryProcessor::new(config.layout, &config.scan);
    let docs = processor.get_logs(&query).await?;
    for doc in &docs {
        println!("{}", serde_json::to_string(doc)?);
    }

    let stats = processor.stats();
    eprintln!(
        "{} documents; {} pages decoded, {} skipped, {} corrupt, {} bytes read",
        docs.len(),
        stats.pages_decoded,
        stats.pages_skipped,
        stats.corrupt_pages,
        stats.bytes_read
    );
    Ok(())
}
