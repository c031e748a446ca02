//! Tierstore CLI
//!
//! Operator commands against a configured deployment:
//! - Store and query events across both tiers
//! - Expire, archive and restore windows
//! - Inspect chunks and run select queries against them

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures_util::TryStreamExt;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tierstore::config::generate_default_config;
use tierstore::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tierstore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tiered time-series event storage")]
#[command(long_about = "Tierstore keeps recent events in a hot store and archives older windows\nto blob storage, reading both tiers back as one.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store events read as JSON (an array or one event per line)
    Store {
        namespace: String,
        /// Input file (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Read events from both tiers
    Get {
        namespace: String,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        filters: FilterArgs,
        /// Include payloads
        #[arg(long)]
        payloads: bool,
        /// Newest first
        #[arg(long)]
        descending: bool,
        /// Maximum events (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Archive and then delete hot events before a timestamp
    Expire {
        namespace: String,
        /// Exclusive cutoff. Supports: "now", ISO 8601, Unix millis
        #[arg(short, long)]
        before: String,
    },

    /// Archive hot events without deleting them
    Archive {
        namespace: String,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Restore archived events into the hot store
    Restore {
        namespace: String,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Check whether any chunk overlaps a range
    HasArchives {
        namespace: String,
        #[command(flatten)]
        range: RangeArgs,
    },

    /// List chunk keys of a namespace
    Chunks { namespace: String },

    /// Run a select expression against one object
    Select {
        /// Object key
        key: String,
        /// SQL expression, e.g. "SELECT * FROM S3Object s WHERE s.timestamp > 0"
        sql: String,
        /// Bucket (default: the archive bucket)
        #[arg(short, long)]
        bucket: Option<String>,
        /// Input format (json, csv)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Rewrite the hot store's log as a snapshot
    Compact,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
pub struct RangeArgs {
    /// Inclusive start. Supports: "now", ISO 8601, Unix millis
    #[arg(short, long)]
    start: Option<String>,
    /// Inclusive end. Supports: "now", ISO 8601, Unix millis
    #[arg(short, long)]
    end: Option<String>,
}

impl RangeArgs {
    fn bounds(&self) -> anyhow::Result<(i64, i64)> {
        let start = self.start.as_deref().map(parse_timestamp).transpose()?;
        let end = self.end.as_deref().map(parse_timestamp).transpose()?;
        Ok((start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX)))
    }
}

#[derive(clap::Args)]
pub struct FilterArgs {
    /// Metadata filters in key=pattern format ("~prod-*" for wildcards)
    #[arg(short = 'm', long = "metadata")]
    metadata: Vec<String>,
    /// Dimension filters in key=predicate format (">=0.5", "<10")
    #[arg(short = 'd', long = "dimension")]
    dimensions: Vec<String>,
}

impl FilterArgs {
    fn metadata_query(&self) -> anyhow::Result<Option<BTreeMap<String, String>>> {
        parse_pairs(&self.metadata)
    }

    fn dimensions_query(&self) -> anyhow::Result<Option<BTreeMap<String, String>>> {
        parse_pairs(&self.dimensions)
    }
}

fn parse_pairs(pairs: &[String]) -> anyhow::Result<Option<BTreeMap<String, String>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Expected key=value, got {:?}", pair))
        })
        .collect::<anyhow::Result<BTreeMap<_, _>>>()
        .map(Some)
}

fn parse_timestamp(s: &str) -> anyhow::Result<i64> {
    if s == "now" {
        return Ok(Utc::now().timestamp_millis());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    s.parse::<i64>()
        .with_context(|| format!("Invalid timestamp format: {}", s))
}

/// The stores a command runs against
struct Deployment {
    hot: Arc<LogEventStore>,
    archiver: Arc<ChunkArchiver>,
    tiered: TieredEventStore,
}

impl Deployment {
    async fn open(config: &Config) -> anyhow::Result<Self> {
        let blobs: Arc<dyn BlobStore> = match config.object_store.backend {
            ObjectBackend::Memory => {
                tracing::warn!("Using the memory object backend; archives are lost on exit");
                Arc::new(MemoryBlobStore::with_page_size(config.object_store.list_page_size))
            }
            ObjectBackend::Filesystem => Arc::new(
                FsBlobStore::open(&config.object_store.root)
                    .await
                    .with_context(|| format!("Opening object root {}", config.object_store.root))?
                    .page_size(config.object_store.list_page_size),
            ),
        };

        let client = ObjectStoreClient::new(blobs, config.object_store.client_config());
        let archiver = Arc::new(ChunkArchiver::new(client, config.archiver_config()).await?);
        let hot = Arc::new(LogEventStore::open(config.hot_store.log_store_config())?);
        let tiered = TieredEventStore::new(hot.clone(), archiver.clone());

        Ok(Self {
            hot,
            archiver,
            tiered,
        })
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tierstore={}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_events(file: Option<&PathBuf>) -> anyhow::Result<Vec<Event>> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?,
        None => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            input
        }
    };

    if input.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&input)?);
    }
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", i + 1))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    init_logging(&config.logging);
    tracing::debug!("Tierstore v{}", env!("CARGO_PKG_VERSION"));

    let deployment = Deployment::open(&config).await?;

    match cli.command {
        Commands::Store { namespace, file } => {
            let events = read_events(file.as_ref())?;
            let count = events.len();
            deployment.tiered.store(&namespace, events).await?;
            deployment.hot.sync().await?;
            println!("Stored {} events in {}", count, namespace);
        }

        Commands::Get {
            namespace,
            range,
            filters,
            payloads,
            descending,
            limit,
        } => {
            let (start, end) = range.bounds()?;
            let query = EventQuery::range(start, end)
                .metadata_query(filters.metadata_query()?)
                .dimensions_query(filters.dimensions_query()?)
                .include_payloads(payloads)
                .ascending(!descending)
                .limit(limit);
            for event in deployment.tiered.get(&namespace, &query).await? {
                print_json(&event)?;
            }
        }

        Commands::Expire { namespace, before } => {
            let cutoff = parse_timestamp(&before)?;
            deployment.tiered.expire(&namespace, cutoff).await?;
            deployment.hot.sync().await?;
            println!("Expired {} before {}", namespace, cutoff);
        }

        Commands::Archive {
            namespace,
            range,
            filters,
        } => {
            let (start, end) = range.bounds()?;
            let metadata = filters.metadata_query()?;
            let dimensions = filters.dimensions_query()?;
            let report = deployment
                .archiver
                .archive(
                    &*deployment.hot,
                    &namespace,
                    start,
                    end,
                    metadata.as_ref(),
                    dimensions.as_ref(),
                )
                .await?;
            print_json(&report)?;
        }

        Commands::Restore { namespace, range } => {
            let (start, end) = range.bounds()?;
            let report = deployment
                .archiver
                .restore(&*deployment.hot, &namespace, start, end)
                .await?;
            deployment.hot.sync().await?;
            print_json(&report)?;
        }

        Commands::HasArchives { namespace, range } => {
            let (start, end) = range.bounds()?;
            let found = deployment.archiver.has_archives(&namespace, start, end).await?;
            println!("{}", found);
        }

        Commands::Chunks { namespace } => {
            for key in deployment.archiver.chunk_keys(&namespace).await? {
                match deployment.archiver.index().parse_key(&namespace, &key) {
                    Some(window) => println!("{}\t[{}, {})", key, window.start, window.end),
                    None => println!("{}", key),
                }
            }
        }

        Commands::Select {
            key,
            sql,
            bucket,
            format,
        } => {
            let format = match format.to_lowercase().as_str() {
                "json" => SelectFormat::Json,
                "csv" => SelectFormat::Csv,
                other => bail!("Unknown select format: {}", other),
            };
            let bucket = bucket.unwrap_or_else(|| config.archive.bucket.clone());
            let mut rows = deployment
                .archiver
                .client()
                .select_query(&bucket, &key, format, &sql)
                .await?;
            while let Some(row) = rows.try_next().await? {
                println!("{}", row.to_line()?);
            }
        }

        Commands::Compact => {
            deployment.hot.compact().await?;
            println!("Compacted log ({} records)", deployment.hot.wal_entries().await);
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}
