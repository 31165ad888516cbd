use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use sift_client::{ReqwestFetcher, SelectorConfig, SelectorExtractor};
use sift_core::{AggregateResult, Aggregator, AggregatorConfig};

#[derive(Parser)]
#[command(name = "sift", version, about = "Listing + detail page aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a listing page and merge every item with its detail page
    Listing {
        /// Listing URL
        #[arg(short, long)]
        url: String,

        /// Path to the JSON selector file
        #[arg(short, long, env = "SIFT_SELECTORS")]
        selectors: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Fetch a single detail page
    Item {
        /// Detail URL
        #[arg(short, long)]
        url: String,

        /// Path to the JSON selector file
        #[arg(short, long, env = "SIFT_SELECTORS")]
        selectors: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

/// Overrides for the aggregator settings; anything left unset falls back to
/// the `SIFT_*` environment variables, then to the defaults.
#[derive(Args, Debug, Default)]
struct EngineArgs {
    /// Maximum detail fetches in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Cache lifetime in seconds
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Per-item deadline in milliseconds
    #[arg(long)]
    item_timeout_ms: Option<u64>,

    /// Whole-request deadline in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Total fetch attempts per document
    #[arg(long)]
    max_retries: Option<u32>,

    /// Backoff after the first failed attempt, in milliseconds
    #[arg(long)]
    backoff_base_ms: Option<u64>,

    /// Upper bound on a single fetch attempt, in milliseconds
    #[arg(long)]
    attempt_timeout_ms: Option<u64>,

    /// Abort detail fetches that miss their deadline
    #[arg(long)]
    cancel_on_item_timeout: bool,
}

impl EngineArgs {
    fn apply(&self, mut config: AggregatorConfig) -> AggregatorConfig {
        if let Some(limit) = self.concurrency {
            config = config.with_concurrency(limit);
        }
        if let Some(secs) = self.cache_ttl_secs {
            config = config.with_cache_ttl(Duration::from_secs(secs));
        }
        if let Some(ms) = self.item_timeout_ms {
            config = config.with_item_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.request_timeout_ms {
            config = config.with_request_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = self.max_retries {
            config.retry.max_retries = n;
        }
        if let Some(ms) = self.backoff_base_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.attempt_timeout_ms {
            config.retry.attempt_timeout = Duration::from_millis(ms);
        }
        if self.cancel_on_item_timeout {
            config = config.with_cancel_on_item_timeout(true);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sift=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listing {
            url,
            selectors,
            format,
            engine,
        } => {
            let aggregator = build_aggregator(&selectors, &engine)?;
            let result = aggregator.aggregate(&url).await?;

            tracing::info!(
                items = result.items.len(),
                complete = result.complete_count(),
                partial = result.partial_count(),
                "Listing resolved"
            );

            let stdout = std::io::stdout();
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                OutputFormat::Csv => write_csv(&result, stdout.lock())?,
            }
        }
        Commands::Item {
            url,
            selectors,
            engine,
        } => {
            let aggregator = build_aggregator(&selectors, &engine)?;
            let item = aggregator.item(&url).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
    }

    Ok(())
}

fn build_aggregator(
    selectors: &Path,
    engine: &EngineArgs,
) -> Result<Aggregator<ReqwestFetcher, SelectorExtractor>> {
    let config = engine.apply(AggregatorConfig::from_env()?);
    config.validate()?;

    let selector_config = SelectorConfig::from_file(selectors)
        .with_context(|| format!("Failed to load selectors from {}", selectors.display()))?;
    let extractor = SelectorExtractor::new(&selector_config)?;

    // The CLI runs on the operator's behalf, so private addresses are allowed.
    let fetcher = ReqwestFetcher::with_timeout(config.retry.attempt_timeout)
        .context("Failed to create HTTP client")?
        .allow_private_urls();

    Ok(Aggregator::new(fetcher, extractor, config))
}

/// One row per item: status, reference, error, then every summary and
/// detail field seen anywhere in the result, prefixed by origin.
fn write_csv<W: Write>(result: &AggregateResult, writer: W) -> Result<()> {
    let summary_keys: BTreeSet<&str> = result
        .items
        .iter()
        .flat_map(|i| i.summary_fields.keys().map(String::as_str))
        .collect();
    let detail_keys: BTreeSet<&str> = result
        .items
        .iter()
        .flat_map(|i| i.detail_fields.keys().map(String::as_str))
        .collect();

    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec![
        "status".to_string(),
        "reference".to_string(),
        "error".to_string(),
    ];
    header.extend(summary_keys.iter().map(|k| format!("summary.{k}")));
    header.extend(detail_keys.iter().map(|k| format!("detail.{k}")));
    out.write_record(&header)?;

    for item in &result.items {
        let mut row = vec![
            item.status.as_str(),
            item.reference.as_deref().unwrap_or(""),
            item.error.as_deref().unwrap_or(""),
        ];
        row.extend(
            summary_keys
                .iter()
                .map(|k| item.summary_fields.get(*k).map_or("", String::as_str)),
        );
        row.extend(
            detail_keys
                .iter()
                .map(|k| item.detail_fields.get(*k).map_or("", String::as_str)),
        );
        out.write_record(&row)?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::models::{DetailResult, FieldMap, ListingItem};

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn csv_has_one_row_per_item_with_union_of_columns() {
        let result = AggregateResult {
            source_url: "https://shop.test/lamps".into(),
            header_fields: FieldMap::new(),
            items: vec![
                DetailResult::complete(
                    Some("/p/1".into()),
                    fields(&[("name", "Arc")]),
                    fields(&[("sku", "LMP-1")]),
                ),
                DetailResult::partial(
                    ListingItem::new(None, fields(&[("name", "Orphan, large")])),
                    "no detail reference",
                ),
            ],
            fetched_at: chrono::Utc::now(),
        };

        let mut buf = Vec::new();
        write_csv(&result, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "status,reference,error,summary.name,detail.sku");
        assert_eq!(lines[1], "complete,/p/1,,Arc,LMP-1");
        assert_eq!(lines[2], "partial,,no detail reference,\"Orphan, large\",");
    }

    #[test]
    fn flags_override_config() {
        let engine = EngineArgs {
            concurrency: Some(2),
            item_timeout_ms: Some(250),
            max_retries: Some(1),
            cancel_on_item_timeout: true,
            ..EngineArgs::default()
        };

        let config = engine.apply(AggregatorConfig::default());
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.item_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_retries, 1);
        assert!(config.cancel_on_item_timeout);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn cli_parses_listing_command() {
        let cli = Cli::try_parse_from([
            "sift",
            "listing",
            "--url",
            "https://shop.test/lamps",
            "--selectors",
            "selectors.json",
            "--format",
            "csv",
            "--concurrency",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Listing { format, engine, .. } => {
                assert_eq!(format, OutputFormat::Csv);
                assert_eq!(engine.concurrency, Some(3));
            }
            Commands::Item { .. } => panic!("expected listing command"),
        }
    }
}
