//! kuba-aggregate: run a grouped aggregation over synthetic series
//!
//! Seeds the in-memory backend with `hosts × dcs` series of one sample per
//! minute, runs `<kind>` bucketed by `--size` and grouped by `--group-by`,
//! then prints the result as JSON.
//!
//! ```text
//! kuba-aggregate --kind average --size 5 --unit minutes --group-by host
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use kuba_aggregation::aggregation::{Aggregation, BucketKind, KeyProjection};
use kuba_aggregation::backend::{MemoryBackend, MetricBackend, WriteMetric};
use kuba_aggregation::cache::MemoryAggregationCache;
use kuba_aggregation::concurrency::ReadWriteThreadPools;
use kuba_aggregation::config::EngineConfig;
use kuba_aggregation::query::{MetricQuery, QueryExecutor};
use kuba_aggregation::sampling::Sampling;
use kuba_aggregation::types::{DataPoint, DateRange, Series};
use kuba_aggregation::Error;

const MINUTE_MS: i64 = 60_000;

#[derive(Parser, Debug)]
#[command(name = "kuba-aggregate")]
#[command(about = "Run a grouped aggregation over synthetic series", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "KUBA_CONFIG")]
    config: Option<String>,

    /// Aggregation kind (sum, average, min, max, stddev)
    #[arg(short, long, default_value = "sum")]
    kind: String,

    /// Bucket width in `unit`
    #[arg(short, long)]
    size: Option<i64>,

    /// Lookback window in `unit`
    #[arg(short, long)]
    extent: Option<i64>,

    /// Time unit of size and extent
    #[arg(short, long)]
    unit: Option<String>,

    /// Tags to group by, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "host")]
    group_by: Vec<String>,

    /// Drop the group-by tags instead of keeping them
    #[arg(long)]
    collapse: bool,

    /// Number of synthetic hosts
    #[arg(long, default_value_t = 4)]
    hosts: usize,

    /// Number of synthetic datacenters
    #[arg(long, default_value_t = 2)]
    dcs: usize,

    /// Length of the queried range in minutes
    #[arg(long, default_value_t = 60)]
    minutes: i64,

    /// Print Prometheus metrics after the result
    #[arg(long)]
    metrics: bool,
}

fn load_config(args: &Args) -> Result<EngineConfig, Error> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file_with_env(path)?,
        None => EngineConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn synthetic_series(hosts: usize, dcs: usize) -> Vec<Series> {
    let mut series = Vec::with_capacity(hosts * dcs);
    for host in 0..hosts {
        for dc in 0..dcs {
            series.push(Series::new(
                "cpu_usage",
                [
                    ("host", format!("host-{}", host)),
                    ("dc", format!("dc-{}", dc)),
                ],
            ));
        }
    }
    series
}

fn synthetic_points(index: usize, minutes: i64) -> Vec<DataPoint> {
    (0..minutes)
        .map(|m| {
            let value = ((index as i64 * 7 + m * 3) % 17) as f64;
            DataPoint::new(m * MINUTE_MS, value)
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("kuba-aggregate {}", env!("CARGO_PKG_VERSION"));

    let pools = Arc::new(ReadWriteThreadPools::from_config(&config.pools)?);
    let backend = Arc::new(MemoryBackend::from_config(Arc::clone(&pools), &config.backend)?);

    let series = synthetic_series(args.hosts, args.dcs);
    for (i, s) in series.iter().enumerate() {
        let write = backend.write(WriteMetric::new(s.clone(), synthetic_points(i, args.minutes)));
        write.join().await.to_result()?;
    }
    info!(series = series.len(), minutes = args.minutes, "Backend seeded");

    let kind: BucketKind = args.kind.parse()?;
    let sampling = Sampling::create(args.unit.as_deref(), args.size, args.extent)?;
    let projection = if args.collapse {
        KeyProjection::collapse(args.group_by.iter().cloned())
    } else {
        KeyProjection::group(args.group_by.iter().cloned())
    };
    let aggregation = Aggregation::group(projection, Aggregation::bucket(kind, sampling));

    let range = DateRange::new(0, args.minutes * MINUTE_MS)?;
    let query = MetricQuery::new("cpu_usage", range, aggregation).with_series(series);

    let mut executor = QueryExecutor::new(backend, pools);
    if config.cache.enabled {
        executor = executor.with_cache(Arc::new(MemoryAggregationCache::from_config(&config.cache)?));
    }

    let outcome = executor.execute(query).join().await;
    let mut result = outcome.to_result()?;
    result.sort_groups();

    println!("{}", result.to_json()?);

    if args.metrics && config.monitoring.metrics_enabled {
        println!("{}", kuba_aggregation::metrics::gather_metrics());
    }

    Ok(())
}
