use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use carat::backend::{HttpBackend, Shape};
use carat::crawl::{crawl, CrawlOptions};
use carat::range::SearchRange;
use carat::retry::RetryPolicy;
use carat::{
    info_time, output, Error, Result, CALL_TIMEOUT_SECS, DEFAULT_BASE_URL, DEFAULT_MAX_PRICE,
    DEFAULT_MIN_PRICE, DEFAULT_WORKERS,
};

/// Downloads the complete diamond catalog for one shape and writes it as CSV.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Shape to crawl (round, princess, cushion, emerald, oval, radiant,
    /// asscher, marquise, heart, pear).
    shape: Shape,

    /// Output file. Pass `-` for stdout; defaults to diamonds_<shape>.csv.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Search endpoint to crawl.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Lower price bound in whole dollars.
    #[arg(long, default_value_t = DEFAULT_MIN_PRICE)]
    min_price: u64,

    /// Upper price bound in whole dollars.
    #[arg(long, default_value_t = DEFAULT_MAX_PRICE)]
    max_price: u64,

    /// Concurrent backend calls.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let start_time = Local::now();
    if args.min_price > args.max_price {
        return Err(Error::InvalidPriceBounds(args.min_price, args.max_price));
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info_time!("Interrupt received, letting in-flight calls finish");
                cancel.cancel();
            }
        }
    });

    let backend = HttpBackend::new(
        args.base_url,
        args.shape,
        Duration::from_secs(CALL_TIMEOUT_SECS),
    )?;
    let opts = CrawlOptions {
        domain: SearchRange::new(args.min_price * 100, args.max_price * 100),
        workers: args.workers,
        policy: RetryPolicy::default(),
        cancel,
    };

    info_time!("Started crawling {} diamonds over {}", args.shape, opts.domain);
    let (catalog, report) = crawl(Arc::new(backend), &opts).await?;
    report.log_summary(catalog.len());

    let out = match &args.out {
        Some(path) if path.as_os_str() == "-" => None,
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(format!("diamonds_{}.csv", args.shape))),
    };
    let records = catalog.into_records();
    output::write_catalog(&records, out.as_deref()).await?;

    info_time!(start_time, "Full program time:");
    Ok(())
}
