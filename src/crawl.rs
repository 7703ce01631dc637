use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, RawItem};
use crate::catalog::Catalog;
use crate::range::SearchRange;
use crate::retry::RetryPolicy;
use crate::{info_time, warn_time, Error, Result, PAGE_SIZE, WINDOW_CAP};

/// Knobs for one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Full price domain in cents.
    pub domain: SearchRange,
    /// Upper bound on concurrent backend calls.
    pub workers: usize,
    pub policy: RetryPolicy,
    pub cancel: CancellationToken,
}

/// A leaf range that couldn't be fully retrieved.
#[derive(Debug, Clone)]
pub struct Gap {
    pub range: SearchRange,
    /// Probed count, when the probe itself got through.
    pub expected: Option<usize>,
    pub retrieved: usize,
    pub detail: String,
}

/// What the crawl produced besides the catalog itself.
#[derive(Debug)]
pub struct CrawlReport {
    /// The full domain's probed count at crawl start.
    pub expected_total: usize,
    /// Leaf ranges the partitioner settled on and fully walked.
    pub leaves: usize,
    pub gaps: Vec<Gap>,
    pub cancelled: bool,
}

impl CrawlReport {
    /// Prints the completeness summary. Gaps are loud on purpose: silent
    /// truncation is the one failure mode this tool exists to rule out.
    pub fn log_summary(&self, catalog_size: usize) {
        info_time!(
            "Catalog holds {} unique items across {} leaf ranges (domain probe said {})",
            catalog_size,
            self.leaves,
            self.expected_total
        );
        if self.cancelled {
            warn_time!("Crawl was cancelled early, the output is a partial catalog");
        }
        for gap in &self.gaps {
            let expected = gap.expected.map_or_else(|| "?".to_string(), |n| n.to_string());
            warn_time!(
                "GAP {}: retrieved {} of {} ({})",
                gap.range,
                gap.retrieved,
                expected,
                gap.detail
            );
        }
        if self.gaps.is_empty() && !self.cancelled {
            info_time!("No gaps, the catalog is complete");
        }
    }

    fn push_gap(&mut self, gap: Gap) {
        // The same singleton can be reached through both children of a split
        // whose midpoint landed exactly on it; one report line is enough.
        if !self.gaps.iter().any(|g| g.range == gap.range) {
            self.gaps.push(gap);
        }
    }
}

/// Shared handles every range task needs.
struct CrawlCtx {
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
}

/// A pending range, plus its count when an earlier probe already knows it.
struct RangeJob {
    range: SearchRange,
    known_count: Option<usize>,
}

enum RangeOutcome {
    /// Count was over the window, recurse on both halves.
    Split(SearchRange, SearchRange),
    Leaf {
        range: SearchRange,
        expected: usize,
        retrieved: usize,
    },
    Failed {
        range: SearchRange,
        expected: Option<usize>,
        retrieved: usize,
        error: Error,
    },
}

/// Crawls the whole price domain and returns the deduplicated catalog plus
/// the completeness report.
///
/// The only fatal failure is the very first probe of the full domain; any
/// later trouble degrades into a reported gap.
pub async fn crawl(
    backend: Arc<dyn Backend>,
    opts: &CrawlOptions,
) -> Result<(Catalog, CrawlReport)> {
    let started = Local::now();
    let domain = opts.domain;
    let policy = opts.policy;

    let first = policy
        .run(|| {
            let backend = Arc::clone(&backend);
            async move { backend.probe(domain).await }
        })
        .await?;
    info_time!("Domain {} holds {} items", domain, first.total_matches);

    let ctx = Arc::new(CrawlCtx {
        backend,
        policy,
        limiter: Arc::new(Semaphore::new(opts.workers.max(1))),
        cancel: opts.cancel.clone(),
    });

    let (item_tx, item_rx) = mpsc::channel::<Vec<RawItem>>(256);
    let collect_handle = tokio::spawn(collect_items(item_rx));

    let mut report = CrawlReport {
        expected_total: first.total_matches,
        leaves: 0,
        gaps: Vec::new(),
        cancelled: false,
    };
    let mut queue = VecDeque::new();
    queue.push_back(RangeJob {
        range: domain,
        known_count: Some(first.total_matches),
    });
    let mut tasks: JoinSet<RangeOutcome> = JoinSet::new();

    loop {
        if ctx.cancel.is_cancelled() {
            if !queue.is_empty() {
                info_time!(
                    "Cancelled with {} ranges still pending, draining in-flight tasks",
                    queue.len()
                );
            }
            queue.clear();
            report.cancelled = true;
        }
        while let Some(job) = queue.pop_front() {
            let ctx = Arc::clone(&ctx);
            let item_tx = item_tx.clone();
            tasks.spawn(process_range(ctx, job, item_tx));
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined? {
            RangeOutcome::Split(left, right) => {
                queue.push_back(RangeJob {
                    range: left,
                    known_count: None,
                });
                queue.push_back(RangeJob {
                    range: right,
                    known_count: None,
                });
            }
            RangeOutcome::Leaf {
                range,
                expected,
                retrieved,
            } => {
                report.leaves += 1;
                if retrieved < expected {
                    let detail = if expected > WINDOW_CAP {
                        "window cap truncation at a single price point"
                    } else if ctx.cancel.is_cancelled() {
                        "cancelled mid-walk"
                    } else {
                        "backend returned fewer items than probed"
                    };
                    report.push_gap(Gap {
                        range,
                        expected: Some(expected),
                        retrieved,
                        detail: detail.to_string(),
                    });
                }
            }
            RangeOutcome::Failed {
                range,
                expected,
                retrieved,
                error,
            } => {
                report.push_gap(Gap {
                    range,
                    expected,
                    retrieved,
                    detail: error.to_string(),
                });
            }
        }
    }

    drop(item_tx);
    let catalog = collect_handle.await?;
    info_time!(
        started,
        "Crawl finished: {} unique items, {} leaves, {} gaps",
        catalog.len(),
        report.leaves,
        report.gaps.len()
    );
    Ok((catalog, report))
}

/// Probes one range and either splits it or walks it as a leaf.
async fn process_range(
    ctx: Arc<CrawlCtx>,
    job: RangeJob,
    item_tx: mpsc::Sender<Vec<RawItem>>,
) -> RangeOutcome {
    let range = job.range;
    let expected = match job.known_count {
        Some(count) => count,
        None => match probe_range(&ctx, range).await {
            Ok(count) => count,
            Err(error) => {
                return RangeOutcome::Failed {
                    range,
                    expected: None,
                    retrieved: 0,
                    error,
                }
            }
        },
    };

    if expected > WINDOW_CAP {
        if let Some((left, right)) = range.split() {
            return RangeOutcome::Split(left, right);
        }
        // A single price point over the window: nothing left to split, so
        // page out what the window reaches and report the shortfall.
        warn_time!(
            "{} holds {} items at one price point, only the first {} are reachable",
            range,
            expected,
            WINDOW_CAP
        );
    }

    let mut retrieved = 0;
    match walk_pages(&ctx, range, expected, &item_tx, &mut retrieved).await {
        Ok(()) => RangeOutcome::Leaf {
            range,
            expected,
            retrieved,
        },
        Err(error) => RangeOutcome::Failed {
            range,
            expected: Some(expected),
            retrieved,
            error,
        },
    }
}

async fn probe_range(ctx: &CrawlCtx, range: SearchRange) -> Result<usize> {
    let probe = ctx
        .policy
        .run(|| {
            let backend = Arc::clone(&ctx.backend);
            let limiter = Arc::clone(&ctx.limiter);
            async move {
                let _permit = limiter.acquire_owned().await.expect("crawl limiter closed");
                backend.probe(range).await
            }
        })
        .await?;
    Ok(probe.total_matches)
}

/// Pages through a leaf range until the probed count is in hand, the backend
/// clears `has_more`, or a page comes back empty, whichever happens first.
/// The cumulative-count stop guards against a backend that never clears
/// `has_more`.
async fn walk_pages(
    ctx: &CrawlCtx,
    range: SearchRange,
    expected: usize,
    item_tx: &mpsc::Sender<Vec<RawItem>>,
    retrieved: &mut usize,
) -> Result<()> {
    let target = expected.min(WINDOW_CAP);
    let mut offset = 0;

    while *retrieved < target && offset < WINDOW_CAP {
        if ctx.cancel.is_cancelled() {
            break;
        }
        // Never ask past the window: the backend truncates silently there.
        let page_size = PAGE_SIZE.min(WINDOW_CAP - offset);
        let page = ctx
            .policy
            .run(|| {
                let backend = Arc::clone(&ctx.backend);
                let limiter = Arc::clone(&ctx.limiter);
                async move {
                    let _permit = limiter.acquire_owned().await.expect("crawl limiter closed");
                    backend.fetch_page(range, offset, page_size).await
                }
            })
            .await?;

        if page.items.is_empty() {
            break;
        }
        *retrieved += page.items.len();
        offset += page_size;
        let has_more = page.has_more;
        item_tx.send(page.items).await?;
        if !has_more {
            break;
        }
    }
    Ok(())
}

/// Folds item batches from all leaf walkers into the one shared catalog.
/// Channel ownership stands in for a lock: this task is the only writer.
async fn collect_items(mut item_rx: mpsc::Receiver<Vec<RawItem>>) -> Catalog {
    let mut catalog = Catalog::default();
    while let Some(batch) = item_rx.recv().await {
        for item in batch {
            catalog.insert(item);
        }
    }
    catalog
}
