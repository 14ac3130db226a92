//! Two-phase crawl: a sequential listing scan, then concurrent detail fetches
//! reconciled one at a time.
//!
//! Extraction tasks only read from the network and send their results over a
//! channel. The catalog and its index are owned by the single loop draining
//! that channel, so no lock ever guards them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, DetailRecord};
use crate::config::Site;
use crate::detail::DetailExtractor;
use crate::http_client::PageSource;
use crate::listing::ListingScanner;
use crate::reconcile::{Reconciler, RunSummary};
use crate::ui::{Phase, RunStats};

/// Result of one detail extraction, as handed to the reconciling loop.
struct DetailOutcome {
    url: String,
    record: Option<DetailRecord>,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub catalog: Catalog,
    pub discovered: usize,
    pub summary: RunSummary,
}

pub struct Crawler<S> {
    scanner: ListingScanner<S>,
    extractor: Arc<DetailExtractor<S>>,
    workers: usize,
    stats: Arc<RunStats>,
}

impl<S: PageSource + 'static> Crawler<S> {
    pub fn new(source: Arc<S>, site: Site, workers: usize) -> Self {
        Self {
            scanner: ListingScanner::new(source.clone(), site.clone()),
            extractor: Arc::new(DetailExtractor::new(source, site)),
            workers: workers.max(1),
            stats: Arc::new(RunStats::new()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<RunStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    /// Crawls `page_cap` listing pages (all of them when 0) and reconciles
    /// every detail page found into `catalog`.
    pub async fn run(&self, catalog: Catalog, page_cap: u32) -> RunReport {
        let urls = self.discover(page_cap).await;
        let discovered = urls.len();
        info!(discovered, "collected detail URLs");

        let mut reconciler = Reconciler::new(catalog);
        self.fetch_details(urls, &mut reconciler).await;

        let (catalog, summary) = reconciler.into_parts();
        info!(
            matched = summary.matched,
            added = summary.added,
            failed = summary.failed,
            entries = catalog.len(),
            "detail phase finished"
        );
        RunReport {
            catalog,
            discovered,
            summary,
        }
    }

    /// Scans listing pages one after another and returns the distinct detail
    /// URLs found.
    pub async fn discover(&self, page_cap: u32) -> BTreeSet<String> {
        self.stats.set_phase(Phase::Listing);
        let total = if page_cap > 0 {
            info!(pages = page_cap, "crawling the first {page_cap} listing page(s) as requested");
            page_cap
        } else {
            let total = self.scanner.total_pages().await;
            info!(pages = total, "discovered listing page count");
            total
        };
        self.stats.listing_total.store(total as usize, Ordering::Relaxed);

        let mut urls = BTreeSet::new();
        for page in 1..=total {
            let found = self.scanner.scan(page).await;
            urls.extend(found);
            self.stats.listing_scanned.fetch_add(1, Ordering::Relaxed);
            self.stats.discovered.store(urls.len(), Ordering::Relaxed);
        }
        urls
    }

    async fn fetch_details(&self, urls: BTreeSet<String>, reconciler: &mut Reconciler) {
        self.stats.set_phase(Phase::Details);
        self.stats.discovered.store(urls.len(), Ordering::Relaxed);

        let (tx, rx) = mpsc::channel::<DetailOutcome>(self.workers * 2);
        let extractor = self.extractor.clone();
        let stats = self.stats.clone();
        let workers = self.workers;

        let producer = tokio::spawn(async move {
            stream::iter(urls)
                .for_each_concurrent(workers, |url| {
                    let extractor = extractor.clone();
                    let stats = stats.clone();
                    let tx = tx.clone();
                    async move {
                        stats.active_workers.fetch_add(1, Ordering::Relaxed);
                        // Own task per page so a panicking extraction only loses that page.
                        let task_url = url.clone();
                        let task = tokio::spawn(async move { extractor.extract(&task_url).await });
                        let record = match task.await {
                            Ok(record) => record,
                            Err(e) => {
                                warn!(url = %url, error = %e, "detail extraction task failed");
                                None
                            }
                        };
                        stats.active_workers.fetch_sub(1, Ordering::Relaxed);
                        if tx.send(DetailOutcome { url, record }).await.is_err() {
                            warn!("reconciler stopped before all details were delivered");
                        }
                    }
                })
                .await;
        });

        let mut outcomes = ReceiverStream::new(rx);
        while let Some(outcome) = outcomes.next().await {
            self.apply(outcome, reconciler);
        }

        if let Err(e) = producer.await {
            warn!(error = %e, "detail fetch pool terminated abnormally");
        }
    }

    fn apply(&self, outcome: DetailOutcome, reconciler: &mut Reconciler) {
        let DetailOutcome { url, record } = outcome;
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let Some(record) = record else {
            reconciler.skip();
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            self.stats.add_error(format!("{url}: unavailable"));
            return;
        };

        match reconciler.apply(record) {
            Ok(outcome) if outcome.matched => {
                debug!(url = %url, position = outcome.position, "updated existing entry");
                self.stats.matched.fetch_add(1, Ordering::Relaxed);
            }
            Ok(outcome) => {
                debug!(url = %url, position = outcome.position, "added new entry");
                self.stats.added.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "skipping record that could not be reconciled");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.stats.add_error(format!("{url}: {e}"));
            }
        }
    }
}
