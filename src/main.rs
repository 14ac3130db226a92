use std::sync::Arc;

use anyhow::{Context, Result};
use catalog_crawler::config::Config;
use catalog_crawler::ui::{self, RunStats};
use catalog_crawler::{CatalogStore, Crawler, HttpClient, logging};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "catalog-crawler",
    version,
    about = "Enrich a media catalog from a paginated listing site"
)]
struct Args {
    /// Number of listing pages to crawl; 0 crawls every discoverable page
    #[arg(long, default_value_t = 0)]
    pages: u32,
}

/// Keeps only the arguments this tool understands so wrappers can pass extra
/// flags through without failing the run.
fn known_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut args = args.into_iter();
    let mut kept: Vec<String> = args.next().into_iter().collect();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pages" => {
                kept.push(arg);
                kept.extend(args.next());
            }
            "-h" | "--help" | "-V" | "--version" => kept.push(arg),
            _ if arg.starts_with("--pages=") => kept.push(arg),
            _ => {}
        }
    }
    kept
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_from(known_args(std::env::args()));
    let config = Config::load().context("failed to load configuration")?;
    logging::init(&config.logging, config.ui.dashboard)?;

    let store = CatalogStore::new(&config.catalog);
    info!(path = %store.path().display(), "loading catalog");
    let catalog = store.load().context("failed to load catalog")?;
    info!(entries = catalog.len(), "catalog loaded");

    let site = config.site.resolve()?;
    let client = Arc::new(HttpClient::new(&config.fetch).context("failed to build HTTP client")?);
    let stats = Arc::new(RunStats::new());

    let dashboard = config.ui.dashboard.then(|| tokio::spawn(ui::run_ui(stats.clone())));

    let crawler = Crawler::new(client, site, config.crawl.workers).with_stats(stats.clone());
    let report = crawler.run(catalog, args.pages).await;
    stats.finish();

    if let Some(handle) = dashboard {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "dashboard error"),
            Err(e) => warn!(error = %e, "dashboard task failed"),
        }
    }

    info!(
        discovered = report.discovered,
        updated = report.summary.matched,
        added = report.summary.added,
        failed = report.summary.failed,
        "crawl finished"
    );

    let entries = report.catalog.len();
    let catalog = report.catalog;
    tokio::task::spawn_blocking(move || store.save(&catalog))
        .await
        .context("catalog save task failed")?
        .context("failed to save catalog")?;
    info!(entries, "catalog saved");

    Ok(())
}
