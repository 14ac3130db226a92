use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Site;
use crate::http_client::PageSource;
use crate::parser::{ListingPage, parse_listing};

/// Walks the paginated listing and collects detail-page links.
pub struct ListingScanner<S> {
    source: Arc<S>,
    site: Site,
}

impl<S: PageSource> ListingScanner<S> {
    pub fn new(source: Arc<S>, site: Site) -> Self {
        Self { source, site }
    }

    /// Number of listing pages according to page 1's "last page" link.
    ///
    /// Falls back to 1 when the link is missing or unusable.
    pub async fn total_pages(&self) -> u32 {
        let found = self.fetch_listing(1).await.and_then(|page| page.last_page);
        match found {
            Some(total) if total > 0 => total,
            _ => {
                info!("no usable last-page link on the first listing page, assuming a single page");
                1
            }
        }
    }

    /// Detail-page links on one listing page; empty if the page is unavailable.
    pub async fn scan(&self, page: u32) -> BTreeSet<String> {
        match self.fetch_listing(page).await {
            Some(listing) => {
                debug!(page, links = listing.detail_links.len(), "scanned listing page");
                listing.detail_links.into_iter().collect()
            }
            None => {
                warn!(page, "failed to load listing page");
                BTreeSet::new()
            }
        }
    }

    async fn fetch_listing(&self, page: u32) -> Option<ListingPage> {
        let url = self.site.listing_url(page);
        let html = self.source.fetch_page(&url).await?;
        match parse_listing(&html, &self.site.base_url) {
            Ok(listing) => Some(listing),
            Err(e) => {
                warn!(url = %url, error = %e, "failed to parse listing page");
                None
            }
        }
    }
}
