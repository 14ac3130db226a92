//! Crawls a paginated video listing site and merges what it finds into a
//! JSON media catalog.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod detail;
pub mod http_client;
pub mod index;
pub mod listing;
pub mod logging;
pub mod parser;
pub mod reconcile;
pub mod store;
pub mod ui;

#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, CatalogEntry, DetailRecord, Episode, PlaySource};
pub use config::Config;
pub use crawler::{Crawler, RunReport};
pub use http_client::{HttpClient, PageSource};
pub use reconcile::{Reconciler, RunSummary};
pub use store::CatalogStore;
