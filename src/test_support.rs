use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::http_client::PageSource;

/// In-memory pages keyed by URL; unknown URLs behave like failed fetches.
#[derive(Default)]
pub struct StaticPages {
    pages: HashMap<String, String>,
    panics: HashSet<String>,
    requested: Mutex<Vec<String>>,
}

impl StaticPages {
    pub fn with(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Makes fetching `url` panic, standing in for a crashing extraction.
    pub fn panicking(mut self, url: &str) -> Self {
        self.panics.insert(url.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl PageSource for StaticPages {
    async fn fetch_page(&self, url: &str) -> Option<String> {
        self.requested.lock().unwrap().push(url.to_string());
        if self.panics.contains(url) {
            panic!("simulated extraction failure for {url}");
        }
        self.pages.get(url).cloned()
    }
}
