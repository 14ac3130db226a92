use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::{DetailRecord, Episode, PlaySource};
use crate::config::Site;
use crate::http_client::PageSource;
use crate::parser::{DetailDocument, DetailPage, resolve_link};

pub const TITLE: &str = "片名：";
pub const ALIASES: &str = "别名：";
pub const RATING: &str = "豆瓣：";
pub const EXTERNAL_ID: &str = "豆瓣ID：";
pub const STATUS: &str = "状态：";
pub const GENRE: &str = "类型：";
pub const DIRECTOR: &str = "导演：";
pub const CAST: &str = "演员：";
pub const YEAR: &str = "年代：";
pub const REGION: &str = "地区：";
pub const LANGUAGE: &str = "语言：";
pub const TAGS: &str = "TAG标签：";
pub const UPDATED_AT: &str = "更新时间：";

/// Fetches detail pages and turns them into [`DetailRecord`]s.
pub struct DetailExtractor<S> {
    source: Arc<S>,
    site: Site,
}

impl<S: PageSource> DetailExtractor<S> {
    pub fn new(source: Arc<S>, site: Site) -> Self {
        Self { source, site }
    }

    /// `None` when the page could not be fetched or parsed.
    pub async fn extract(&self, url: &str) -> Option<DetailRecord> {
        let html = self.source.fetch_page(url).await?;
        match DetailDocument::parse(&html) {
            Ok(doc) => {
                let record = build_record(url, &doc, &self.site);
                debug!(
                    url,
                    title = %record.title,
                    episodes = record.play_sources.iter().map(|s| s.episodes.len()).sum::<usize>(),
                    "extracted detail page"
                );
                Some(record)
            }
            Err(e) => {
                warn!(url, error = %e, "failed to parse detail page");
                None
            }
        }
    }
}

/// Builds a record from whatever the page offers; missing parts become empty.
pub fn build_record(url: &str, page: &impl DetailPage, site: &Site) -> DetailRecord {
    let field = |label: &str| page.field(label).unwrap_or_default().to_string();

    let episodes: Vec<Episode> = page
        .episode_values()
        .iter()
        .filter_map(|value| parse_episode(value))
        .collect();
    let play_sources = if episodes.is_empty() {
        Vec::new()
    } else {
        vec![PlaySource {
            name: site.source_name.clone(),
            episodes,
        }]
    };

    DetailRecord {
        title: field(TITLE),
        aliases: field(ALIASES),
        rating: field(RATING),
        external_id: field(EXTERNAL_ID),
        status: field(STATUS),
        genre: field(GENRE),
        director: field(DIRECTOR),
        cast: field(CAST),
        year: field(YEAR),
        region: field(REGION),
        language: field(LANGUAGE),
        tags: field(TAGS),
        updated_at: field(UPDATED_AT),
        cover: absolute_cover(page.cover_src().unwrap_or_default(), site),
        synopsis: page.synopsis().unwrap_or_default().to_string(),
        detail_url: url.to_string(),
        play_sources,
    }
}

/// Parses `"<label>$<url>"`; values without a `$` are not episodes.
pub fn parse_episode(value: &str) -> Option<Episode> {
    if !value.contains('$') {
        return None;
    }
    let mut parts = value.split('$');
    let name = parts.next()?;
    let url = parts.next()?;
    Some(Episode {
        name: name.to_string(),
        url: url.to_string(),
    })
}

fn absolute_cover(src: &str, site: &Site) -> String {
    if src.is_empty() || src.starts_with("http") {
        return src.to_string();
    }
    resolve_link(&site.base_url, src).unwrap_or_else(|| src.to_string())
}
