//! Match-or-insert of freshly extracted records against the catalog.
//!
//! Matched entries are only enriched: their play sources are merged and every
//! other field is left exactly as it was.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::catalog::{Catalog, CatalogEntry, DetailRecord, PlaySource, keys};
use crate::index::CatalogIndex;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("entry {position} has a malformed play-source list (found {found})")]
    MalformedPlaySources { position: usize, found: &'static str },
    #[error("index refers to missing catalog position {0}")]
    MissingPosition(usize),
}

/// Outcome of reconciling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub matched: bool,
    pub position: usize,
}

/// Reconciles a single record.
///
/// On error nothing has been modified.
pub fn reconcile(
    record: DetailRecord,
    index: &mut CatalogIndex,
    catalog: &mut Catalog,
) -> Result<Reconciliation, ReconcileError> {
    let external_id = record.external_id().map(str::to_string);
    let title = record.normalized_title().map(str::to_string);

    match index.lookup(external_id.as_deref(), title.as_deref()) {
        Some(position) => {
            let entry = catalog
                .get_mut(position)
                .ok_or(ReconcileError::MissingPosition(position))?;
            merge_play_sources(entry, &record.play_sources, position)?;
            Ok(Reconciliation { matched: true, position })
        }
        None => {
            let position = catalog.push(record.into_entry());
            index.register(position, external_id.as_deref(), title.as_deref());
            Ok(Reconciliation { matched: false, position })
        }
    }
}

/// Replaces same-named sources' episode lists and appends new sources.
fn merge_play_sources(
    entry: &mut CatalogEntry,
    incoming: &[PlaySource],
    position: usize,
) -> Result<(), ReconcileError> {
    let slot = entry
        .fields_mut()
        .entry(keys::PLAY_SOURCES)
        .or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    let existing = match slot {
        Value::Array(existing) => existing,
        other => {
            return Err(ReconcileError::MalformedPlaySources {
                position,
                found: json_kind(other),
            });
        }
    };

    for source in incoming {
        let same_name = existing
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .find(|s| {
                s.get(keys::SOURCE_NAME).and_then(Value::as_str) == Some(source.name.as_str())
            });
        match same_name {
            Some(current) => {
                current.insert(keys::EPISODES.to_string(), source.episodes_value());
            }
            None => existing.push(source.to_value()),
        }
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Counters for the end-of-run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub matched: usize,
    pub added: usize,
    pub failed: usize,
}

/// Owns the catalog and its index for the duration of a run and applies
/// records one at a time.
#[derive(Debug)]
pub struct Reconciler {
    catalog: Catalog,
    index: CatalogIndex,
    summary: RunSummary,
}

impl Reconciler {
    pub fn new(catalog: Catalog) -> Self {
        let index = CatalogIndex::build(&catalog);
        debug!(
            entries = catalog.len(),
            ids = index.external_id_count(),
            titles = index.title_count(),
            "built catalog index"
        );
        Self {
            catalog,
            index,
            summary: RunSummary::default(),
        }
    }

    pub fn apply(&mut self, record: DetailRecord) -> Result<Reconciliation, ReconcileError> {
        match reconcile(record, &mut self.index, &mut self.catalog) {
            Ok(outcome) => {
                if outcome.matched {
                    self.summary.matched += 1;
                } else {
                    self.summary.added += 1;
                }
                Ok(outcome)
            }
            Err(e) => {
                self.summary.failed += 1;
                Err(e)
            }
        }
    }

    /// Counts an item that never reached reconciliation.
    pub fn skip(&mut self) {
        self.summary.failed += 1;
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn into_parts(self) -> (Catalog, RunSummary) {
        (self.catalog, self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Episode;
    use serde_json::json;

    fn catalog(value: Value) -> Catalog {
        serde_json::from_value(value).unwrap()
    }

    fn source(name: &str, episodes: &[(&str, &str)]) -> PlaySource {
        PlaySource {
            name: name.to_string(),
            episodes: episodes
                .iter()
                .map(|(name, url)| Episode {
                    name: name.to_string(),
                    url: url.to_string(),
                })
                .collect(),
        }
    }

    fn record(title: &str, id: &str, sources: Vec<PlaySource>) -> DetailRecord {
        DetailRecord {
            title: title.to_string(),
            external_id: id.to_string(),
            detail_url: format!("https://example.com/detail/{title}.html"),
            play_sources: sources,
            ..Default::default()
        }
    }

    #[test]
    fn test_external_id_beats_title() {
        let mut reconciler = Reconciler::new(catalog(json!([
            {"片名": "By Id", "豆瓣ID": "12345"},
            {"片名": "X"},
        ])));

        let outcome = reconciler
            .apply(record("X", "12345", vec![source("暴风资源", &[("1", "u1")])]))
            .unwrap();

        assert_eq!(outcome, Reconciliation { matched: true, position: 0 });
        assert!(reconciler.catalog().get(0).unwrap().get(keys::PLAY_SOURCES).is_some());
        assert!(reconciler.catalog().get(1).unwrap().get(keys::PLAY_SOURCES).is_none());
    }

    #[test]
    fn test_unknown_id_falls_back_to_first_title() {
        let mut reconciler = Reconciler::new(catalog(json!([
            {"片名": "Dup", "豆瓣ID": "1"},
            {"片名": "Dup", "豆瓣ID": "2"},
        ])));

        let outcome = reconciler.apply(record(" Dup ", "3", vec![])).unwrap();
        assert_eq!(outcome, Reconciliation { matched: true, position: 0 });
    }

    #[test]
    fn test_matched_entry_only_gains_sources() {
        let original = json!({
            "片名": "Kept",
            "豆瓣ID": 99,
            "剧情介绍": "curated synopsis",
            "封面": "https://img.example.com/curated.jpg",
            "extra": {"nested": [1, 2, 3]},
        });
        let mut reconciler = Reconciler::new(catalog(json!([original.clone()])));

        let mut incoming = record("Kept", "99", vec![source("暴风资源", &[("1", "u1")])]);
        incoming.synopsis = "scraped synopsis".to_string();
        incoming.cover = "https://other.example.com/x.jpg".to_string();
        reconciler.apply(incoming).unwrap();

        let mut after = reconciler.catalog().get(0).unwrap().fields().clone();
        let sources = after.remove(keys::PLAY_SOURCES).unwrap();
        assert_eq!(Value::Object(after), original);
        assert_eq!(
            sources,
            json!([{"source": "暴风资源", "episodes": [{"name": "1", "url": "u1"}]}])
        );
    }

    #[test]
    fn test_same_name_source_is_replaced() {
        let mut reconciler = Reconciler::new(catalog(json!([
            {"片名": "Show", "播放地址": [
                {"source": "其他资源", "episodes": [{"name": "1", "url": "other"}]}
            ]},
        ])));

        reconciler
            .apply(record("Show", "", vec![source("暴风资源", &[("1", "a1"), ("2", "a2")])]))
            .unwrap();
        reconciler
            .apply(record("Show", "", vec![source("暴风资源", &[("1", "b1")])]))
            .unwrap();

        let sources = reconciler.catalog().get(0).unwrap().play_sources().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], source("其他资源", &[("1", "other")]));
        assert_eq!(sources[1], source("暴风资源", &[("1", "b1")]));
    }

    #[test]
    fn test_replace_keeps_source_position_and_extra_keys() {
        let mut reconciler = Reconciler::new(catalog(json!([
            {"片名": "Show", "播放地址": [
                {"source": "暴风资源", "quality": "hd", "episodes": []},
                {"source": "其他资源", "episodes": []}
            ]},
        ])));

        reconciler
            .apply(record("Show", "", vec![source("暴风资源", &[("1", "new")])]))
            .unwrap();

        assert_eq!(
            reconciler.catalog().get(0).unwrap().get(keys::PLAY_SOURCES),
            Some(&json!([
                {"source": "暴风资源", "quality": "hd", "episodes": [{"name": "1", "url": "new"}]},
                {"source": "其他资源", "episodes": []}
            ]))
        );
    }

    #[test]
    fn test_new_titles_register_for_later_records() {
        let mut reconciler = Reconciler::new(Catalog::default());

        let first = reconciler
            .apply(record("Fresh", "", vec![source("暴风资源", &[("1", "a")])]))
            .unwrap();
        let second = reconciler
            .apply(record("Fresh", "", vec![source("暴风资源", &[("1", "b")])]))
            .unwrap();

        assert_eq!(first, Reconciliation { matched: false, position: 0 });
        assert_eq!(second, Reconciliation { matched: true, position: 0 });
        assert_eq!(reconciler.catalog().len(), 1);
        assert_eq!(
            reconciler.summary(),
            RunSummary { matched: 1, added: 1, failed: 0 }
        );
    }

    #[test]
    fn test_new_ids_register_for_later_records() {
        let mut reconciler = Reconciler::new(Catalog::default());
        reconciler.apply(record("Original Title", "555", vec![])).unwrap();

        let outcome = reconciler.apply(record("Renamed", "555", vec![])).unwrap();
        assert_eq!(outcome, Reconciliation { matched: true, position: 0 });
    }

    #[test]
    fn test_null_play_sources_are_created() {
        let mut reconciler =
            Reconciler::new(catalog(json!([{"片名": "N", "播放地址": null}])));
        reconciler
            .apply(record("N", "", vec![source("暴风资源", &[("1", "u")])]))
            .unwrap();
        assert_eq!(reconciler.catalog().get(0).unwrap().play_sources().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_sources_rejected_without_changes() {
        let before = catalog(json!([{"片名": "Bad", "播放地址": "not a list"}]));
        let mut reconciler = Reconciler::new(before.clone());

        let err = reconciler
            .apply(record("Bad", "", vec![source("暴风资源", &[("1", "u")])]))
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::MalformedPlaySources { position: 0, found: "a string" }
        ));
        assert_eq!(reconciler.catalog(), &before);
        assert_eq!(reconciler.summary().failed, 1);
    }

    #[test]
    fn test_reconciling_twice_is_idempotent() {
        let start = catalog(json!([
            {"片名": "A", "豆瓣ID": "1"},
            {"片名": "B"},
        ]));
        let records = vec![
            record("A", "1", vec![source("暴风资源", &[("1", "a")])]),
            record("B", "", vec![source("暴风资源", &[("1", "b")])]),
            record("C", "3", vec![source("暴风资源", &[("1", "c")])]),
        ];

        let mut once = Reconciler::new(start);
        for r in records.clone() {
            once.apply(r).unwrap();
        }
        let (after_once, _) = once.into_parts();

        let mut twice = Reconciler::new(after_once.clone());
        for r in records {
            twice.apply(r).unwrap();
        }
        let (after_twice, summary) = twice.into_parts();

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice.len(), 3);
        assert_eq!(summary, RunSummary { matched: 3, added: 0, failed: 0 });
    }
}
