use std::collections::HashMap;

use crate::catalog::Catalog;

/// Lookup tables from external ID and normalized title to catalog positions.
///
/// Positions are plain indices into the [`Catalog`]; the catalog never shrinks,
/// so registered positions remain valid for the lifetime of a run.
#[derive(Debug, Default, Clone)]
pub struct CatalogIndex {
    by_external_id: HashMap<String, usize>,
    by_title: HashMap<String, Vec<usize>>,
}

impl CatalogIndex {
    /// Builds the index from a loaded catalog. Duplicate external IDs resolve
    /// to the last entry carrying them.
    pub fn build(catalog: &Catalog) -> Self {
        let mut index = Self::default();
        for (position, entry) in catalog.iter().enumerate() {
            let external_id = entry.external_id();
            index.register(position, external_id.as_deref(), entry.normalized_title());
        }
        index
    }

    /// Records a position under its (already validated) external ID and title.
    pub fn register(&mut self, position: usize, external_id: Option<&str>, title: Option<&str>) {
        if let Some(id) = external_id {
            self.by_external_id.insert(id.to_string(), position);
        }
        if let Some(title) = title {
            self.by_title.entry(title.to_string()).or_default().push(position);
        }
    }

    /// Finds the entry a record should merge into: the external ID wins,
    /// then the earliest entry registered under the title.
    pub fn lookup(&self, external_id: Option<&str>, title: Option<&str>) -> Option<usize> {
        external_id
            .and_then(|id| self.by_external_id(id))
            .or_else(|| {
                title
                    .and_then(|t| self.by_title(t))
                    .and_then(|positions| positions.first().copied())
            })
    }

    pub fn by_external_id(&self, id: &str) -> Option<usize> {
        self.by_external_id.get(id).copied()
    }

    pub fn by_title(&self, title: &str) -> Option<&[usize]> {
        self.by_title.get(title).map(Vec::as_slice)
    }

    pub fn external_id_count(&self) -> usize {
        self.by_external_id.len()
    }

    pub fn title_count(&self) -> usize {
        self.by_title.len()
    }
}
