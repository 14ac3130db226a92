use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// JSON keys used by the persisted catalog.
pub mod keys {
    pub const TITLE: &str = "片名";
    pub const ALIASES: &str = "别名";
    pub const RATING: &str = "豆瓣";
    pub const EXTERNAL_ID: &str = "豆瓣ID";
    pub const STATUS: &str = "状态";
    pub const GENRE: &str = "类型";
    pub const DIRECTOR: &str = "导演";
    pub const CAST: &str = "演员";
    pub const YEAR: &str = "年代";
    pub const REGION: &str = "地区";
    pub const LANGUAGE: &str = "语言";
    pub const TAGS: &str = "TAG标签";
    pub const UPDATED_AT: &str = "更新时间";
    pub const COVER: &str = "封面";
    pub const SYNOPSIS: &str = "剧情介绍";
    pub const DETAIL_URL: &str = "detail_url";
    pub const PLAY_SOURCES: &str = "播放地址";

    pub const SOURCE_NAME: &str = "source";
    pub const EPISODES: &str = "episodes";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub name: String,
    pub url: String,
}

/// A named provider of episode links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaySource {
    #[serde(rename = "source")]
    pub name: String,
    pub episodes: Vec<Episode>,
}

impl PlaySource {
    pub fn episodes_value(&self) -> Value {
        Value::Array(
            self.episodes
                .iter()
                .map(|ep| json!({ "name": ep.name, "url": ep.url }))
                .collect(),
        )
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Map::new();
        fields.insert(keys::SOURCE_NAME.to_string(), Value::String(self.name.clone()));
        fields.insert(keys::EPISODES.to_string(), self.episodes_value());
        Value::Object(fields)
    }
}

/// A record extracted from one detail page.
///
/// Every descriptive field is a plain string that is empty when the page did
/// not carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailRecord {
    pub title: String,
    pub aliases: String,
    pub rating: String,
    pub external_id: String,
    pub status: String,
    pub genre: String,
    pub director: String,
    pub cast: String,
    pub year: String,
    pub region: String,
    pub language: String,
    pub tags: String,
    pub updated_at: String,
    pub cover: String,
    pub synopsis: String,
    pub detail_url: String,
    pub play_sources: Vec<PlaySource>,
}

impl DetailRecord {
    pub fn external_id(&self) -> Option<&str> {
        valid_external_id(&self.external_id)
    }

    pub fn normalized_title(&self) -> Option<&str> {
        normalize_title(&self.title)
    }

    /// Converts the record into a catalog entry with every field present.
    pub fn into_entry(self) -> CatalogEntry {
        let play_sources =
            Value::Array(self.play_sources.iter().map(PlaySource::to_value).collect());
        let text_fields = [
            (keys::TITLE, self.title),
            (keys::ALIASES, self.aliases),
            (keys::RATING, self.rating),
            (keys::EXTERNAL_ID, self.external_id),
            (keys::STATUS, self.status),
            (keys::GENRE, self.genre),
            (keys::DIRECTOR, self.director),
            (keys::CAST, self.cast),
            (keys::YEAR, self.year),
            (keys::REGION, self.region),
            (keys::LANGUAGE, self.language),
            (keys::TAGS, self.tags),
            (keys::UPDATED_AT, self.updated_at),
            (keys::COVER, self.cover),
            (keys::SYNOPSIS, self.synopsis),
            (keys::DETAIL_URL, self.detail_url),
        ];

        let mut fields = Map::new();
        for (key, value) in text_fields {
            fields.insert(key.to_string(), Value::String(value));
        }
        fields.insert(keys::PLAY_SOURCES.to_string(), play_sources);
        CatalogEntry(fields)
    }
}

/// One media title in the persisted catalog.
///
/// Kept as an ordered JSON object so fields written by other tools survive a
/// load/save cycle untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogEntry(Map<String, Value>);

impl CatalogEntry {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// External ID, accepting both string and numeric encodings.
    pub fn external_id(&self) -> Option<String> {
        match self.0.get(keys::EXTERNAL_ID)? {
            Value::String(id) => valid_external_id(id).map(str::to_string),
            Value::Number(n) => valid_external_id(&n.to_string()).map(str::to_string),
            _ => None,
        }
    }

    pub fn normalized_title(&self) -> Option<&str> {
        self.get_str(keys::TITLE).and_then(normalize_title)
    }

    /// Play sources in their typed form; `None` when the field is absent or
    /// does not have the expected shape.
    pub fn play_sources(&self) -> Option<Vec<PlaySource>> {
        let value = self.0.get(keys::PLAY_SOURCES)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// The ordered collection of catalog entries.
///
/// Entries are addressed by position; positions stay valid because the
/// catalog only grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&CatalogEntry> {
        self.entries.get(position)
    }

    pub(crate) fn get_mut(&mut self, position: usize) -> Option<&mut CatalogEntry> {
        self.entries.get_mut(position)
    }

    /// Appends an entry and returns its position.
    pub fn push(&mut self, entry: CatalogEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }
}

fn valid_external_id(id: &str) -> Option<&str> {
    let id = id.trim();
    (!id.is_empty() && id != "0").then_some(id)
}

fn normalize_title(title: &str) -> Option<&str> {
    let title = title.trim();
    (!title.is_empty()).then_some(title)
}
