use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::DescError;

/// One brand entry inside a source collection.
///
/// Fields this tool does not know about are carried in `extra`, and the
/// known optional ones are written back only if they were read, so that a
/// rewrite never drops or invents data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    /// Outer `None`: the key was absent. `Some(None)`: it was `null`.
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present_field<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl Record {
    pub fn new(slug: &str, name: &str, domain: &str, categories: &[&str]) -> Self {
        Self {
            slug: slug.to_string(),
            name: Some(name.to_string()),
            domain: Some(domain.to_string()),
            categories: Some(categories.iter().map(|c| c.to_string()).collect()),
            description: None,
            extra: Map::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.set_description(description);
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_ref().and_then(|text| text.as_deref())
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = Some(Some(description.to_string()));
    }

    pub fn has_description(&self) -> bool {
        self.description()
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn categories(&self) -> &[String] {
        self.categories.as_deref().unwrap_or_default()
    }

    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.slug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Submitted,
    InProgress,
    Ended,
    Merged,
}

impl ChunkStatus {
    /// Forward edges of `pending -> submitted -> in_progress -> ended -> merged`.
    /// `in_progress` may be skipped.
    pub fn can_advance_to(self, next: ChunkStatus) -> bool {
        matches!(
            (self, next),
            (ChunkStatus::Pending, ChunkStatus::Submitted)
                | (ChunkStatus::Submitted, ChunkStatus::InProgress)
                | (ChunkStatus::Submitted, ChunkStatus::Ended)
                | (ChunkStatus::InProgress, ChunkStatus::Ended)
                | (ChunkStatus::Ended, ChunkStatus::Merged)
        )
    }

    /// Still being processed on the service side.
    pub fn is_refreshable(self) -> bool {
        matches!(self, ChunkStatus::Submitted | ChunkStatus::InProgress)
    }

    pub fn is_settled(self) -> bool {
        matches!(self, ChunkStatus::Ended | ChunkStatus::Merged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Submitted => "submitted",
            ChunkStatus::InProgress => "in_progress",
            ChunkStatus::Ended => "ended",
            ChunkStatus::Merged => "merged",
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = DescError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(ChunkStatus::Pending),
            "submitted" => Ok(ChunkStatus::Submitted),
            "in_progress" => Ok(ChunkStatus::InProgress),
            "ended" => Ok(ChunkStatus::Ended),
            "merged" => Ok(ChunkStatus::Merged),
            other => Err(DescError::StateCorrupt(format!("unknown chunk status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub batch_id: Option<String>,
    pub file: Utf8PathBuf,
    pub status: ChunkStatus,
    pub count: usize,
    pub ok: Option<u64>,
    pub errors: Option<u64>,
}

impl Chunk {
    pub fn new(index: usize, file: Utf8PathBuf, count: usize) -> Self {
        Self {
            index,
            batch_id: None,
            file,
            status: ChunkStatus::Pending,
            count,
            ok: None,
            errors: None,
        }
    }

    /// Applies `next` if it is a forward transition. Returns whether the
    /// status changed.
    pub fn advance(&mut self, next: ChunkStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn has_counts(&self) -> bool {
        self.ok.is_some() && self.errors.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub prepared_at: String,
    pub total_records: usize,
    pub model: String,
    pub chunks: Vec<Chunk>,
}

impl PipelineState {
    /// `total_records` is fixed here and never derived from the chunks again.
    pub fn new(model: &str, chunks: Vec<Chunk>) -> Self {
        let total_records = chunks.iter().map(|chunk| chunk.count).sum();
        Self {
            prepared_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            total_records,
            model: model.to_string(),
            chunks,
        }
    }

    pub fn validate(&self) -> Result<(), DescError> {
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position {
                return Err(DescError::StateCorrupt(format!(
                    "chunk at position {position} has index {}",
                    chunk.index
                )));
            }
        }
        Ok(())
    }

    pub fn pending(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.status == ChunkStatus::Pending)
    }

    pub fn count_with(&self, predicate: impl Fn(ChunkStatus) -> bool) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| predicate(chunk.status))
            .count()
    }

    /// True once something was submitted and every submitted chunk has ended
    /// or been merged.
    pub fn all_submitted_settled(&self) -> bool {
        let mut submitted = self
            .chunks
            .iter()
            .filter(|chunk| chunk.batch_id.is_some())
            .peekable();
        if submitted.peek().is_none() {
            return false;
        }
        submitted.all(|chunk| chunk.status.is_settled())
    }
}

/// Slug to generated description. Grows only: an existing key is never
/// replaced or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsCache(BTreeMap<String, String>);

impl ResultsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the key was already present.
    pub fn insert(&mut self, slug: &str, text: String) -> bool {
        if self.0.contains_key(slug) {
            return false;
        }
        self.0.insert(slug.to_string(), text);
        true
    }

    pub fn get(&self, slug: &str) -> Option<&str> {
        self.0.get(slug).map(String::as_str)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.0.contains_key(slug)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Collapses whitespace runs, trims, and closes the sentence with `.` unless
/// it already ends in `.`, `!` or `?`.
pub fn normalize_description(raw: &str) -> String {
    let mut text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(last) = text.chars().last() {
        if !matches!(last, '.' | '!' | '?') {
            text.push('.');
        }
    }
    text
}

/// Percentage of unique keys with a cached description; 0 when nothing was
/// prepared.
pub fn coverage_percent(cached: usize, total_records: usize) -> f64 {
    if total_records == 0 {
        return 0.0;
    }
    cached as f64 / total_records as f64 * 100.0
}
