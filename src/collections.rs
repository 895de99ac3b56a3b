use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde_json::Map;
use tracing::debug;

use crate::domain::{Record, ResultsCache};
use crate::error::DescError;
use crate::store::{JsonStyle, write_json_atomic};

/// One market file, e.g. `data/brands-us.json`.
#[derive(Debug, Clone)]
pub struct Collection {
    pub path: Utf8PathBuf,
    pub market: String,
    pub records: Vec<Record>,
}

impl Collection {
    pub fn load(path: &Utf8Path, market: &str) -> Result<Self, DescError> {
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| DescError::CollectionParse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let records: Vec<Record> =
            serde_json::from_str(&content).map_err(|err| DescError::CollectionParse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            market: market.to_string(),
            records,
        })
    }

    /// Fills every empty description whose slug has a cached result. Returns
    /// the number of records changed.
    pub fn apply_descriptions(&mut self, cache: &ResultsCache) -> usize {
        let mut updated = 0;
        for record in &mut self.records {
            if record.has_description() {
                continue;
            }
            if let Some(text) = cache.get(&record.slug) {
                record.set_description(text);
                updated += 1;
            }
        }
        updated
    }

    /// Rewrites the whole file, compact, in one atomic replace.
    pub fn save(&self) -> Result<(), DescError> {
        write_json_atomic(&self.path, &self.records, JsonStyle::Compact)
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub records: Vec<Record>,
    pub collection_count: usize,
}

/// Lists `<prefix><market>.json` files in `dir`, sorted by file name, paired
/// with their upper-cased market label.
pub fn discover(dir: &Utf8Path, prefix: &str) -> Result<Vec<(Utf8PathBuf, String)>, DescError> {
    let pattern = Regex::new(&format!(r"^{}(.+)\.json$", regex::escape(prefix)))
        .map_err(|err| DescError::InvalidConfig(format!("collection prefix: {err}")))?;

    let no_collections = || DescError::NoCollections {
        dir: dir.to_path_buf(),
        prefix: prefix.to_string(),
    };

    let entries = match fs::read_dir(dir.as_std_path()) {
        Ok(entries) => entries,
        Err(_) => return Err(no_collections()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| DescError::Filesystem(err.to_string()))?;
        if !entry.path().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some(captures) = pattern.captures(&name) {
            let market = captures[1].to_uppercase();
            found.push((dir.join(&name), market));
        }
    }

    if found.is_empty() {
        return Err(no_collections());
    }
    found.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(found)
}

pub fn load_all(dir: &Utf8Path, prefix: &str) -> Result<Vec<Collection>, DescError> {
    discover(dir, prefix)?
        .into_iter()
        .map(|(path, market)| {
            let collection = Collection::load(&path, &market)?;
            debug!(path = %path, records = collection.records.len(), "collection loaded");
            Ok(collection)
        })
        .collect()
}

/// Returns the first occurrence of every slug that has no description in
/// any collection. Collections are visited in file-name order.
pub fn scan(collections: &[Collection]) -> ScanOutcome {
    let mut ordered: Vec<&Collection> = collections.iter().collect();
    ordered.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));

    let described: HashSet<&str> = ordered
        .iter()
        .flat_map(|collection| collection.records.iter())
        .filter(|record| record.has_description())
        .map(|record| record.slug.as_str())
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut records = Vec::new();
    for record in ordered.iter().flat_map(|collection| collection.records.iter()) {
        let slug = record.slug.as_str();
        if described.contains(slug) || !seen.insert(slug) {
            continue;
        }
        records.push(Record {
            description: None,
            extra: Map::new(),
            ..record.clone()
        });
    }

    ScanOutcome {
        records,
        collection_count: collections.len(),
    }
}
