use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;
use tracing::debug;

use crate::domain::{PipelineState, ResultsCache};
use crate::error::DescError;

const STATE_FILE: &str = ".desc-batch-state.json";
const RESULTS_FILE: &str = ".desc-results.json";
const REQUEST_FILE_PREFIX: &str = ".desc-batch-";
const REQUEST_FILE_EXT: &str = "jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStyle {
    Pretty,
    Compact,
}

/// Layout of the pipeline's files inside the data directory.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: Utf8PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn state_path(&self) -> Utf8PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    pub fn results_path(&self) -> Utf8PathBuf {
        self.data_dir.join(RESULTS_FILE)
    }

    pub fn request_path(&self, index: usize) -> Utf8PathBuf {
        self.data_dir
            .join(format!("{REQUEST_FILE_PREFIX}{index}.{REQUEST_FILE_EXT}"))
    }

    pub fn state_exists(&self) -> bool {
        self.state_path().as_std_path().exists()
    }

    pub fn load_state(&self) -> Result<PipelineState, DescError> {
        let path = self.state_path();
        if !path.as_std_path().exists() {
            return Err(DescError::NotInitialized(path));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| DescError::Filesystem(format!("read {path}: {err}")))?;
        let state: PipelineState = serde_json::from_str(&content)
            .map_err(|err| DescError::StateCorrupt(format!("{path}: {err}")))?;
        state.validate()?;
        Ok(state)
    }

    pub fn save_state(&self, state: &PipelineState) -> Result<(), DescError> {
        let path = self.state_path();
        write_json_atomic(&path, state, JsonStyle::Pretty)?;
        debug!(path = %path, chunks = state.chunks.len(), "state saved");
        Ok(())
    }

    /// Refuses to replace an existing state unless `overwrite` is set, so the
    /// batch ids of chunks already in flight are not lost by accident.
    pub fn create_state(&self, state: &PipelineState, overwrite: bool) -> Result<(), DescError> {
        if !overwrite && self.state_exists() {
            return Err(DescError::StateExists(self.state_path()));
        }
        state.validate()?;
        self.save_state(state)
    }

    pub fn load_results(&self) -> Result<ResultsCache, DescError> {
        let path = self.results_path();
        if !path.as_std_path().exists() {
            return Ok(ResultsCache::new());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| DescError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| DescError::Filesystem(format!("parse {path}: {err}")))
    }

    pub fn save_results(&self, cache: &ResultsCache) -> Result<(), DescError> {
        write_json_atomic(&self.results_path(), cache, JsonStyle::Pretty)
    }

    /// Removes request files numbered `first_unused` and above, left behind by
    /// an earlier preparation with more chunks.
    pub fn remove_request_files_from(&self, first_unused: usize) -> Result<usize, DescError> {
        let mut removed = 0;
        let mut index = first_unused;
        loop {
            let path = self.request_path(index);
            if !path.as_std_path().exists() {
                break;
            }
            fs::remove_file(path.as_std_path())
                .map_err(|err| DescError::Filesystem(format!("remove {path}: {err}")))?;
            removed += 1;
            index += 1;
        }
        Ok(removed)
    }
}

/// Serializes `value` into a temp file next to `path` and renames it into
/// place. On any failure the previous document stays untouched.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Utf8Path,
    value: &T,
    style: JsonStyle,
) -> Result<(), DescError> {
    write_atomic(path, |writer| {
        let result = match style {
            JsonStyle::Pretty => serde_json::to_writer_pretty(&mut *writer, value),
            JsonStyle::Compact => serde_json::to_writer(&mut *writer, value),
        };
        result.map_err(|err| DescError::Filesystem(format!("serialize {path}: {err}")))
    })
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DescError> {
    write_atomic(path, |writer| {
        writer
            .write_all(content)
            .map_err(|err| DescError::Filesystem(err.to_string()))
    })
}

fn write_atomic<F>(path: &Utf8Path, fill: F) -> Result<(), DescError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), DescError>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| DescError::Filesystem(err.to_string()))?;

    let mut temp = Builder::new()
        .prefix(".descgen-")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| DescError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        fill(&mut writer)?;
        writer
            .flush()
            .map_err(|err| DescError::Filesystem(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| DescError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| DescError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}
