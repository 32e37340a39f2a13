//! Saved projects and characters.
//!
//! Records are small JSON documents; generated media lives elsewhere and is
//! referenced by URI or path. [`JsonDirStore`] keeps one `<id>.json` file
//! per record in a single directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use glob::{Pattern, glob};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad store pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("store path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
    #[error("invalid record id {0:?}")]
    InvalidId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Project,
    Character,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            RecordKind::Project => "proj",
            RecordKind::Character => "char",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub kind: RecordKind,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Role → media reference (URI or path), e.g. `"video"`, `"narration"`.
    #[serde(default)]
    pub media: BTreeMap<String, String>,
    /// Free-form payload, typically a structured plan.
    #[serde(default)]
    pub data: Value,
}

impl ProjectRecord {
    pub fn new(kind: RecordKind, title: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("{}-{}", kind.prefix(), created_at.format("%Y%m%d%H%M%S%3f")),
            kind,
            title: title.into(),
            created_at,
            media: BTreeMap::new(),
            data: Value::Null,
        }
    }

    pub fn with_media(mut self, role: impl Into<String>, reference: impl Into<String>) -> Self {
        self.media.insert(role.into(), reference.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

pub trait ProjectStore {
    /// All records, newest first.
    fn list(&self) -> Result<Vec<ProjectRecord>, StoreError>;
    /// Inserts or replaces the record with the same id.
    fn save(&self, record: &ProjectRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(format!("{id}.json")))
    }
}

impl ProjectStore for JsonDirStore {
    fn list(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let root = self
            .root
            .to_str()
            .ok_or_else(|| StoreError::NonUtf8Path(self.root.clone()))?;
        let pattern = format!("{}/*.json", Pattern::escape(root));

        let mut records = Vec::new();
        for entry in glob(&pattern)? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable store entry");
                    continue;
                }
            };
            let parsed = fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| serde_json::from_slice::<ProjectRecord>(&bytes).map_err(StoreError::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt record"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(count = records.len(), root = %self.root.display(), "listed records");
        Ok(records)
    }

    fn save(&self, record: &ProjectRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.id)?;
        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        debug!(id = %record.id, path = %path.display(), "record saved");
        Ok(())
    }
}
