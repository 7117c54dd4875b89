//! Object catalog: maps object ids to blobs, metadata and encryption state.
//!
//! Loaded entirely into memory and flushed atomically via temp+rename after
//! every mutation. A mutation whose flush fails is rolled back, so memory
//! never runs ahead of disk. The daemon shares one instance behind an async
//! `RwLock`.

use anyhow::{Context, Result};
use mvault_core::types::ObjectRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct Catalog {
    /// Path to the JSON catalog file on disk
    path: PathBuf,
    /// Object id → record
    entries: HashMap<String, ObjectRecord>,
}

impl Catalog {
    /// Load or create a catalog at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing catalog: {}", path.display()))?
        } else {
            HashMap::new()
        };

        Ok(Catalog {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn get(&self, id: &str) -> Option<&ObjectRecord> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, record: ObjectRecord) -> Result<()> {
        let id = record.id.as_str().to_string();
        let previous = self.entries.insert(id.clone(), record);
        if let Err(e) = self.flush() {
            match previous {
                Some(prev) => self.entries.insert(id, prev),
                None => self.entries.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Option<ObjectRecord>> {
        let Some(removed) = self.entries.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.flush() {
            self.entries.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Bump the view counter. Returns the new count, or `None` if the
    /// object is unknown.
    pub fn increment_views(&mut self, id: &str) -> Result<Option<u64>> {
        let Some(record) = self.entries.get_mut(id) else {
            return Ok(None);
        };
        record.view_count += 1;
        let count = record.view_count;
        if let Err(e) = self.flush() {
            if let Some(record) = self.entries.get_mut(id) {
                record.view_count -= 1;
            }
            return Err(e);
        }
        Ok(Some(count))
    }

    /// All records, oldest upload first
    pub fn list(&self) -> Vec<&ObjectRecord> {
        let mut records: Vec<_> = self.entries.values().collect();
        records.sort_by(|a, b| {
            a.metadata
                .upload_timestamp
                .cmp(&b.metadata.upload_timestamp)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.entries).context("serializing catalog")?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing catalog temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming catalog: {}", self.path.display()))?;
        Ok(())
    }
}
