// Copyright 2025 tracklog contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Persisted filename -> record map backing the index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::export::ExportFormat;

/// Derived metadata for one recorded file on disk.
///
/// `mtime_ms` must equal the file's current modification time, otherwise
/// the record is stale and is refreshed by the next sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub filename: String,
    pub checkpoint: bool,
    pub mtime_ms: u64,
    #[serde(default)]
    pub track_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub track_duration_secs: Option<f64>,
    #[serde(default)]
    pub datapoint_count: Option<usize>,
    #[serde(default)]
    pub remote_units: BTreeSet<String>,
    #[serde(default)]
    pub common_keys: BTreeSet<String>,
    #[serde(default)]
    pub exports: BTreeSet<ExportFormat>,
}

/// In-memory map of records with a single-file JSON persistence layer.
/// Mutations are tracked so an unchanged store is never rewritten.
pub struct MetaStore {
    path: PathBuf,
    records: BTreeMap<String, TrackRecord>,
    dirty: bool,
}

impl MetaStore {
    /// Load the store from `path`, starting empty when the file does not
    /// exist yet. A corrupt store is discarded with a diagnostic; it is
    /// derived state and a full sync rebuilds it.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(
                        "discarding corrupt metadata store {}: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(Error::disk(&path, source)),
        };
        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&TrackRecord> {
        self.records.get(filename)
    }

    /// Records in filename order; positional track ids index into this.
    pub fn iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.records.values()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.records.clear();
            self.dirty = true;
        }
    }

    /// Insert or replace; a byte-identical record leaves the store clean.
    pub fn upsert(&mut self, record: TrackRecord) {
        if self.records.get(&record.filename) == Some(&record) {
            return;
        }
        self.records.insert(record.filename.clone(), record);
        self.dirty = true;
    }

    pub fn remove(&mut self, filename: &str) -> bool {
        let removed = self.records.remove(filename).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Write the store back to disk if anything changed since the last
    /// persist.
    pub async fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&self.records).map_err(|e| {
            Error::disk(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|source| Error::disk(&self.path, source))?;
        self.dirty = false;
        Ok(())
    }
}
