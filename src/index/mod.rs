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

// The metadata index: a persistent filename -> record map kept in sync
// with the recorded files on disk

mod store;

pub use store::{MetaStore, TrackRecord};

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::IndexSettings;
use crate::error::{Error, Result};
use crate::export::{detect_coord_keys, CoordKeys, ExportFormat, GpxExporter};
use crate::extract::ExtractorPipeline;
use crate::sample::{parse_samples, Sample};
use crate::track::{Track, CHECKPOINT_SUBDIR};

/// Identifies a track either by its position in the current snapshot or by
/// filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackId {
    Position(usize),
    Filename(String),
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackId::Position(i) => write!(f, "{}", i),
            TrackId::Filename(name) => f.write_str(name),
        }
    }
}

impl From<usize> for TrackId {
    fn from(i: usize) -> Self {
        TrackId::Position(i)
    }
}

impl From<&str> for TrackId {
    fn from(name: &str) -> Self {
        TrackId::Filename(name.to_string())
    }
}

/// One filesystem observation during a scan.
#[derive(Debug, Clone)]
struct FileStat {
    path: PathBuf,
    checkpoint: bool,
    mtime_ms: u64,
}

/// Persistent metadata index over the recorded files in one directory tree
/// (primary directory plus its `chk/` subdirectory).
///
/// Sync passes are serialized by an explicit lock and run to completion;
/// read-only queries observe the last completed snapshot.
pub struct Database {
    directory: PathBuf,
    checkpoint_directory: PathBuf,
    db_fname: String,
    validation: bool,
    rm_thesaurus: Option<HashMap<String, String>>,
    store: RwLock<MetaStore>,
    pipeline: ExtractorPipeline,
    /// Coordinate-key discovery per file, invalidated exactly when a sync
    /// pass upserts or deletes the record.
    coord_cache: Mutex<HashMap<String, Option<CoordKeys>>>,
    sync_lock: Mutex<()>,
    exports_in_flight: DashMap<(String, ExportFormat), ()>,
}

impl Database {
    /// Open the index over `settings.directory`. The persisted store is
    /// loaded as-is; call [`Database::full_sync`] for an authoritative
    /// rebuild or [`Database::incremental_sync`] to fold in changes.
    pub async fn open(settings: &IndexSettings) -> Result<Self> {
        let directory = PathBuf::from(&settings.directory);
        let checkpoint_directory = directory.join(CHECKPOINT_SUBDIR);
        tokio::fs::create_dir_all(&checkpoint_directory)
            .await
            .map_err(|source| Error::disk(&checkpoint_directory, source))?;

        let store = MetaStore::open(directory.join(&settings.db_fname)).await?;
        info!(
            "index opened over {} ({} known tracks)",
            directory.display(),
            store.len()
        );

        Ok(Self {
            directory,
            checkpoint_directory,
            db_fname: settings.db_fname.clone(),
            validation: settings.validation,
            rm_thesaurus: settings.rm_thesaurus.clone(),
            store: RwLock::new(store),
            pipeline: ExtractorPipeline::standard(),
            coord_cache: Mutex::new(HashMap::new()),
            sync_lock: Mutex::new(()),
            exports_in_flight: DashMap::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Authoritative rebuild: clear the store, rescan both directories,
    /// revalidate and re-extract everything, reattach export derivatives.
    pub async fn full_sync(&self) -> Result<()> {
        let _pass = self.sync_lock.lock().await;

        let files = self.scan_files().await?;
        let exports = self.scan_exports().await?;

        let mut store = self.store.write().await;
        store.clear();
        self.coord_cache.lock().await.clear();

        for (filename, stat) in &files {
            if let Some(record) = self.process_file(filename, stat, &exports).await {
                store.upsert(record);
            }
        }
        store.persist().await?;
        info!("full sync complete: {} tracks indexed", store.len());
        Ok(())
    }

    /// Incremental pass: drop records for removed files, (re)extract files
    /// that are new or whose modification time changed, and recompute
    /// export-derivative attachment in full.
    ///
    /// Modification-time equality is the sole dirty signal; an edit that
    /// preserves mtime is invisible until the next full sync.
    pub async fn incremental_sync(&self) -> Result<()> {
        let _pass = self.sync_lock.lock().await;

        let files = self.scan_files().await?;
        let exports = self.scan_exports().await?;

        let mut store = self.store.write().await;
        let mut coord_cache = self.coord_cache.lock().await;

        for filename in store.filenames() {
            if !files.contains_key(&filename) {
                info!("removing {} from the index (file missing on disk)", filename);
                store.remove(&filename);
                coord_cache.remove(&filename);
            }
        }

        for (filename, stat) in &files {
            let dirty = match store.get(filename) {
                None => true,
                Some(record) => record.mtime_ms != stat.mtime_ms,
            };
            if dirty {
                if let Some(record) = self.process_file(filename, stat, &exports).await {
                    store.upsert(record);
                    coord_cache.remove(filename);
                    info!("updated index entry for {} (new or changed)", filename);
                }
            } else if let Some(record) = store.get(filename) {
                // Derivative discovery is recomputed every pass, independent
                // of dirty detection.
                let discovered = exports.get(base_stem(filename)).cloned().unwrap_or_default();
                if record.exports != discovered {
                    let mut updated = record.clone();
                    updated.exports = discovered;
                    store.upsert(updated);
                }
            }
        }

        store.persist().await?;
        Ok(())
    }

    /// Current snapshot in filename order; positions are valid [`TrackId`]s
    /// until the next sync pass.
    pub async fn list_tracks(&self) -> Vec<TrackRecord> {
        self.store.read().await.iter().cloned().collect()
    }

    /// Remote-unit names of a record mapped through the configured
    /// thesaurus, falling back to the raw namespace prefix.
    pub fn display_units(&self, record: &TrackRecord) -> Vec<String> {
        record
            .remote_units
            .iter()
            .map(|unit| match &self.rm_thesaurus {
                Some(thesaurus) => thesaurus.get(unit).cloned().unwrap_or_else(|| unit.clone()),
                None => unit.clone(),
            })
            .collect()
    }

    async fn find_record(&self, id: &TrackId) -> Option<TrackRecord> {
        let store = self.store.read().await;
        match id {
            TrackId::Position(i) => {
                let record = store.iter().nth(*i).cloned();
                if record.is_none() {
                    warn!("invalid track index {}", i);
                }
                record
            }
            TrackId::Filename(name) => {
                let record = store.get(name).cloned();
                if record.is_none() {
                    warn!("track with filename '{}' not found in the index", name);
                }
                record
            }
        }
    }

    /// Full filesystem path of a track, chosen from the checkpoint or
    /// primary directory via the record's checkpoint flag. Absence from
    /// disk is an absent result with a diagnostic, not an error.
    pub async fn resolve_path(&self, id: &TrackId) -> Option<PathBuf> {
        let record = self.find_record(id).await?;
        self.resolve_record_path(&record).await
    }

    async fn resolve_record_path(&self, record: &TrackRecord) -> Option<PathBuf> {
        if record.checkpoint {
            let chk_path = self.checkpoint_directory.join(&record.filename);
            if tokio::fs::try_exists(&chk_path).await.unwrap_or(false) {
                return Some(chk_path);
            }
        }
        let primary = self.directory.join(&record.filename);
        if tokio::fs::try_exists(&primary).await.unwrap_or(false) {
            return Some(primary);
        }
        warn!(
            "file '{}' not found in expected directories",
            record.filename
        );
        None
    }

    /// Materialize an export derivative for a track.
    ///
    /// Idempotent by side-effect inspection: an existing derivative on disk
    /// is never recomputed. Concurrent calls for the same (track, format)
    /// pair are collapsed by a per-key in-flight guard.
    pub async fn export_track(&self, id: &TrackId, format: ExportFormat) -> Result<PathBuf> {
        let record = self
            .find_record(id)
            .await
            .ok_or_else(|| Error::not_found(id.to_string()))?;

        let base = base_stem(&record.filename).to_string();
        let target = self.directory.join(format!("{}.{}", base, format.extension()));

        let key = (record.filename.clone(), format);
        if self.exports_in_flight.insert(key.clone(), ()).is_some() {
            debug!(
                "export of {} to {} already in flight, skipping",
                record.filename, format
            );
            return Ok(target);
        }
        let produced = self.materialize_export(&record, &base, &target, format).await;
        self.exports_in_flight.remove(&key);
        produced?;

        let mut store = self.store.write().await;
        if let Some(existing) = store.get(&record.filename) {
            let mut updated = existing.clone();
            if updated.exports.insert(format) {
                store.upsert(updated);
                store.persist().await?;
            }
        }
        Ok(target)
    }

    async fn materialize_export(
        &self,
        record: &TrackRecord,
        base: &str,
        target: &Path,
        format: ExportFormat,
    ) -> Result<()> {
        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            info!(
                "{} already exists, skipping regeneration",
                target.display()
            );
            return Ok(());
        }

        let source = self
            .resolve_record_path(record)
            .await
            .ok_or_else(|| Error::not_found(record.filename.clone()))?;

        let mut track = Track::for_replay(&self.directory)?;
        track.load(&source).await?;

        match format {
            ExportFormat::Gpx => {
                let hint = self.coordinate_keys(&record.filename, track.samples()).await;
                let exporter = GpxExporter::with_hint(hint);
                track
                    .export_with(
                        &exporter,
                        format.extension(),
                        Some(base),
                        Some(self.directory.as_path()),
                        None,
                    )
                    .await?;
            }
            _ => {
                track
                    .try_export(format, Some(base), Some(self.directory.as_path()), None)
                    .await?;
            }
        }
        info!("exported {} to {}", record.filename, format);
        Ok(())
    }

    /// Remove a track from the index, optionally deleting its file.
    ///
    /// Disk deletion runs before the index mutation, so a failing delete
    /// leaves index and disk consistent with each other.
    pub async fn remove_track(&self, id: &TrackId, delete_from_disk: bool) -> Result<()> {
        let path = self
            .resolve_path(id)
            .await
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if delete_from_disk {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| Error::disk(&path, source))?;
            info!("deleted track file: {}", path.display());
        }

        let mut store = self.store.write().await;
        if !store.remove(&filename) {
            return Err(Error::not_found(id.to_string()));
        }
        store.persist().await?;
        self.coord_cache.lock().await.remove(&filename);
        info!("successfully removed track: {}", filename);
        Ok(())
    }

    /// Cached coordinate-key discovery for one file.
    async fn coordinate_keys(&self, filename: &str, samples: &[Sample]) -> Option<CoordKeys> {
        let mut cache = self.coord_cache.lock().await;
        if let Some(cached) = cache.get(filename) {
            return cached.clone();
        }
        let detected = samples.iter().find_map(detect_coord_keys);
        cache.insert(filename.to_string(), detected.clone());
        detected
    }

    /// Snapshot the filesystem: every eligible recorded file in the primary
    /// and checkpoint directories with its modification time. The store's
    /// own file is excluded.
    async fn scan_files(&self) -> Result<BTreeMap<String, FileStat>> {
        let mut files = BTreeMap::new();
        self.scan_dir(&self.directory, false, &mut files).await?;
        if tokio::fs::try_exists(&self.checkpoint_directory)
            .await
            .unwrap_or(false)
        {
            self.scan_dir(&self.checkpoint_directory, true, &mut files)
                .await?;
        }
        Ok(files)
    }

    async fn scan_dir(
        &self,
        dir: &Path,
        checkpoints_only: bool,
        files: &mut BTreeMap<String, FileStat>,
    ) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| Error::disk(dir, source))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == self.db_fname || !name.ends_with(".json") {
                continue;
            }
            let is_checkpoint = name.ends_with(".chk.json");
            if checkpoints_only && !is_checkpoint {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            files.insert(
                name.to_string(),
                FileStat {
                    path: entry.path(),
                    checkpoint: is_checkpoint,
                    mtime_ms,
                },
            );
        }
        Ok(())
    }

    /// Discover export derivatives in the primary directory, keyed by
    /// filename stem.
    async fn scan_exports(&self) -> Result<HashMap<String, BTreeSet<ExportFormat>>> {
        let mut exports: HashMap<String, BTreeSet<ExportFormat>> = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|source| Error::disk(&self.directory, source))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == self.db_fname {
                continue;
            }
            for format in ExportFormat::ALL {
                if let Some(stem) = name.strip_suffix(&format!(".{}", format.extension())) {
                    let stem = stem.strip_suffix(".chk").unwrap_or(stem);
                    exports.entry(stem.to_string()).or_default().insert(format);
                }
            }
        }
        Ok(exports)
    }

    /// Validate and extract one file into a record. In trusted mode a file
    /// that fails to parse still gets a thin record; with validation on it
    /// is excluded with a diagnostic.
    async fn process_file(
        &self,
        filename: &str,
        stat: &FileStat,
        exports: &HashMap<String, BTreeSet<ExportFormat>>,
    ) -> Option<TrackRecord> {
        let parsed = match tokio::fs::read(&stat.path).await {
            Ok(bytes) => parse_samples(&bytes, &stat.path),
            Err(e) => Err(Error::disk(&stat.path, e)),
        };
        let samples = match parsed {
            Ok(samples) => Some(samples),
            Err(e) if self.validation => {
                warn!("validation error in {}: skipping file ({})", filename, e);
                return None;
            }
            Err(e) => {
                debug!("trusted mode: indexing unparsed file {} ({})", filename, e);
                None
            }
        };

        let meta = match &samples {
            Some(samples) => self.pipeline.extract_all(&stat.path, samples),
            None => Default::default(),
        };

        Some(TrackRecord {
            filename: filename.to_string(),
            checkpoint: stat.checkpoint,
            mtime_ms: stat.mtime_ms,
            track_datetime: meta.track_datetime,
            track_duration_secs: meta.track_duration_secs,
            datapoint_count: meta.datapoint_count,
            remote_units: meta.remote_units,
            common_keys: meta.common_keys,
            exports: exports.get(base_stem(filename)).cloned().unwrap_or_default(),
        })
    }
}

/// Filename without its recorded-file suffix (`.chk.json` or `.json`).
fn base_stem(filename: &str) -> &str {
    filename
        .strip_suffix(".chk.json")
        .or_else(|| filename.strip_suffix(".json"))
        .unwrap_or(filename)
}
