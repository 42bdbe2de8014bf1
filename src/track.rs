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

// The streaming recorder: an ordered, memory-bounded sample log with
// checkpointing, live/replay state and export dispatch

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::RecorderSettings;
use crate::error::{Error, Result};
use crate::export::{ExportFormat, TrackExporter};
use crate::sample::{read_track_file, FieldValue, Sample};

/// Checkpoint files live in this subdirectory of the output directory.
pub const CHECKPOINT_SUBDIR: &str = "chk";

/// Checkpoint files carrying this tag are exempt from retention pruning.
pub const FULL_TAG: &str = "full";

const CHECKPOINT_SUFFIX: &str = ".chk.json";

/// Live recording vs. stepping through a loaded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackMode {
    Live,
    Replay,
}

/// How data is persisted to disk.
///
/// The transition pairing is a documented convention even though the names
/// read as inverted: `start_run` moves `OnDemand -> Continuous`, `end_run`
/// moves back. The pairing is pinned by a regression test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveMode {
    None,
    OnDemand,
    Continuous,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::None => f.write_str("none"),
            SaveMode::OnDemand => f.write_str("on-demand"),
            SaveMode::Continuous => f.write_str("continuous"),
        }
    }
}

/// Pure transform applied to every sample before it is appended.
pub type SampleTransform = Box<dyn Fn(Sample) -> Sample + Send + Sync>;

/// Observable outcome counters for absorbed export/checkpoint writes.
///
/// Export failures on the ingestion path are logged and never propagated;
/// this channel is how they stay observable.
#[derive(Debug, Clone, Default)]
pub struct ExportStatus {
    pub completed: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// Replay cursor state attached to a view taken in replay mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayProgress {
    pub cursor: usize,
    /// True exactly when the cursor has reached the end of the buffer.
    pub exhausted: bool,
}

/// Snapshot of the recorder state returned by [`Track::current_view`].
#[derive(Debug)]
pub struct TrackView<'a> {
    pub samples: &'a [Sample],
    /// `None` in live mode.
    pub replay: Option<ReplayProgress>,
}

/// Ordered, memory-bounded sequence of samples with checkpointing and
/// export dispatch. Single producer; checkpoint and export I/O run on the
/// caller's task.
pub struct Track {
    samples: Vec<Sample>,
    field_names: Option<BTreeSet<String>>,
    mode: TrackMode,
    save_mode: SaveMode,
    checkpoint_interval: Option<TimeDelta>,
    max_checkpoint_files: usize,
    trim_fraction: f64,
    max_datapoints: usize,
    output_dir: PathBuf,
    checkpoint_dir: PathBuf,
    transforms: Vec<SampleTransform>,
    replay_cursor: usize,
    last_checkpoint: Option<DateTime<Utc>>,
    run_start: Option<usize>,
    status_tx: watch::Sender<ExportStatus>,
}

impl Track {
    pub fn new(settings: &RecorderSettings) -> Result<Self> {
        let output_dir = PathBuf::from(&settings.output_dir);
        let checkpoint_dir = output_dir.join(CHECKPOINT_SUBDIR);
        std::fs::create_dir_all(&checkpoint_dir)
            .map_err(|source| Error::disk(&checkpoint_dir, source))?;

        info!("output directory: {}", output_dir.display());
        info!("checkpoint directory: {}", checkpoint_dir.display());

        let (status_tx, _) = watch::channel(ExportStatus::default());
        Ok(Self {
            samples: Vec::new(),
            field_names: settings
                .field_names
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            mode: TrackMode::Live,
            save_mode: settings.save_mode,
            checkpoint_interval: settings
                .checkpoint_interval_seconds
                .map(|s| TimeDelta::seconds(s as i64)),
            max_checkpoint_files: settings.max_checkpoint_files,
            trim_fraction: settings.trim_fraction,
            max_datapoints: settings.max_datapoints,
            output_dir,
            checkpoint_dir,
            transforms: Vec::new(),
            replay_cursor: 0,
            last_checkpoint: None,
            run_start: None,
            status_tx,
        })
    }

    /// Minimal track used to replay a file into memory, e.g. by the index
    /// when materializing an export derivative. No checkpointing.
    pub fn for_replay(output_dir: &Path) -> Result<Self> {
        let settings = RecorderSettings {
            save_mode: SaveMode::None,
            checkpoint_interval_seconds: None,
            output_dir: output_dir.display().to_string(),
            ..RecorderSettings::default()
        };
        Self::new(&settings)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn save_mode(&self) -> SaveMode {
        self.save_mode
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Subscribe to the export status channel.
    pub fn export_status(&self) -> watch::Receiver<ExportStatus> {
        self.status_tx.subscribe()
    }

    /// Append a pure transform to the ingestion pipeline. Transforms run in
    /// registration order on every sample before it is appended.
    pub fn push_transform(&mut self, transform: SampleTransform) {
        self.transforms.push(transform);
    }

    /// Append one reading.
    ///
    /// With a fixed field schema configured the exact key set must match,
    /// otherwise the call fails with [`Error::SchemaMismatch`] and nothing
    /// is appended. On overflow past `max_datapoints` the buffer is rotated
    /// out through a retention-exempt "full" checkpoint, leaving only the
    /// trailing sample, so adjacently saved files replay back-to-back
    /// without loss or overlap.
    pub async fn add(
        &mut self,
        timestamp: DateTime<Utc>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<()> {
        if let Some(expected) = &self.field_names {
            if !expected.iter().eq(fields.keys()) {
                return Err(Error::SchemaMismatch {
                    expected: expected.iter().cloned().collect(),
                    got: fields.keys().cloned().collect(),
                });
            }
        }

        let mut sample = Sample::new(timestamp, fields);
        for transform in &self.transforms {
            sample = transform(sample);
        }
        self.samples.push(sample);

        if self.samples.len() > self.max_datapoints {
            warn!("maximum number of datapoints reached; saving a checkpoint and wiping cache");
            self.run_checkpoint_policy(true, Some(FULL_TAG)).await;
            // Keep only the trailing sample; it was excluded from the full
            // checkpoint, so the two files join without overlap.
            self.trim_count(0, self.samples.len() - 1);
        }

        self.run_checkpoint_policy(false, None).await;
        Ok(())
    }

    /// Transition into continuous saving for a new recording run.
    ///
    /// Records the run start cursor and trims `trim_fraction` of the
    /// pre-run buffer to discard noise gathered before the run.
    pub fn start_run(&mut self) {
        match self.save_mode {
            SaveMode::OnDemand => {
                self.save_mode = SaveMode::Continuous;
                self.run_start = Some(self.samples.len().saturating_sub(1));
                if self.run_start.unwrap_or(0) > 0 {
                    self.trim(0, self.trim_fraction);
                }
                info!("logging data");
            }
            current => {
                warn!(
                    "cannot start track saving on demand; current saving mode is {}",
                    current
                );
            }
        }
    }

    /// Finalize the current run: persist the run slice as an export, drop
    /// all non-"full" checkpoint files and return to on-demand saving.
    pub async fn end_run(&mut self) {
        if self.save_mode != SaveMode::OnDemand {
            let start = self.run_start.unwrap_or(0).min(self.samples.len());
            self.export(ExportFormat::Json, None, None, Some(start..self.samples.len()))
                .await;
            self.clear_checkpoints(false).await;
            self.run_start = None;
            self.last_checkpoint = None;
            self.save_mode = SaveMode::OnDemand;
            info!("data logging ended");
        } else {
            warn!(
                "cannot end track saving; current saving mode is {}",
                self.save_mode
            );
        }
    }

    /// Remove the contiguous range starting at `start` covering
    /// `floor(len * clamp(fraction, 0, 1))` samples. Interior cursors are
    /// shifted to keep pointing at the same samples. Returns the number of
    /// samples removed.
    pub fn trim(&mut self, start: usize, fraction: f64) -> usize {
        if self.samples.is_empty() {
            warn!("no data points to clear");
            return 0;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let count = (self.samples.len() as f64 * fraction).floor() as usize;
        self.trim_count(start, count)
    }

    fn trim_count(&mut self, start: usize, count: usize) -> usize {
        if self.samples.is_empty() {
            return 0;
        }
        let start = start.min(self.samples.len() - 1);
        let end = (start + count).min(self.samples.len());
        self.samples.drain(start..end);

        let removed = end - start;
        self.run_start = self.run_start.map(|rs| {
            if rs >= end {
                rs - removed
            } else {
                rs.min(start)
            }
        });
        self.replay_cursor = self.replay_cursor.min(self.samples.len());

        info!(
            "cleared {} data points from index {}; remaining: {}",
            removed,
            start,
            self.samples.len()
        );
        removed
    }

    /// Replace the buffer wholesale from a recorded file and switch to
    /// replay mode with the cursor reset.
    pub async fn load(&mut self, path: &Path) -> Result<()> {
        self.samples = read_track_file(path).await?;
        self.mode = TrackMode::Replay;
        self.replay_cursor = 0;
        info!(
            "loaded {} samples from {} for replay",
            self.samples.len(),
            path.display()
        );
        Ok(())
    }

    /// Current state of the track.
    ///
    /// In live mode this is the full buffer. In replay mode the view is
    /// truncated to an internal cursor that advances by one sample per
    /// call; `replay.exhausted` reports end-of-data explicitly instead of
    /// leaving callers to compare cursor and length.
    pub fn current_view(&mut self) -> TrackView<'_> {
        match self.mode {
            TrackMode::Live => TrackView {
                samples: &self.samples,
                replay: None,
            },
            TrackMode::Replay => {
                self.replay_cursor = (self.replay_cursor + 1).min(self.samples.len());
                TrackView {
                    samples: &self.samples[..self.replay_cursor],
                    replay: Some(ReplayProgress {
                        cursor: self.replay_cursor,
                        exhausted: self.replay_cursor == self.samples.len(),
                    }),
                }
            }
        }
    }

    /// Export through a built-in format, absorbing failures.
    ///
    /// Ingestion must never stop because a write failed: errors are logged
    /// and published on the status channel instead of propagated.
    pub async fn export(
        &mut self,
        format: ExportFormat,
        fname: Option<&str>,
        dir: Option<&Path>,
        range: Option<Range<usize>>,
    ) {
        match self.try_export(format, fname, dir, range).await {
            Ok(path) => {
                info!("saving track to {}: {}", format, path.display());
                self.status_tx.send_modify(|s| s.completed += 1);
            }
            Err(e) => {
                error!("error in saving track: {}", e);
                self.status_tx.send_modify(|s| {
                    s.failed += 1;
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }

    /// Export through a built-in format, propagating failures to callers
    /// that need the outcome (the index does).
    pub async fn try_export(
        &self,
        format: ExportFormat,
        fname: Option<&str>,
        dir: Option<&Path>,
        range: Option<Range<usize>>,
    ) -> Result<PathBuf> {
        self.export_with(format.exporter().as_ref(), format.extension(), fname, dir, range)
            .await
    }

    /// Export through a caller-supplied exporter.
    pub async fn export_with(
        &self,
        exporter: &dyn TrackExporter,
        extension: &str,
        fname: Option<&str>,
        dir: Option<&Path>,
        range: Option<Range<usize>>,
    ) -> Result<PathBuf> {
        let fname = match fname {
            Some(name) => name.to_string(),
            None => Utc::now().format("%Y%m%d-%H%M%S").to_string(),
        };
        let dir = dir.unwrap_or(&self.output_dir);
        let path = dir.join(format!("{}.{}", fname, extension));

        let len = self.samples.len();
        let range = match range {
            Some(r) => r.start.min(len)..r.end.min(len),
            None => 0..len,
        };
        let slice = if range.start <= range.end {
            &self.samples[range]
        } else {
            &[][..]
        };

        let field_names: Option<Vec<String>> = self
            .field_names
            .as_ref()
            .map(|names| names.iter().cloned().collect());
        debug!(
            "exporting {} samples via {} to {}",
            slice.len(),
            exporter.format_name(),
            path.display()
        );
        exporter
            .export(slice, field_names.as_deref(), &path)
            .await?;
        Ok(path)
    }

    /// Evaluate the checkpoint policy: write when forced or when the
    /// configured interval has elapsed, then apply retention. Only active
    /// in continuous mode with an interval configured.
    async fn run_checkpoint_policy(&mut self, force: bool, tag: Option<&str>) {
        if self.save_mode != SaveMode::Continuous {
            return;
        }
        let Some(interval) = self.checkpoint_interval else {
            return;
        };

        let now = Utc::now();
        let due = match self.last_checkpoint {
            None => true,
            Some(prev) => now.signed_duration_since(prev) > interval,
        };

        if force || due {
            self.last_checkpoint = Some(now);
            let start = self.run_start.unwrap_or(0).min(self.samples.len());
            // A forced "full" rotation excludes the retained trailing
            // sample; it opens the next file instead.
            let end = if tag == Some(FULL_TAG) {
                self.samples.len().saturating_sub(1).max(start)
            } else {
                self.samples.len()
            };
            let fname = match tag {
                Some(tag) => format!("{}-{}.chk", now.format("%Y%m%d-%H%M%S"), tag),
                None => format!("{}.chk", now.format("%Y%m%d-%H%M%S")),
            };
            let checkpoint_dir = self.checkpoint_dir.clone();
            self.export(
                ExportFormat::Json,
                Some(fname.as_str()),
                Some(checkpoint_dir.as_path()),
                Some(start..end),
            )
            .await;
        }

        self.prune_checkpoints().await;
    }

    /// List checkpoint files with their modification times, oldest first.
    /// `full`-tagged files are excluded unless `include_full` is set.
    async fn checkpoint_files(&self, include_full: bool) -> Vec<(PathBuf, std::time::SystemTime)> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.checkpoint_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(
                    "cannot read checkpoint directory {}: {}",
                    self.checkpoint_dir.display(),
                    e
                );
                return files;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(CHECKPOINT_SUFFIX) {
                continue;
            }
            if !include_full && name.ends_with(&format!("-{}{}", FULL_TAG, CHECKPOINT_SUFFIX)) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            files.push((entry.path(), mtime));
        }
        files.sort_by_key(|(_, mtime)| *mtime);
        files
    }

    /// Retention: among non-"full" checkpoints keep at most
    /// `max_checkpoint_files`, pruning the single oldest file per
    /// evaluation.
    async fn prune_checkpoints(&self) {
        let files = self.checkpoint_files(false).await;
        if files.len() > self.max_checkpoint_files {
            let (oldest, _) = &files[0];
            match tokio::fs::remove_file(oldest).await {
                Ok(()) => debug!("pruned checkpoint {}", oldest.display()),
                Err(e) => warn!("could not prune checkpoint {}: {}", oldest.display(), e),
            }
        }
    }

    /// Delete checkpoint files; "full"-tagged ones only when requested.
    async fn clear_checkpoints(&self, include_full: bool) {
        for (path, _) in self.checkpoint_files(include_full).await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("could not remove checkpoint {}: {}", path.display(), e);
            }
        }
    }
}

impl fmt::Display for Track {
    /// Compact tabular rendering for diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.samples.is_empty() {
            return f.write_str("No data points available.");
        }
        let columns: Vec<String> = match &self.field_names {
            Some(names) => names.iter().cloned().collect(),
            None => self
                .samples
                .last()
                .map(|s| s.field_keys().map(str::to_string).collect())
                .unwrap_or_default(),
        };
        write!(f, "{:<25}", "timestamp")?;
        for column in &columns {
            write!(f, " | {:<12}", column)?;
        }
        writeln!(f)?;
        for sample in &self.samples {
            write!(f, "{:<25}", sample.timestamp().to_rfc3339())?;
            for column in &columns {
                let value = sample
                    .fields()
                    .get(column)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                write!(f, " | {:<12}", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
