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

/// Recorder buffer, schema and replay tests
///
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

use tracklog::config::RecorderSettings;
use tracklog::error::Error;
use tracklog::sample::FieldValue;
use tracklog::track::{SaveMode, Track, TrackMode};

fn settings(dir: &Path) -> RecorderSettings {
    RecorderSettings {
        save_mode: SaveMode::OnDemand,
        checkpoint_interval_seconds: Some(3600),
        max_checkpoint_files: 3,
        trim_fraction: 0.5,
        max_datapoints: 100,
        output_dir: dir.display().to_string(),
        field_names: None,
    }
}

fn ts(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap() + chrono::TimeDelta::seconds(second as i64)
}

fn fields(pairs: &[(&str, f64)]) -> BTreeMap<String, FieldValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), FieldValue::Number(*v)))
        .collect()
}

#[tokio::test]
async fn test_schema_mismatch_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = settings(temp.path());
    config.field_names = Some(vec!["a".to_string(), "b".to_string()]);
    let mut track = Track::new(&config).unwrap();

    let err = track.add(ts(0), fields(&[("a", 1.0)])).await.unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
    assert!(track.is_empty());

    track
        .add(ts(1), fields(&[("a", 1.0), ("b", 2.0)]))
        .await
        .unwrap();
    assert_eq!(track.len(), 1);
}

#[tokio::test]
async fn test_buffer_bound_holds_after_every_add() {
    let temp = TempDir::new().unwrap();
    let mut config = settings(temp.path());
    config.max_datapoints = 10;
    let mut track = Track::new(&config).unwrap();

    for i in 0..50 {
        track.add(ts(i), fields(&[("v", i as f64)])).await.unwrap();
        assert!(
            track.len() <= config.max_datapoints + 1,
            "buffer grew to {} after add {}",
            track.len(),
            i
        );
    }
}

#[tokio::test]
async fn test_overflow_writes_full_checkpoint_and_keeps_trailing_sample() {
    let temp = TempDir::new().unwrap();
    let mut config = settings(temp.path());
    config.save_mode = SaveMode::Continuous;
    config.max_datapoints = 5;
    let mut track = Track::new(&config).unwrap();

    for i in 0..6 {
        track.add(ts(i), fields(&[("v", i as f64)])).await.unwrap();
    }

    // The overflow on the sixth add leaves only the trailing sample.
    assert_eq!(track.len(), 1);
    assert_eq!(track.samples()[0].timestamp(), ts(5));

    let full_files: Vec<_> = std::fs::read_dir(track.checkpoint_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with("-full.chk.json"))
        .collect();
    assert_eq!(full_files.len(), 1);

    // The rotation file holds everything before the retained sample, so the
    // two files replay back-to-back without loss or overlap.
    let bytes = std::fs::read(full_files[0].path()).unwrap();
    let saved: Vec<tracklog::Sample> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(saved.len(), 5);
    assert_eq!(saved.last().unwrap().timestamp(), ts(4));
}

#[tokio::test]
async fn test_continuous_mode_checkpoints_first_add() {
    let temp = TempDir::new().unwrap();
    let mut config = settings(temp.path());
    config.save_mode = SaveMode::Continuous;
    let mut track = Track::new(&config).unwrap();

    track.add(ts(0), fields(&[("v", 1.0)])).await.unwrap();

    let count = std::fs::read_dir(track.checkpoint_dir()).unwrap().count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_on_demand_mode_writes_no_checkpoints() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();

    for i in 0..5 {
        track.add(ts(i), fields(&[("v", 1.0)])).await.unwrap();
    }

    let count = std::fs::read_dir(track.checkpoint_dir()).unwrap().count();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_trim_removes_contiguous_range() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();
    for i in 0..10 {
        track.add(ts(i), fields(&[("v", i as f64)])).await.unwrap();
    }

    let removed = track.trim(2, 0.3);
    assert_eq!(removed, 3);
    assert_eq!(track.len(), 7);
    assert_eq!(track.samples()[1].timestamp(), ts(1));
    assert_eq!(track.samples()[2].timestamp(), ts(5));
}

#[tokio::test]
async fn test_trim_clamps_fraction() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();
    for i in 0..4 {
        track.add(ts(i), fields(&[("v", 1.0)])).await.unwrap();
    }

    let removed = track.trim(0, 7.5);
    assert_eq!(removed, 4);
    assert!(track.is_empty());
}

#[tokio::test]
async fn test_json_round_trip() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();
    for i in 0..3 {
        track
            .add(ts(i), fields(&[("gps/lat", 45.0 + i as f64), ("gps/lon", 7.0)]))
            .await
            .unwrap();
    }

    let path = track
        .try_export(tracklog::ExportFormat::Json, Some("roundtrip"), None, None)
        .await
        .unwrap();

    let mut replayed = Track::new(&settings(temp.path())).unwrap();
    replayed.load(&path).await.unwrap();

    assert_eq!(replayed.mode(), TrackMode::Replay);
    assert_eq!(replayed.samples(), track.samples());
}

#[tokio::test]
async fn test_load_malformed_fails_with_validation_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, b"{ not json ]").unwrap();

    let mut track = Track::new(&settings(temp.path())).unwrap();
    let err = track.load(&path).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_replay_view_advances_and_reports_exhaustion() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();
    for i in 0..3 {
        track.add(ts(i), fields(&[("v", i as f64)])).await.unwrap();
    }
    let path = track
        .try_export(tracklog::ExportFormat::Json, Some("replay"), None, None)
        .await
        .unwrap();

    let mut replayed = Track::new(&settings(temp.path())).unwrap();
    replayed.load(&path).await.unwrap();

    for step in 1..=3usize {
        let view = replayed.current_view();
        assert_eq!(view.samples.len(), step);
        let progress = view.replay.unwrap();
        assert_eq!(progress.cursor, step);
        assert_eq!(progress.exhausted, step == 3);
    }

    // Clamped at the end; stays exhausted.
    let view = replayed.current_view();
    assert_eq!(view.samples.len(), 3);
    assert!(view.replay.unwrap().exhausted);
}

#[tokio::test]
async fn test_live_view_has_no_replay_progress() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();
    track.add(ts(0), fields(&[("v", 1.0)])).await.unwrap();

    let view = track.current_view();
    assert_eq!(view.samples.len(), 1);
    assert!(view.replay.is_none());
}

#[tokio::test]
async fn test_transforms_run_in_order_before_append() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&settings(temp.path())).unwrap();

    // Double the value, then add one: order matters.
    track.push_transform(Box::new(|s| {
        let mut fields = s.fields().clone();
        if let Some(FieldValue::Number(v)) = fields.get_mut("v") {
            *v *= 2.0;
        }
        tracklog::Sample::new(s.timestamp(), fields)
    }));
    track.push_transform(Box::new(|s| {
        let mut fields = s.fields().clone();
        if let Some(FieldValue::Number(v)) = fields.get_mut("v") {
            *v += 1.0;
        }
        tracklog::Sample::new(s.timestamp(), fields)
    }));

    track.add(ts(0), fields(&[("v", 3.0)])).await.unwrap();
    assert_eq!(
        track.samples()[0].fields().get("v"),
        Some(&FieldValue::Number(7.0))
    );
}
