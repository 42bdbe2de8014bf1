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

/// Export derivative tests: idempotence, GPX coordinate handling, custom
/// exporters and the observable export-status channel
///
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

use tracklog::config::{IndexSettings, RecorderSettings};
use tracklog::export::{ExportFormat, TrackExporter};
use tracklog::index::{Database, TrackId};
use tracklog::sample::{FieldValue, Sample};
use tracklog::track::{SaveMode, Track};

fn index_settings(dir: &Path) -> IndexSettings {
    IndexSettings {
        directory: dir.display().to_string(),
        db_fname: "tracks_metadata.json".to_string(),
        validation: true,
        rm_thesaurus: None,
    }
}

fn recorder_settings(dir: &Path) -> RecorderSettings {
    RecorderSettings {
        save_mode: SaveMode::OnDemand,
        checkpoint_interval_seconds: None,
        max_checkpoint_files: 3,
        trim_fraction: 0.5,
        max_datapoints: 1000,
        output_dir: dir.display().to_string(),
        field_names: None,
    }
}

fn write_gps_track(path: &Path) {
    // Three samples; the middle one carries no coordinates.
    let body = r#"[
        {"timestamp": "2025-03-14T15:00:00Z", "fields": {"gps/lat": 45.0, "gps/lon": 7.0, "gps/alt": 120.0}},
        {"timestamp": "2025-03-14T15:00:01Z", "fields": {"imu/accel": 0.4}},
        {"timestamp": "2025-03-14T15:00:02Z", "fields": {"gps/lat": 45.001, "gps/lon": 7.001}}
    ]"#;
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn test_export_track_produces_csv_once() {
    let temp = TempDir::new().unwrap();
    write_gps_track(&temp.path().join("20250314-150000.json"));

    let db = Database::open(&index_settings(temp.path())).await.unwrap();
    db.full_sync().await.unwrap();

    let target = db
        .export_track(&TrackId::Position(0), ExportFormat::Csv)
        .await
        .unwrap();
    assert!(target.exists());
    let first_mtime = std::fs::metadata(&target).unwrap().modified().unwrap();

    // Second invocation inspects the side effect and recomputes nothing.
    db.export_track(&TrackId::Position(0), ExportFormat::Csv)
        .await
        .unwrap();
    let second_mtime = std::fs::metadata(&target).unwrap().modified().unwrap();
    assert_eq!(first_mtime, second_mtime);

    let tracks = db.list_tracks().await;
    assert!(tracks[0].exports.contains(&ExportFormat::Csv));
}

#[tokio::test]
async fn test_export_track_gpx_skips_samples_without_coordinates() {
    let temp = TempDir::new().unwrap();
    write_gps_track(&temp.path().join("20250314-150000.json"));

    let db = Database::open(&index_settings(temp.path())).await.unwrap();
    db.full_sync().await.unwrap();

    let target = db
        .export_track(&TrackId::Position(0), ExportFormat::Gpx)
        .await
        .unwrap();

    let text = std::fs::read_to_string(&target).unwrap();
    assert_eq!(text.matches("<trkpt").count(), 2);
    assert_eq!(text.matches("<ele>").count(), 1);
}

#[tokio::test]
async fn test_export_track_unknown_id_fails() {
    let temp = TempDir::new().unwrap();
    let db = Database::open(&index_settings(temp.path())).await.unwrap();

    let err = db
        .export_track(&TrackId::from("missing.json"), ExportFormat::Csv)
        .await
        .unwrap_err();
    assert!(matches!(err, tracklog::Error::NotFound { .. }));
}

struct SampleCountExporter;

impl TrackExporter for SampleCountExporter {
    fn render(&self, samples: &[Sample], _field_names: Option<&[String]>) -> tracklog::Result<Vec<u8>> {
        Ok(samples.len().to_string().into_bytes())
    }

    fn format_name(&self) -> &str {
        "count"
    }
}

#[tokio::test]
async fn test_caller_supplied_exporter() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&recorder_settings(temp.path())).unwrap();
    for i in 0..4 {
        let mut fields = BTreeMap::new();
        fields.insert("v".to_string(), FieldValue::Number(i as f64));
        track
            .add(
                Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, i).unwrap(),
                fields,
            )
            .await
            .unwrap();
    }

    let path = track
        .export_with(&SampleCountExporter, "cnt", Some("counted"), None, Some(1..3))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "2");
}

#[tokio::test]
async fn test_export_failure_is_absorbed_and_observable() {
    let temp = TempDir::new().unwrap();
    let mut track = Track::new(&recorder_settings(temp.path())).unwrap();
    let mut fields = BTreeMap::new();
    fields.insert("v".to_string(), FieldValue::Number(1.0));
    track
        .add(Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap(), fields)
        .await
        .unwrap();

    let status = track.export_status();
    assert_eq!(status.borrow().failed, 0);

    // Writing into a directory that does not exist fails; the failure is
    // logged and published, never propagated.
    let missing_dir = temp.path().join("no-such-dir");
    track
        .export(ExportFormat::Json, Some("out"), Some(missing_dir.as_path()), None)
        .await;

    let seen = status.borrow().clone();
    assert_eq!(seen.failed, 1);
    assert!(seen.last_error.is_some());

    // A later successful export is counted too.
    track.export(ExportFormat::Json, Some("out"), None, None).await;
    assert_eq!(status.borrow().completed, 1);
}
