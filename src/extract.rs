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

// Metadata derivation from parsed track files: a fixed ordered pipeline of
// failure-isolated extractor components

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

use crate::sample::Sample;

/// Summary facts derived from one recorded file. Every field is optional:
/// an extractor failure leaves its fields unset without affecting the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub track_datetime: Option<DateTime<Utc>>,
    pub track_duration_secs: Option<f64>,
    pub datapoint_count: Option<usize>,
    pub remote_units: BTreeSet<String>,
    pub common_keys: BTreeSet<String>,
}

/// One metadata derivation step. Implementations write the fields they own
/// into `meta` and report failures through the returned error; the pipeline
/// isolates them.
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn derive(&self, path: &Path, samples: &[Sample], meta: &mut TrackMetadata)
        -> anyhow::Result<()>;
}

/// Approximate recording datetime parsed from the filename. Two timestamp
/// patterns are accepted: `YYYY-MM-DDTHH-MM-SS` and `YYYYMMDD-HHMMSS`.
struct FilenameDatetime {
    pattern: Regex,
}

impl FilenameDatetime {
    fn new() -> Self {
        Self {
            pattern: Regex::new(r"(\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}|\d{8}-\d{6})").unwrap(),
        }
    }
}

impl MetadataExtractor for FilenameDatetime {
    fn name(&self) -> &'static str {
        "filename_datetime"
    }

    fn derive(
        &self,
        path: &Path,
        _samples: &[Sample],
        meta: &mut TrackMetadata,
    ) -> anyhow::Result<()> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(m) = self.pattern.find(name) else {
            return Ok(());
        };
        let raw = m.as_str();
        let format = if raw.contains('T') {
            "%Y-%m-%dT%H-%M-%S"
        } else {
            "%Y%m%d-%H%M%S"
        };
        let naive = NaiveDateTime::parse_from_str(raw, format)
            .with_context(|| format!("date parsing error in '{}'", raw))?;
        meta.track_datetime = Some(naive.and_utc());
        Ok(())
    }
}

/// Total duration: difference of the first and last sample timestamps.
struct TrackDuration;

impl MetadataExtractor for TrackDuration {
    fn name(&self) -> &'static str {
        "track_duration"
    }

    fn derive(
        &self,
        _path: &Path,
        samples: &[Sample],
        meta: &mut TrackMetadata,
    ) -> anyhow::Result<()> {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            bail!("no samples to compute a duration from");
        };
        let span = last.timestamp().signed_duration_since(first.timestamp());
        meta.track_duration_secs = Some(span.num_milliseconds() as f64 / 1000.0);
        Ok(())
    }
}

struct DatapointCount;

impl MetadataExtractor for DatapointCount {
    fn name(&self) -> &'static str {
        "datapoint_count"
    }

    fn derive(
        &self,
        _path: &Path,
        samples: &[Sample],
        meta: &mut TrackMetadata,
    ) -> anyhow::Result<()> {
        meta.datapoint_count = Some(samples.len());
        Ok(())
    }
}

/// Remote units: the distinct namespace prefixes (substring before the first
/// `/`) in the first sample's keys.
struct RemoteUnits;

impl MetadataExtractor for RemoteUnits {
    fn name(&self) -> &'static str {
        "remote_units"
    }

    fn derive(
        &self,
        _path: &Path,
        samples: &[Sample],
        meta: &mut TrackMetadata,
    ) -> anyhow::Result<()> {
        if let Some(first) = samples.first() {
            meta.remote_units = first
                .field_keys()
                .filter_map(|k| k.split('/').next())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }
}

/// Keys present in every sample: the full intersection across the file.
struct CommonKeys;

impl MetadataExtractor for CommonKeys {
    fn name(&self) -> &'static str {
        "common_keys"
    }

    fn derive(
        &self,
        _path: &Path,
        samples: &[Sample],
        meta: &mut TrackMetadata,
    ) -> anyhow::Result<()> {
        let Some(first) = samples.first() else {
            return Ok(());
        };
        let mut common: BTreeSet<String> = first.field_keys().map(str::to_string).collect();
        for sample in &samples[1..] {
            common.retain(|k| sample.fields().contains_key(k));
        }
        meta.common_keys = common;
        Ok(())
    }
}

/// Fixed ordered pipeline over all extractors. A failing extractor is logged
/// and skipped; the remaining ones still run.
pub struct ExtractorPipeline {
    extractors: Vec<Box<dyn MetadataExtractor>>,
}

impl ExtractorPipeline {
    pub fn standard() -> Self {
        Self {
            extractors: vec![
                Box::new(FilenameDatetime::new()),
                Box::new(TrackDuration),
                Box::new(DatapointCount),
                Box::new(RemoteUnits),
                Box::new(CommonKeys),
            ],
        }
    }

    pub fn extract_all(&self, path: &Path, samples: &[Sample]) -> TrackMetadata {
        let mut meta = TrackMetadata::default();
        for extractor in &self.extractors {
            if let Err(e) = extractor.derive(path, samples, &mut meta) {
                warn!(
                    "extractor '{}' failed for {}: {}",
                    extractor.name(),
                    path.display(),
                    e
                );
            }
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::FieldValue;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn sample(second: u32, keys: &[&str]) -> Sample {
        let fields: BTreeMap<String, FieldValue> = keys
            .iter()
            .map(|k| (k.to_string(), FieldValue::Number(1.0)))
            .collect();
        Sample::new(
            Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, second).unwrap(),
            fields,
        )
    }

    #[test]
    fn test_filename_datetime_both_patterns() {
        let pipeline = ExtractorPipeline::standard();
        let samples = [sample(0, &["gps/lat"])];

        let compact = pipeline.extract_all(Path::new("20250314-150926.json"), &samples);
        assert_eq!(
            compact.track_datetime,
            Some(Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap())
        );

        let dashed = pipeline.extract_all(Path::new("2025-03-14T15-09-26.chk.json"), &samples);
        assert_eq!(dashed.track_datetime, compact.track_datetime);

        let none = pipeline.extract_all(Path::new("no-date-here.json"), &samples);
        assert_eq!(none.track_datetime, None);
    }

    #[test]
    fn test_duration_and_count() {
        let pipeline = ExtractorPipeline::standard();
        let samples = [sample(0, &["a"]), sample(30, &["a"])];
        let meta = pipeline.extract_all(Path::new("t.json"), &samples);
        assert_eq!(meta.track_duration_secs, Some(30.0));
        assert_eq!(meta.datapoint_count, Some(2));
    }

    #[test]
    fn test_remote_units_from_first_sample() {
        let pipeline = ExtractorPipeline::standard();
        let samples = [sample(0, &["gps/lat", "gps/lon", "imu/accel", "battery"])];
        let meta = pipeline.extract_all(Path::new("t.json"), &samples);
        let units: Vec<&str> = meta.remote_units.iter().map(String::as_str).collect();
        assert_eq!(units, ["battery", "gps", "imu"]);
    }

    #[test]
    fn test_common_keys_full_intersection() {
        let pipeline = ExtractorPipeline::standard();
        let samples = [
            sample(0, &["gps/lat", "gps/lon", "imu/accel"]),
            sample(1, &["gps/lat", "imu/accel"]),
            sample(2, &["gps/lat", "imu/accel", "battery"]),
        ];
        let meta = pipeline.extract_all(Path::new("t.json"), &samples);
        let keys: Vec<&str> = meta.common_keys.iter().map(String::as_str).collect();
        assert_eq!(keys, ["gps/lat", "imu/accel"]);
    }

    #[test]
    fn test_failing_extractor_is_isolated() {
        let pipeline = ExtractorPipeline::standard();
        // Matches the compact filename pattern but is not a real date, so the
        // datetime extractor fails; duration and count must still land.
        let samples = [sample(0, &["a"]), sample(5, &["a"])];
        let meta = pipeline.extract_all(Path::new("99999999-999999.json"), &samples);
        assert_eq!(meta.track_datetime, None);
        assert_eq!(meta.track_duration_secs, Some(5.0));
        assert_eq!(meta.datapoint_count, Some(2));
    }

    #[test]
    fn test_empty_file_yields_partial_metadata() {
        let pipeline = ExtractorPipeline::standard();
        let meta = pipeline.extract_all(Path::new("20250314-150926.json"), &[]);
        assert!(meta.track_datetime.is_some());
        assert_eq!(meta.track_duration_secs, None);
        assert_eq!(meta.datapoint_count, Some(0));
        assert!(meta.remote_units.is_empty());
    }
}
