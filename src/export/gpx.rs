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

// Geospatial interchange form: GPX 1.1, one trackpoint per sample

use std::fmt::Write as _;

use xml::escape::escape_str_attribute;

use super::TrackExporter;
use crate::error::Result;
use crate::sample::Sample;

/// Field keys a sample uses for its position, detected once per file by
/// suffix heuristics (`gps/lat`, `gps/lon`, `gps/alt`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordKeys {
    pub lat: String,
    pub lon: String,
    pub ele: Option<String>,
}

/// Suffix-heuristic detection of coordinate-bearing keys in one sample.
pub fn detect_coord_keys(sample: &Sample) -> Option<CoordKeys> {
    let lat = sample.field_keys().find(|k| k.ends_with("lat"))?;
    let lon = sample
        .field_keys()
        .find(|k| k.ends_with("lon") || k.ends_with("long"))?;
    let ele = sample
        .field_keys()
        .find(|k| k.ends_with("alt") || k.ends_with("elev") || k.ends_with("altitude"));
    Some(CoordKeys {
        lat: lat.to_string(),
        lon: lon.to_string(),
        ele: ele.map(str::to_string),
    })
}

/// GPX exporter. Samples without recognizable coordinates are skipped, so
/// the output point count never exceeds the input sample count.
#[derive(Default)]
pub struct GpxExporter {
    /// Precomputed coordinate keys, normally supplied from the index's
    /// per-file cache; per-sample detection is the fallback.
    pub coord_hint: Option<CoordKeys>,
}

impl GpxExporter {
    pub fn with_hint(coord_hint: Option<CoordKeys>) -> Self {
        Self { coord_hint }
    }

    fn point(&self, sample: &Sample) -> Option<(f64, f64, Option<f64>)> {
        let keys = match &self.coord_hint {
            Some(hint) => hint.clone(),
            None => detect_coord_keys(sample)?,
        };
        let lat = sample.fields().get(&keys.lat)?.as_f64()?;
        let lon = sample.fields().get(&keys.lon)?.as_f64()?;
        let ele = keys
            .ele
            .and_then(|k| sample.fields().get(&k))
            .and_then(|v| v.as_f64());
        Some((lat, lon, ele))
    }
}

impl TrackExporter for GpxExporter {
    fn render(&self, samples: &[Sample], _field_names: Option<&[String]>) -> Result<Vec<u8>> {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<gpx version=\"1.1\" creator=\"tracklog\">\n");
        out.push_str("  <metadata>\n");
        out.push_str("    <name>tracklog export</name>\n");
        out.push_str("    <desc>Track data exported by tracklog</desc>\n");
        out.push_str("  </metadata>\n");
        out.push_str("  <trk>\n    <trkseg>\n");

        for sample in samples {
            let Some((lat, lon, ele)) = self.point(sample) else {
                continue;
            };
            let _ = write!(out, "      <trkpt lat=\"{}\" lon=\"{}\">\n", lat, lon);
            if let Some(ele) = ele {
                let _ = write!(out, "        <ele>{}</ele>\n", ele);
            }
            let _ = write!(
                out,
                "        <time>{}</time>\n",
                escape_str_attribute(&sample.timestamp().to_rfc3339())
            );
            out.push_str("      </trkpt>\n");
        }

        out.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
        Ok(out.into_bytes())
    }

    fn format_name(&self) -> &str {
        "gpx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::FieldValue;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn gps_sample(second: u32, lat: f64, lon: f64, alt: Option<f64>) -> Sample {
        let mut fields = BTreeMap::new();
        fields.insert("gps/lat".to_string(), FieldValue::Number(lat));
        fields.insert("gps/lon".to_string(), FieldValue::Number(lon));
        if let Some(alt) = alt {
            fields.insert("gps/alt".to_string(), FieldValue::Number(alt));
        }
        Sample::new(
            Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, second).unwrap(),
            fields,
        )
    }

    fn bare_sample(second: u32) -> Sample {
        let mut fields = BTreeMap::new();
        fields.insert("imu/accel".to_string(), FieldValue::Number(0.1));
        Sample::new(
            Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, second).unwrap(),
            fields,
        )
    }

    #[test]
    fn test_detects_coordinate_keys() {
        let keys = detect_coord_keys(&gps_sample(0, 45.0, 7.0, Some(120.0))).unwrap();
        assert_eq!(keys.lat, "gps/lat");
        assert_eq!(keys.lon, "gps/lon");
        assert_eq!(keys.ele.as_deref(), Some("gps/alt"));
        assert!(detect_coord_keys(&bare_sample(0)).is_none());
    }

    #[test]
    fn test_skips_samples_without_coordinates() {
        let samples = vec![gps_sample(0, 45.0, 7.0, None), bare_sample(1), gps_sample(2, 45.1, 7.1, None)];
        let text = String::from_utf8(GpxExporter::default().render(&samples, None).unwrap()).unwrap();
        assert_eq!(text.matches("<trkpt").count(), 2);
    }

    #[test]
    fn test_elevation_is_optional() {
        let samples = vec![gps_sample(0, 45.0, 7.0, Some(120.0)), gps_sample(1, 45.1, 7.1, None)];
        let text = String::from_utf8(GpxExporter::default().render(&samples, None).unwrap()).unwrap();
        assert_eq!(text.matches("<ele>").count(), 1);
    }
}
