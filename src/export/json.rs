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

// Lossless structured dump, the same representation `Track::load` reads back

use super::TrackExporter;
use crate::error::{Error, Result};
use crate::sample::Sample;

pub struct JsonExporter;

impl TrackExporter for JsonExporter {
    fn render(&self, samples: &[Sample], _field_names: Option<&[String]>) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(samples).map_err(|e| Error::Export {
            format: "json".to_string(),
            reason: e.to_string(),
        })
    }

    fn format_name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{parse_samples, FieldValue};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::path::Path;

    #[test]
    fn test_dump_round_trips_through_parse() {
        let samples: Vec<Sample> = (0..4)
            .map(|i| {
                let mut fields = BTreeMap::new();
                fields.insert("gps/speed".to_string(), FieldValue::Number(i as f64 * 0.5));
                Sample::new(
                    Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, i).unwrap(),
                    fields,
                )
            })
            .collect();

        let bytes = JsonExporter.render(&samples, None).unwrap();
        let back = parse_samples(&bytes, Path::new("dump.json")).unwrap();
        assert_eq!(back, samples);
    }

    #[test]
    fn test_empty_sequence_renders() {
        let bytes = JsonExporter.render(&[], None).unwrap();
        assert_eq!(bytes, b"[]");
    }
}
