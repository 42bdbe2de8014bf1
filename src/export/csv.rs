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

// Flat tabular form: one timestamp column plus declared or inferred fields

use super::TrackExporter;
use crate::error::{Error, Result};
use crate::sample::Sample;

pub struct CsvExporter;

impl CsvExporter {
    /// Column set: the declared schema when one exists, otherwise the key
    /// set of the first sample.
    fn columns(samples: &[Sample], field_names: Option<&[String]>) -> Vec<String> {
        match field_names {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => samples
                .first()
                .map(|s| s.field_keys().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

impl TrackExporter for CsvExporter {
    fn render(&self, samples: &[Sample], field_names: Option<&[String]>) -> Result<Vec<u8>> {
        let columns = Self::columns(samples, field_names);
        let to_export_err = |e: csv::Error| Error::Export {
            format: "csv".to_string(),
            reason: e.to_string(),
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        let header = std::iter::once("timestamp".to_string()).chain(columns.iter().cloned());
        writer.write_record(header).map_err(to_export_err)?;

        for sample in samples {
            let row = std::iter::once(sample.timestamp().to_rfc3339()).chain(
                columns
                    .iter()
                    .map(|c| sample.fields().get(c).map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(row).map_err(to_export_err)?;
        }

        writer.into_inner().map_err(|e| Error::Export {
            format: "csv".to_string(),
            reason: e.to_string(),
        })
    }

    fn format_name(&self) -> &str {
        "csv"
    }
}
