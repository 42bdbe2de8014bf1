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

// Export strategies: stateless conversion of an ordered sample sequence
// into an interchange file

mod csv;
mod gpx;
mod json;

pub use csv::CsvExporter;
pub use gpx::{detect_coord_keys, CoordKeys, GpxExporter};
pub use json::JsonExporter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::sample::Sample;

/// The closed set of built-in export formats.
///
/// Dispatch over this enum is exhaustive; adding a format is a compile-time
/// event, not a lookup-table edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Gpx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Gpx];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Gpx => "gpx",
        }
    }

    /// Build the exporter for this format.
    pub fn exporter(self) -> Box<dyn TrackExporter> {
        match self {
            ExportFormat::Json => Box::new(JsonExporter),
            ExportFormat::Csv => Box::new(CsvExporter),
            ExportFormat::Gpx => Box::new(GpxExporter::default()),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "gpx" => Ok(ExportFormat::Gpx),
            other => Err(Error::Export {
                format: other.to_string(),
                reason: "unsupported export format".to_string(),
            }),
        }
    }
}

/// Stateless strategy converting an ordered sample sequence to a file.
///
/// The caller slices the sequence before handing it over; exporters never
/// see more than the sub-range selected for export.
#[async_trait]
pub trait TrackExporter: Send + Sync {
    /// Serialize the samples into the target representation.
    fn render(&self, samples: &[Sample], field_names: Option<&[String]>) -> Result<Vec<u8>>;

    /// Render and write to `path`.
    async fn export(
        &self,
        samples: &[Sample],
        field_names: Option<&[String]>,
        path: &Path,
    ) -> Result<()> {
        let bytes = self.render(samples, field_names)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|source| Error::disk(path, source))
    }

    /// Format identifier used in diagnostics.
    fn format_name(&self) -> &str;
}
