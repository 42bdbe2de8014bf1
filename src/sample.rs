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

// Immutable timestamped sensor reading and the on-disk track file format

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Scalar value carried by a single sample field.
///
/// Sample fields are a flat map; nested structures are not representable
/// and therefore rejected at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Numeric view of the value, parsing numeric strings as well.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(t) => t.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(t) => f.write_str(t),
            FieldValue::Null => Ok(()),
        }
    }
}

/// One timestamped reading with an arbitrary flat set of scalar fields.
///
/// Samples are immutable once constructed; the recorder discards them by
/// trimming, never by mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "timestamp_format")]
    timestamp: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, fields: BTreeMap<String, FieldValue>) -> Self {
        Self { timestamp, fields }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Parse the recorded track file format: an ordered JSON array of
/// `{timestamp, fields}` objects with scalar-only field values.
pub fn parse_samples(bytes: &[u8], path: &Path) -> Result<Vec<Sample>> {
    serde_json::from_slice(bytes).map_err(|e| Error::Validation {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Read and parse a recorded track file from disk.
pub async fn read_track_file(path: &Path) -> Result<Vec<Sample>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| Error::disk(path, source))?;
    parse_samples(&bytes, path)
}

/// RFC 3339 serialization with a lenient reader: recorded files produced by
/// older tooling carry naive timestamps (no offset, variable sub-second
/// precision), which are taken as UTC.
mod timestamp_format {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> std::result::Result<S::Ok, S::Error> {
        ser.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse_lenient(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}

/// Accepts RFC 3339 as well as naive `YYYY-MM-DD[T ]HH:MM:SS[.frac]` forms.
pub fn parse_lenient(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}
