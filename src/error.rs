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

// Error taxonomy shared by the recorder and the index

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A recorded file does not parse as an ordered sequence of samples.
    #[error("could not load {path} as a track: {reason}")]
    Validation { path: PathBuf, reason: String },

    /// An ingested field set does not match the configured schema.
    #[error("inconsistent fields: expected {expected:?}, got {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    /// A track id or path could not be resolved.
    #[error("track '{id}' not found")]
    NotFound { id: String },

    /// An exporter failed to produce or write its output.
    #[error("export to {format} failed: {reason}")]
    Export { format: String, reason: String },

    /// A filesystem operation failed during a write or delete.
    #[error("disk operation failed on {path}: {source}")]
    Disk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn disk(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Disk {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Error::NotFound { id: id.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
