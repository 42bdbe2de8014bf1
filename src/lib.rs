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

// tracklog: a bounded, checkpointed recorder for streaming sensor/GPS
// samples with a synchronized on-disk metadata index
//
// - Records timestamped scalar readings into a memory-bounded track
// - Checkpoints the current run periodically and rotates on overflow
// - Exports tracks to JSON, CSV and GPX
// - Indexes recorded files incrementally by modification time

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod index;
pub mod sample;
pub mod track;

// Re-export main types
pub use config::{load_config, load_config_with_env, ConfigLoader, TracklogConfig};
pub use error::{Error, Result};
pub use export::{CsvExporter, ExportFormat, GpxExporter, JsonExporter, TrackExporter};
pub use extract::{ExtractorPipeline, MetadataExtractor, TrackMetadata};
pub use index::{Database, TrackId, TrackRecord};
pub use sample::{FieldValue, Sample};
pub use track::{ExportStatus, ReplayProgress, SaveMode, Track, TrackMode, TrackView};
