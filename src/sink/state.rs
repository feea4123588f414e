use super::traits::SinkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CURRENT_VERSION: u32 = 1;

/// Committed watermark as stored next to the events CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkState {
    pub version: u32,
    pub watermark: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
}

/// Reads and atomically replaces the watermark state file.
#[derive(Debug, Clone)]
pub struct WatermarkFile {
    path: PathBuf,
}

impl WatermarkFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file is missing or written by an unknown version.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>, SinkError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::io(&self.path, e)),
        };

        let state: WatermarkState = serde_json::from_str(&contents)?;
        if state.version != CURRENT_VERSION {
            tracing::warn!(
                "Watermark state version mismatch: {} vs {}, ignoring state file",
                state.version,
                CURRENT_VERSION
            );
            return Ok(None);
        }

        Ok(Some(state.watermark))
    }

    /// Write to a sibling temp file, fsync, then rename over the old state.
    pub fn store(&self, watermark: DateTime<Utc>) -> Result<(), SinkError> {
        let state = WatermarkState {
            version: CURRENT_VERSION,
            watermark,
            committed_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&state)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).map_err(|e| SinkError::io(&tmp_path, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| SinkError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| SinkError::io(&self.path, e))?;

        Ok(())
    }
}
