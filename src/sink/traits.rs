use crate::event::{Event, EventKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// What a sink already holds when a sync starts.
#[derive(Debug, Clone, Default)]
pub struct SinkState {
    /// Last committed watermark, `None` when nothing was ever synced.
    pub watermark: Option<DateTime<Utc>>,
    pub keys: HashSet<EventKey>,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn load_state(&self) -> Result<SinkState, SinkError>;

    /// Durably write every event in `events`, or none of them.
    async fn append(&self, events: &[Event]) -> Result<(), SinkError>;

    /// Record that everything before `watermark` is persisted.
    async fn commit_watermark(&self, watermark: DateTime<Utc>) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("state file error: {0}")]
    State(#[from] serde_json::Error),

    #[error("watermark would move backward from {current} to {requested}")]
    WatermarkRegression {
        current: DateTime<Utc>,
        requested: DateTime<Utc>,
    },

    #[error("sink error: {0}")]
    Generic(String),
}

impl SinkError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
