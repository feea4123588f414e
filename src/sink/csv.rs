use super::state::WatermarkFile;
use super::traits::{EventSink, SinkError, SinkState};
use crate::event::{primary_of_list, Event, EventKey, LIST_DELIMITER};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EVENTS_FILE: &str = "Copilot_Events.csv";
pub const STATE_FILE: &str = "Copilot_Events.state.json";

pub const EVENT_HEADER: [&str; 9] = [
    "TimeStamp",
    "User",
    "App",
    "Location",
    "AppContext",
    "AccessedResources",
    "AccessedResourceLocations",
    "Action",
    "AgentName",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
/// Written by earlier releases of the collector scripts.
const LEGACY_TIMESTAMP_FORMAT: &str = "%d-%b-%Y %H:%M:%S";

const COL_TIMESTAMP: usize = 0;
const COL_USER: usize = 1;
const COL_RESOURCES: usize = 5;
const COL_ACTION: usize = 7;

/// Appends events to `Copilot_Events.csv` and keeps the committed watermark in
/// `Copilot_Events.state.json`, both inside the output directory.
#[derive(Debug, Clone)]
pub struct CsvEventSink {
    events_path: PathBuf,
    state: WatermarkFile,
}

impl CsvEventSink {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            events_path: output_dir.join(EVENTS_FILE),
            state: WatermarkFile::new(output_dir.join(STATE_FILE)),
        }
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn state_path(&self) -> &Path {
        self.state.path()
    }

    /// Drop a trailing row left half-written by an interrupted append, so the
    /// next append starts on a fresh line.
    fn repair_partial_row(&self) -> Result<(), SinkError> {
        let bytes = fs::read(&self.events_path).map_err(|e| SinkError::io(&self.events_path, e))?;
        if bytes.is_empty() || bytes.ends_with(b"\n") {
            return Ok(());
        }

        let keep = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        tracing::warn!(
            path = %self.events_path.display(),
            dropped_bytes = bytes.len() - keep,
            "Removing partially written row from events file"
        );

        let file = OpenOptions::new()
            .write(true)
            .open(&self.events_path)
            .map_err(|e| SinkError::io(&self.events_path, e))?;
        file.set_len(keep as u64)
            .and_then(|_| file.sync_all())
            .map_err(|e| SinkError::io(&self.events_path, e))
    }

    /// Dedup keys and the newest timestamp of every readable row.
    fn read_existing(&self) -> Result<(Option<DateTime<Utc>>, HashSet<EventKey>), SinkError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.events_path)?;

        let mut keys = HashSet::new();
        let mut newest: Option<DateTime<Utc>> = None;

        for (index, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(row = index + 1, error = %e, "Skipping unreadable events row");
                    continue;
                }
            };

            if record.len() < EVENT_HEADER.len() {
                tracing::warn!(
                    row = index + 1,
                    fields = record.len(),
                    "Skipping events row with missing columns"
                );
                continue;
            }

            let Some(timestamp) = parse_stored_timestamp(&record[COL_TIMESTAMP]) else {
                tracing::warn!(
                    row = index + 1,
                    value = &record[COL_TIMESTAMP],
                    "Skipping events row with unparseable timestamp"
                );
                continue;
            };

            let primary = primary_of_list(&record[COL_RESOURCES]);
            keys.insert(EventKey::new(
                timestamp,
                &record[COL_USER],
                &record[COL_ACTION],
                &primary,
            ));
            newest = newest.max(Some(timestamp));
        }

        Ok((newest, keys))
    }

    fn write_batch(&self, events: &[Event]) -> Result<(), SinkError> {
        if let Some(parent) = self.events_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .map_err(|e| SinkError::io(&self.events_path, e))?;
        let original_len = file
            .metadata()
            .map_err(|e| SinkError::io(&self.events_path, e))?
            .len();

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if original_len == 0 {
            writer.write_record(EVENT_HEADER)?;
        }
        for event in events {
            writer.write_record(event_to_record(event))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| SinkError::io(&self.events_path, e.into_error()))?;

        if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
            // Roll back whatever part of the batch reached the file
            if let Err(truncate_err) = file.set_len(original_len) {
                tracing::error!(
                    path = %self.events_path.display(),
                    error = %truncate_err,
                    "Failed to roll back partial append"
                );
            }
            return Err(SinkError::io(&self.events_path, e));
        }

        Ok(())
    }
}

#[async_trait]
impl EventSink for CsvEventSink {
    async fn load_state(&self) -> Result<SinkState, SinkError> {
        if !self.events_path.exists() {
            if self.state.path().exists() {
                tracing::warn!(
                    path = %self.state.path().display(),
                    "Events file is missing, ignoring stored watermark"
                );
            }
            return Ok(SinkState::default());
        }

        self.repair_partial_row()?;
        let (newest, keys) = self.read_existing()?;

        let watermark = match self.state.load()? {
            Some(committed) => Some(committed),
            None => {
                if let Some(newest) = newest {
                    tracing::info!(
                        newest = %newest,
                        "No committed watermark, resuming from newest stored event"
                    );
                }
                newest
            }
        };

        tracing::info!(
            path = %self.events_path.display(),
            existing_events = keys.len(),
            watermark = ?watermark,
            "Loaded event sink state"
        );

        Ok(SinkState { watermark, keys })
    }

    async fn append(&self, events: &[Event]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }

        self.write_batch(events)?;
        tracing::debug!(count = events.len(), "Appended events");
        Ok(())
    }

    async fn commit_watermark(&self, watermark: DateTime<Utc>) -> Result<(), SinkError> {
        // A watermark without an events file is ignored on load
        if !self.events_path.exists() {
            self.write_batch(&[])?;
        }

        if let Some(current) = self.state.load()? {
            if watermark < current {
                return Err(SinkError::WatermarkRegression {
                    current,
                    requested: watermark,
                });
            }
        }

        self.state.store(watermark)
    }
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// ISO-8601 as written today, or the legacy `dd-Mon-yyyy HH:MM:SS` form.
pub fn parse_stored_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT)
                .ok()
                .map(|dt| dt.and_utc())
        })
}

fn event_to_record(event: &Event) -> [String; 9] {
    [
        format_timestamp(&event.timestamp),
        event.user.clone(),
        event.app.clone(),
        event.location.clone(),
        event.app_context.clone(),
        event.accessed_resources.join(LIST_DELIMITER),
        event.accessed_resource_locations.join(LIST_DELIMITER),
        event.action.clone(),
        event.agent_name.clone(),
    ]
}
