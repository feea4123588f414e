use crate::api::ApiError;
use crate::audit::{plan_windows, AuditSource, FetchWindow, Normalizer};
use crate::config::types::SyncConfig;
use crate::event::{Event, EventKey};
use crate::sink::{EventSink, SinkError};
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("lookback of {days} days reaches outside the supported time range")]
    LookbackOutOfRange { days: i64 },
}

/// Why a window could not be completed. The window is retried on the next run.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("listing content failed: {0}")]
    Listing(#[source] ApiError),

    #[error("{failed} of {total} content blobs could not be fetched, last error: {last}")]
    Blobs {
        failed: usize,
        total: usize,
        #[source]
        last: ApiError,
    },
}

#[derive(Debug)]
pub struct IncompleteWindow {
    pub window: FetchWindow,
    pub error: WindowError,
}

/// Outcome of one sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub previous_watermark: Option<DateTime<Utc>>,
    pub watermark: Option<DateTime<Utc>>,
    pub windows_completed: usize,
    /// Events appended during this run, in append order.
    pub events: Vec<Event>,
    pub records_skipped: usize,
    pub duplicates_skipped: usize,
    pub incomplete: Option<IncompleteWindow>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// How far back to start when no watermark exists.
    pub lookback: Duration,
    pub max_window: Duration,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            lookback: Duration::days(i64::from(config.lookback_days)),
            max_window: Duration::minutes(i64::from(config.max_window_minutes)),
        }
    }
}

/// Events accepted from one window, not yet persisted.
#[derive(Debug, Default)]
struct WindowBatch {
    events: Vec<Event>,
    records_skipped: usize,
    duplicates_skipped: usize,
}

/// Moves Copilot audit events from an [`AuditSource`] into an [`EventSink`],
/// one window at a time, advancing the sink's watermark after each window.
pub struct SyncEngine {
    source: Arc<dyn AuditSource>,
    sink: Arc<dyn EventSink>,
    normalizer: Normalizer,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn AuditSource>,
        sink: Arc<dyn EventSink>,
        normalizer: Normalizer,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            sink,
            normalizer,
            settings,
        }
    }

    /// Fetch everything between the committed watermark and `now`.
    ///
    /// A window that cannot be fetched completely stops the run and is reported
    /// in [`SyncReport::incomplete`]; nothing from it is appended and the
    /// watermark stays at the end of the last completed window. Sink failures
    /// abort with [`SyncError`].
    pub async fn sync(&self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let state = self.sink.load_state().await?;
        let mut known = state.keys;

        let start = match state.watermark {
            Some(watermark) => watermark,
            None => now.checked_sub_signed(self.settings.lookback).ok_or(
                SyncError::LookbackOutOfRange {
                    days: self.settings.lookback.num_days(),
                },
            )?,
        };
        let windows = plan_windows(start, now, self.settings.max_window);

        let mut report = SyncReport {
            previous_watermark: state.watermark,
            watermark: state.watermark,
            ..SyncReport::default()
        };

        info!(
            start = %start,
            end = %now,
            windows = windows.len(),
            known_events = known.len(),
            "Starting audit sync"
        );

        for window in windows {
            let batch = match self.collect_window(window, &known).await {
                Ok(batch) => batch,
                Err(error) => {
                    warn!(window = %window, error = %error, "Window incomplete, stopping sync");
                    report.incomplete = Some(IncompleteWindow { window, error });
                    break;
                }
            };

            if !batch.events.is_empty() {
                self.sink.append(&batch.events).await?;
                known.extend(batch.events.iter().map(Event::key));
            }
            self.sink.commit_watermark(window.end).await?;

            info!(
                window = %window,
                events = batch.events.len(),
                duplicates = batch.duplicates_skipped,
                skipped = batch.records_skipped,
                "Window committed"
            );

            report.watermark = Some(window.end);
            report.windows_completed += 1;
            report.records_skipped += batch.records_skipped;
            report.duplicates_skipped += batch.duplicates_skipped;
            report.events.extend(batch.events);
        }

        Ok(report)
    }

    async fn collect_window(
        &self,
        window: FetchWindow,
        known: &HashSet<EventKey>,
    ) -> Result<WindowBatch, WindowError> {
        let mut batch = WindowBatch::default();
        let mut batch_keys = HashSet::new();
        let mut total = 0;
        let mut failed = 0;
        let mut last_error = None;

        let mut blobs = self.source.list(window);
        while let Some(item) = blobs.next().await {
            let blob = item.map_err(WindowError::Listing)?;
            total += 1;

            // Keep fetching siblings so one bad blob does not hide others' errors
            let records = match self.source.fetch(&blob).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(content_id = %blob.content_id, error = %e, "Failed to fetch content blob");
                    failed += 1;
                    last_error = Some(e);
                    continue;
                }
            };

            for record in &records {
                match self.normalizer.normalize(record) {
                    Ok(Some(event)) => {
                        let key = event.key();
                        if known.contains(&key) || !batch_keys.insert(key) {
                            batch.duplicates_skipped += 1;
                        } else {
                            batch.events.push(event);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            content_id = %blob.content_id,
                            record_id = record.id.as_deref().unwrap_or(""),
                            error = %e,
                            "Skipping malformed audit record"
                        );
                        batch.records_skipped += 1;
                    }
                }
            }
        }

        if let Some(last) = last_error {
            return Err(WindowError::Blobs {
                failed,
                total,
                last,
            });
        }

        batch.events.sort_by_key(|event| event.timestamp);
        debug!(window = %window, blobs = total, events = batch.events.len(), "Collected window");
        Ok(batch)
    }
}
