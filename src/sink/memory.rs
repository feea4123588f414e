use super::traits::{EventSink, SinkError, SinkState};
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    events: Vec<Event>,
    watermark: Option<DateTime<Utc>>,
    fail_next_append: bool,
    fail_next_commit: bool,
}

/// Sink that keeps everything in memory. Used for dry runs and tests; failures
/// can be injected to simulate a crash between append and commit.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from events and a watermark persisted by an earlier run.
    pub fn with_state(events: Vec<Event>, watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events,
                watermark,
                ..Inner::default()
            }),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.lock().watermark
    }

    pub fn fail_next_append(&self) {
        self.lock().fail_next_append = true;
    }

    pub fn fail_next_commit(&self) {
        self.lock().fail_next_commit = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn load_state(&self) -> Result<SinkState, SinkError> {
        let inner = self.lock();
        Ok(SinkState {
            watermark: inner.watermark,
            keys: inner.events.iter().map(Event::key).collect(),
        })
    }

    async fn append(&self, events: &[Event]) -> Result<(), SinkError> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_append) {
            return Err(SinkError::Generic("injected append failure".to_string()));
        }
        inner.events.extend_from_slice(events);
        Ok(())
    }

    async fn commit_watermark(&self, watermark: DateTime<Utc>) -> Result<(), SinkError> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_commit) {
            return Err(SinkError::Generic("injected commit failure".to_string()));
        }
        if let Some(current) = inner.watermark {
            if watermark < current {
                return Err(SinkError::WatermarkRegression {
                    current,
                    requested: watermark,
                });
            }
        }
        inner.watermark = Some(watermark);
        Ok(())
    }
}
