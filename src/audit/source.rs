use super::record::{ContentBlobRef, RawAuditRecord};
use super::window::FetchWindow;
use crate::api::ApiError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy, finite, non-restartable listing of the blobs available for a window.
pub type BlobStream<'a> = BoxStream<'a, Result<ContentBlobRef, ApiError>>;

/// Where the sync engine gets raw audit records from.
#[async_trait]
pub trait AuditSource: Send + Sync {
    /// List content blobs for `window`, following continuation tokens as the
    /// stream is polled. Retries are applied per page; an `Err` item ends the
    /// listing for this window.
    fn list(&self, window: FetchWindow) -> BlobStream<'_>;

    /// Download and decode one blob. Retried independently of its siblings.
    async fn fetch(&self, blob: &ContentBlobRef) -> Result<Vec<RawAuditRecord>, ApiError>;
}
