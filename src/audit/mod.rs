pub mod client;
pub mod normalize;
pub mod record;
pub mod source;
pub mod window;

pub use client::ManagementClient;
pub use normalize::{NormalizeError, Normalizer};
pub use record::{ContentBlobRef, RawAuditRecord};
pub use source::{AuditSource, BlobStream};
pub use window::{plan_windows, FetchWindow};
