pub mod engine;

pub use engine::{IncompleteWindow, SyncEngine, SyncError, SyncReport, SyncSettings, WindowError};
