//! User roster export from Microsoft Graph.

pub mod graph;
pub mod users;

pub use graph::GraphClient;
pub use users::{RosterCollector, RosterError, RosterReport, UserRecord};
