use crate::api::ApiError;
use crate::audit::{ManagementClient, Normalizer};
use crate::auth::{AuthError, ClientCredentialsProvider, TokenProvider};
use crate::config::types::Config;
use crate::roster::{GraphClient, RosterCollector, RosterError, RosterReport};
use crate::sink::CsvEventSink;
use crate::sync::{SyncEngine, SyncError, SyncReport, SyncSettings};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("authentication setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("API client error: {0}")]
    Api(#[from] ApiError),

    #[error("event sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("user roster export failed: {0}")]
    Roster(#[from] RosterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} of the requested exports did not complete")]
    Failed(usize),
}

/// Which exports a run performs. Both by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub users_only: bool,
    pub events_only: bool,
}

/// Run the roster export and the event sync. Each is attempted even when the
/// other fails; any failure, including a sync that stopped at an incomplete
/// window, makes the run an error.
pub async fn run(config: &Config, options: RunOptions) -> Result<(), RunError> {
    std::fs::create_dir_all(&config.output.dir)?;
    let tokens: Arc<dyn TokenProvider> = Arc::new(ClientCredentialsProvider::from_config(config)?);
    let mut failures = 0;

    if !options.events_only {
        info!("Retrieving user data");
        if let Err(e) = export_roster(config, tokens.clone()).await {
            error!(error = %e, "Failed to retrieve user data");
            failures += 1;
        }
    }

    if !options.users_only {
        info!("Retrieving Copilot events");
        match sync_events(config, tokens.clone(), Utc::now()).await {
            Ok(report) if report.is_complete() => {}
            Ok(_) => failures += 1,
            Err(e) => {
                error!(error = %e, "Failed to retrieve event data");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        error!(failures = failures, "Run completed with errors");
        return Err(RunError::Failed(failures));
    }

    info!("Run completed successfully");
    Ok(())
}

pub async fn export_roster(
    config: &Config,
    tokens: Arc<dyn TokenProvider>,
) -> Result<RosterReport, RunError> {
    let graph = GraphClient::new(config, tokens)?;
    let collector = RosterCollector::new(graph, &config.roster.copilot_sku_ids, &config.output.dir);
    Ok(collector.collect().await?)
}

/// Sync Copilot events up to `now` into the CSV sink in the output directory.
pub async fn sync_events(
    config: &Config,
    tokens: Arc<dyn TokenProvider>,
    now: DateTime<Utc>,
) -> Result<SyncReport, RunError> {
    let client = ManagementClient::new(config, tokens)?;
    if config.sync.subscribe {
        // Listing reports the real error if the subscription is unusable
        if let Err(e) = client.ensure_subscription().await {
            warn!(error = %e, "Could not start audit subscription");
        }
    }

    let sink = CsvEventSink::new(&config.output.dir);
    let engine = SyncEngine::new(
        Arc::new(client),
        Arc::new(sink),
        Normalizer::new(config.sync.record_types.iter().copied()),
        SyncSettings::from(&config.sync),
    );

    info!(output_dir = %config.output.dir.display(), "BEGIN: retrieving Copilot audit events");
    let report = engine.sync(now).await?;

    match &report.incomplete {
        None => info!(
            events = report.events.len(),
            windows = report.windows_completed,
            duplicates = report.duplicates_skipped,
            skipped = report.records_skipped,
            watermark = ?report.watermark,
            "END: retrieved Copilot audit events"
        ),
        Some(incomplete) => error!(
            events = report.events.len(),
            windows = report.windows_completed,
            window = %incomplete.window,
            error = %incomplete.error,
            watermark = ?report.watermark,
            "END: sync stopped before reaching the present, rerun to resume"
        ),
    }

    Ok(report)
}
