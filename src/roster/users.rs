use super::graph::GraphClient;
use crate::api::ApiError;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const USERS_FILE: &str = "Copilot_Users.csv";

const USER_SELECT_FIELDS: &str =
    "id,displayName,userPrincipalName,jobTitle,department,city,country,usageLocation,assignedLicenses";
const USERS_FILTER: &str = "jobTitle ne null";
const PAGE_SIZE: &str = "999";
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Graph request failed: {0}")]
    Api(#[from] ApiError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RosterError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        RosterError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub usage_location: Option<String>,
    #[serde(default)]
    pub assigned_licenses: Vec<AssignedLicense>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedLicense {
    #[serde(default)]
    pub sku_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manager {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
}

/// One row of `Copilot_Users.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRecord {
    #[serde(rename = "EntraID")]
    pub entra_id: String,
    pub display_name: String,
    pub user_principal_name: String,
    pub job_title: String,
    pub department: String,
    pub city: String,
    pub country: String,
    pub usage_location: String,
    pub manager_name: String,
    #[serde(rename = "ManagerUPN")]
    pub manager_upn: String,
    #[serde(serialize_with = "serialize_flag")]
    pub has_copilot_license: bool,
}

/// Existing reports read the flag as `True`/`False`.
fn serialize_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "True" } else { "False" })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterReport {
    pub users: usize,
    pub licensed: usize,
}

/// Exports every user with a job title, their manager and whether they hold a
/// Copilot license.
pub struct RosterCollector {
    graph: GraphClient,
    sku_ids: HashSet<String>,
    output_path: PathBuf,
}

impl RosterCollector {
    pub fn new(graph: GraphClient, sku_ids: &[String], output_dir: &Path) -> Self {
        Self {
            graph,
            sku_ids: sku_ids.iter().map(|s| s.trim().to_ascii_lowercase()).collect(),
            output_path: output_dir.join(USERS_FILE),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub async fn collect(&self) -> Result<RosterReport, RosterError> {
        info!("Fetching users from Microsoft Graph");
        let url = self.graph.url(
            "/users",
            &[
                ("$filter", USERS_FILTER),
                ("$select", USER_SELECT_FIELDS),
                ("$top", PAGE_SIZE),
            ],
        )?;
        let users: Vec<GraphUser> = self.graph.get_all_pages(&url).await?;
        info!(users = users.len(), "Retrieved users with job titles");

        let mut records = Vec::with_capacity(users.len());
        for (index, user) in users.iter().enumerate() {
            if (index + 1) % PROGRESS_EVERY == 0 {
                info!(processed = index + 1, total = users.len(), "Processing users");
            }
            let manager = self.lookup_manager(user).await;
            records.push(self.to_record(user, manager));
        }

        write_roster(&self.output_path, &records)?;

        let report = RosterReport {
            users: records.len(),
            licensed: records.iter().filter(|r| r.has_copilot_license).count(),
        };
        info!(
            path = %self.output_path.display(),
            users = report.users,
            licensed = report.licensed,
            "Exported user roster"
        );
        Ok(report)
    }

    async fn lookup_manager(&self, user: &GraphUser) -> Option<Manager> {
        let url = match self.graph.url(&format!("/users/{}/manager", user.id), &[]) {
            Ok(url) => url,
            Err(e) => {
                debug!(user = %user.id, error = %e, "Could not build manager URL");
                return None;
            }
        };

        match self.graph.get_optional::<Manager>(&url).await {
            Ok(manager) => manager,
            Err(e) => {
                debug!(
                    user = user.user_principal_name.as_deref().unwrap_or(&user.id),
                    error = %e,
                    "Could not retrieve manager"
                );
                None
            }
        }
    }

    fn has_copilot_license(&self, user: &GraphUser) -> bool {
        user.assigned_licenses.iter().any(|license| {
            license
                .sku_id
                .as_deref()
                .is_some_and(|sku| self.sku_ids.contains(&sku.to_ascii_lowercase()))
        })
    }

    fn to_record(&self, user: &GraphUser, manager: Option<Manager>) -> UserRecord {
        let manager = manager.unwrap_or_default();
        UserRecord {
            entra_id: user.id.clone(),
            display_name: user.display_name.clone().unwrap_or_default(),
            user_principal_name: user.user_principal_name.clone().unwrap_or_default(),
            job_title: user.job_title.clone().unwrap_or_default(),
            department: user.department.clone().unwrap_or_default(),
            city: user.city.clone().unwrap_or_default(),
            country: user.country.clone().unwrap_or_default(),
            usage_location: user.usage_location.clone().unwrap_or_default(),
            manager_name: manager.display_name.unwrap_or_default(),
            manager_upn: manager.user_principal_name.unwrap_or_default(),
            has_copilot_license: self.has_copilot_license(user),
        }
    }
}

/// Replace `path` with the given rows, header first.
pub fn write_roster(path: &Path, records: &[UserRecord]) -> Result<(), RosterError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RosterError::io(parent, e))?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp_path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(|e| RosterError::io(&tmp_path, e))?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|e| RosterError::io(path, e))
}
