use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;
/// Ten years. The provider keeps far less content than this.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;
pub const DEFAULT_MAX_WINDOW_MINUTES: u32 = 1440;
/// The Management Activity API rejects content listings spanning more than 24 hours.
pub const MAX_WINDOW_MINUTES_LIMIT: u32 = 1440;
/// CopilotInteraction
pub const COPILOT_INTERACTION_RECORD_TYPE: u32 = 91;
/// Microsoft 365 Copilot (commercial)
pub const DEFAULT_COPILOT_SKU_ID: &str = "639dec6b-bb19-468b-871c-c5c441c4b0cb";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tenant: TenantConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub endpoints: EndpointOverrides,
}

impl Config {
    pub fn login_endpoint(&self) -> String {
        self.endpoints
            .login
            .clone()
            .unwrap_or_else(|| self.tenant.cloud.login_endpoint().to_string())
    }

    pub fn graph_endpoint(&self) -> String {
        self.endpoints
            .graph
            .clone()
            .unwrap_or_else(|| self.tenant.cloud.graph_endpoint().to_string())
    }

    pub fn management_endpoint(&self) -> String {
        self.endpoints
            .management
            .clone()
            .unwrap_or_else(|| self.tenant.cloud.management_endpoint().to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    #[serde(default)]
    pub cloud: CloudEnvironment,
}

/// Microsoft 365 cloud the tenant lives in. Government clouds use separate
/// login, Graph, and Management Activity hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudEnvironment {
    #[default]
    Commercial,
    Gcc,
    GccHigh,
    Dod,
}

impl CloudEnvironment {
    pub fn login_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial | Self::Gcc => "https://login.microsoftonline.com",
            Self::GccHigh | Self::Dod => "https://login.microsoftonline.us",
        }
    }

    pub fn graph_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial | Self::Gcc => "https://graph.microsoft.com",
            Self::GccHigh => "https://graph.microsoft.us",
            Self::Dod => "https://dod-graph.microsoft.us",
        }
    }

    pub fn management_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial => "https://manage.office.com",
            Self::Gcc => "https://manage-gcc.office.com",
            Self::GccHigh => "https://manage.office365.us",
            Self::Dod => "https://manage.protection.apps.mil",
        }
    }
}

impl std::str::FromStr for CloudEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "commercial" => Ok(Self::Commercial),
            "gcc" => Ok(Self::Gcc),
            "gcc_high" | "gcchigh" => Ok(Self::GccHigh),
            "dod" => Ok(Self::Dod),
            other => Err(format!(
                "unknown cloud '{}', expected one of: commercial, gcc, gcc_high, dod",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_window_minutes")]
    pub max_window_minutes: u32,
    #[serde(default = "default_record_types")]
    pub record_types: Vec<u32>,
    /// Start the Audit.General subscription before listing content.
    #[serde(default = "default_subscribe")]
    pub subscribe: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_window_minutes: default_max_window_minutes(),
            record_types: default_record_types(),
            subscribe: default_subscribe(),
        }
    }
}

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_max_window_minutes() -> u32 {
    DEFAULT_MAX_WINDOW_MINUTES
}

fn default_record_types() -> Vec<u32> {
    vec![COPILOT_INTERACTION_RECORD_TYPE]
}

fn default_subscribe() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_copilot_sku_ids")]
    pub copilot_sku_ids: Vec<String>,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            copilot_sku_ids: default_copilot_sku_ids(),
        }
    }
}

fn default_copilot_sku_ids() -> Vec<String> {
    vec![DEFAULT_COPILOT_SKU_ID.to_string()]
}

/// Explicit base URLs, taking precedence over the cloud defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointOverrides {
    pub login: Option<String>,
    pub graph: Option<String>,
    pub management: Option<String>,
}
