use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const ENV_CLOUD: &str = "AZURE_CLOUD";
pub const ENV_LOOKBACK_DAYS: &str = "AUDIT_LOOKBACK_DAYS";
pub const ENV_INTERVAL_MINUTES: &str = "AUDIT_INTERVAL_MINUTES";
pub const ENV_OUTPUT_DIR: &str = "AUDIT_OUTPUT_DIR";
pub const ENV_SKU_IDS: &str = "COPILOT_SKU_IDS";

/// Load config from the process environment, layered over the YAML file when
/// one is given.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] but with an explicit environment lookup, so callers
/// (and tests) control which variables are visible.
pub fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => parse_config_file(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, &env)?;

    config.output.dir = expand_tilde(&config.output.dir);

    validate_config(&config)?;

    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    // An empty file is a valid "all defaults" config
    if yaml_string.trim().is_empty() {
        return Ok(Config::default());
    }

    serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid");
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Environment variables override values from the config file.
fn apply_env_overrides<F>(config: &mut Config, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(tenant_id) = get(ENV_TENANT_ID) {
        config.tenant.tenant_id = tenant_id;
    }
    if let Some(client_id) = get(ENV_CLIENT_ID) {
        config.tenant.client_id = client_id;
    }
    if let Some(secret) = get(ENV_CLIENT_SECRET) {
        config.tenant.client_secret = Some(SecretString::new(secret));
    }
    if let Some(cloud) = get(ENV_CLOUD) {
        config.tenant.cloud = cloud
            .parse()
            .map_err(|e: String| ConfigError::Validation(format!("{}: {}", ENV_CLOUD, e)))?;
    }
    if let Some(days) = get(ENV_LOOKBACK_DAYS) {
        config.sync.lookback_days = parse_env_number(ENV_LOOKBACK_DAYS, &days)?;
    }
    if let Some(minutes) = get(ENV_INTERVAL_MINUTES) {
        config.sync.max_window_minutes = parse_env_number(ENV_INTERVAL_MINUTES, &minutes)?;
    }
    if let Some(dir) = get(ENV_OUTPUT_DIR) {
        config.output.dir = dir.into();
    }
    if let Some(skus) = get(ENV_SKU_IDS) {
        config.roster.copilot_sku_ids = skus
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    Ok(())
}

fn parse_env_number(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| {
        ConfigError::Validation(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.tenant.tenant_id.is_empty() {
        errors.push(format!("tenant.tenant_id is required (or set {})", ENV_TENANT_ID));
    }
    if config.tenant.client_id.is_empty() {
        errors.push(format!("tenant.client_id is required (or set {})", ENV_CLIENT_ID));
    }
    let has_secret = config
        .tenant
        .client_secret
        .as_ref()
        .is_some_and(|s| !s.expose_secret().is_empty());
    if !has_secret {
        errors.push(format!(
            "tenant.client_secret is required (or set {})",
            ENV_CLIENT_SECRET
        ));
    }

    if config.sync.lookback_days == 0 || config.sync.lookback_days > MAX_LOOKBACK_DAYS {
        errors.push(format!(
            "sync.lookback_days must be between 1 and {}, got {}",
            MAX_LOOKBACK_DAYS, config.sync.lookback_days
        ));
    }
    if config.sync.max_window_minutes == 0 || config.sync.max_window_minutes > MAX_WINDOW_MINUTES_LIMIT {
        errors.push(format!(
            "sync.max_window_minutes must be between 1 and {}, got {}",
            MAX_WINDOW_MINUTES_LIMIT, config.sync.max_window_minutes
        ));
    }
    if config.sync.record_types.is_empty() {
        errors.push("sync.record_types must contain at least one record type".to_string());
    }

    if config.http.max_attempts == 0 {
        errors.push("http.max_attempts must be at least 1".to_string());
    }
    if config.http.timeout.is_zero() {
        errors.push("http.timeout must be greater than zero".to_string());
    }
    if config.http.initial_backoff > config.http.max_backoff {
        errors.push("http.initial_backoff must not exceed http.max_backoff".to_string());
    }

    for (name, value) in [
        ("endpoints.login", &config.endpoints.login),
        ("endpoints.graph", &config.endpoints.graph),
        ("endpoints.management", &config.endpoints.management),
    ] {
        if let Some(url) = value {
            if reqwest::Url::parse(url).is_err() {
                errors.push(format!("{}: invalid URL '{}'", name, url));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn credentials() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_TENANT_ID, "tenant-123"),
            (ENV_CLIENT_ID, "client-456"),
            (ENV_CLIENT_SECRET, "s3cret"),
        ]
    }

    #[test]
    fn test_env_only_config_uses_defaults() {
        let config = load_config_with_env(None, env_from(&credentials())).unwrap();

        assert_eq!(config.tenant.tenant_id, "tenant-123");
        assert_eq!(config.tenant.client_id, "client-456");
        assert_eq!(config.sync.lookback_days, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(config.sync.max_window_minutes, DEFAULT_MAX_WINDOW_MINUTES);
        assert_eq!(config.sync.record_types, vec![COPILOT_INTERACTION_RECORD_TYPE]);
        assert_eq!(config.roster.copilot_sku_ids, vec![DEFAULT_COPILOT_SKU_ID.to_string()]);
        assert_eq!(config.http.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_credentials_are_all_reported() {
        let err = load_config_with_env(None, env_from(&[])).unwrap_err();
        match err {
            ConfigError::ValidationList(errors) => {
                assert_eq!(errors.len(), 3);
                assert!(errors[0].contains("tenant_id"));
                assert!(errors[2].contains("client_secret"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides_sync_settings() {
        let mut pairs = credentials();
        pairs.push((ENV_LOOKBACK_DAYS, "2"));
        pairs.push((ENV_INTERVAL_MINUTES, "60"));
        pairs.push((ENV_SKU_IDS, " sku-a, ,SKU-B "));
        pairs.push((ENV_CLOUD, "gcc_high"));

        let config = load_config_with_env(None, env_from(&pairs)).unwrap();
        assert_eq!(config.sync.lookback_days, 2);
        assert_eq!(config.sync.max_window_minutes, 60);
        assert_eq!(config.roster.copilot_sku_ids, vec!["sku-a", "SKU-B"]);
        assert_eq!(config.tenant.cloud, CloudEnvironment::GccHigh);
    }

    #[test]
    fn test_non_numeric_lookback_is_rejected() {
        let mut pairs = credentials();
        pairs.push((ENV_LOOKBACK_DAYS, "ninety"));

        let err = load_config_with_env(None, env_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains(ENV_LOOKBACK_DAYS));
    }

    #[test]
    fn test_lookback_beyond_limit_is_rejected() {
        let mut pairs = credentials();
        pairs.push((ENV_LOOKBACK_DAYS, "4000000000"));

        let err = load_config_with_env(None, env_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("lookback_days"));

        let mut pairs = credentials();
        pairs.push((ENV_LOOKBACK_DAYS, "3650"));
        let config = load_config_with_env(None, env_from(&pairs)).unwrap();
        assert_eq!(config.sync.lookback_days, MAX_LOOKBACK_DAYS);
    }

    #[test]
    fn test_window_over_provider_limit_is_rejected() {
        let mut pairs = credentials();
        pairs.push((ENV_INTERVAL_MINUTES, "2880"));

        let err = load_config_with_env(None, env_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("max_window_minutes"));
    }

    #[test]
    fn test_yaml_file_with_env_override() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");
        std::fs::write(
            &config_path,
            r#"
tenant:
  tenant_id: file-tenant
  client_id: file-client
  client_secret: file-secret
  cloud: gcc
sync:
  lookback_days: 7
  max_window_minutes: 720
http:
  timeout: 10s
  max_attempts: 3
output:
  dir: /tmp/copilot-out
"#,
        )
        .unwrap();

        let config = load_config_with_env(
            Some(&config_path),
            env_from(&[(ENV_TENANT_ID, "env-tenant")]),
        )
        .unwrap();

        assert_eq!(config.tenant.tenant_id, "env-tenant");
        assert_eq!(config.tenant.client_id, "file-client");
        assert_eq!(config.tenant.cloud, CloudEnvironment::Gcc);
        assert_eq!(config.sync.lookback_days, 7);
        assert_eq!(config.sync.max_window_minutes, 720);
        assert_eq!(config.http.timeout, Duration::from_secs(10));
        assert_eq!(config.http.max_attempts, 3);
        assert_eq!(config.output.dir, std::path::PathBuf::from("/tmp/copilot-out"));
        assert_eq!(config.management_endpoint(), "https://manage-gcc.office.com");
    }

    #[test]
    fn test_unset_env_reference_in_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");
        std::fs::write(
            &config_path,
            "tenant:\n  client_secret: $env{COPILOT_AUDIT_TEST_UNSET_SECRET}\n",
        )
        .unwrap();

        let err = load_config_with_env(Some(&config_path), env_from(&credentials())).unwrap_err();
        assert!(err.to_string().contains("COPILOT_AUDIT_TEST_UNSET_SECRET"));
    }

    #[test]
    fn test_invalid_endpoint_override() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");
        std::fs::write(&config_path, "endpoints:\n  management: not a url\n").unwrap();

        let err = load_config_with_env(Some(&config_path), env_from(&credentials())).unwrap_err();
        assert!(err.to_string().contains("endpoints.management"));
    }
}
