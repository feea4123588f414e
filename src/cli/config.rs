use crate::config::generate::generate_starter_config;
use crate::config::{load_config, user_config_path};
use std::fs;
use std::path::{Path, PathBuf};

const SYSTEM_CONFIG_PATH: &str = "/etc/copilot-audit/config.yml";

/// Write a commented starter config, or print it with `stdout`.
pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Prefer ~/.config/copilot-audit/config.yml, fall back to /etc
    let config_path = user_config_path()
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));

    write_new_file(&config_path, &config_content)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

fn write_new_file(path: &Path, contents: &str) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Load and validate the effective configuration, printing a short summary.
pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    match config_path {
        Some(path) => println!("Config OK: {}", path.display()),
        None => println!("Config OK (environment only)"),
    }
    println!("  tenant:       {}", config.tenant.tenant_id);
    println!("  cloud:        {:?}", config.tenant.cloud);
    println!("  lookback:     {} days", config.sync.lookback_days);
    println!("  window:       {} minutes", config.sync.max_window_minutes);
    println!("  output:       {}", config.output.dir.display());
    Ok(())
}
