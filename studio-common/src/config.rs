//! Configuration loading and data folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the data folder (database + uploads)
pub const DATA_DIR_ENV: &str = "STUDIO_DATA_DIR";

/// Environment variable naming the TOML config file
pub const CONFIG_FILE_ENV: &str = "STUDIO_CONFIG";

/// Raw TOML config file contents. Every field is optional; the server
/// applies defaults for anything left unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub data_dir: Option<String>,
    pub bind_host: Option<String>,
    pub bind_port: Option<u16>,
    /// Public base URL used when building magic-link URLs
    pub public_base_url: Option<String>,
    pub sender_email: Option<String>,
    pub admin_email: Option<String>,
    /// Optional HTTP email gateway (SES-compatible relay)
    pub mail_gateway_url: Option<String>,
    pub mail_gateway_token: Option<String>,
    pub magic_link_ttl_hours: Option<i64>,
    pub signer_session_ttl_minutes: Option<i64>,
    pub otp_ttl_minutes: Option<i64>,
    pub require_otp: Option<bool>,
    pub envelope_decline_terminates: Option<bool>,
    pub reminder_window_hours: Option<i64>,
    pub sweep_interval_secs: Option<u64>,
    pub webhook_backoff_base_secs: Option<i64>,
    pub webhook_default_timeout_ms: Option<u64>,
    pub webhook_default_max_attempts: Option<i64>,
}

/// Load and parse a TOML config file.
///
/// A missing file is not an error: the server runs on defaults. A file that
/// exists but fails to parse is a hard configuration error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match std::env::var(CONFIG_FILE_ENV) {
            Ok(p) => PathBuf::from(p),
            Err(_) => return Ok(TomlConfig::default()),
        },
    };

    if !path.exists() {
        tracing::debug!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let contents = std::fs::read_to_string(&path)?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Resolve the data folder following the standard priority order.
pub fn resolve_data_dir(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.data_dir {
        return PathBuf::from(path);
    }

    // Priority 4: Compiled default
    PathBuf::from("./studio-data")
}

/// Create the data folder (and uploads subfolder) if missing.
pub fn ensure_data_dir(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(data_dir.join("uploads"))?;
    Ok(())
}
