//! Service configuration for studio-server
//!
//! Built from the layered sources in `studio_common::config` with compiled
//! defaults for everything left unset.

use std::path::PathBuf;
use studio_common::config::TomlConfig;

/// Fully-resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub bind_host: String,
    pub bind_port: u16,

    /// Public base URL used to build magic-link URLs
    pub public_base_url: String,

    pub sender_email: String,
    pub admin_email: String,

    /// Optional HTTP email gateway; unset means log-only delivery
    pub mail_gateway_url: Option<String>,
    pub mail_gateway_token: Option<String>,

    pub magic_link_ttl_hours: i64,
    pub signer_session_ttl_minutes: i64,
    pub otp_ttl_minutes: i64,
    pub require_otp: bool,

    /// First signer decline terminates the whole envelope when true
    pub envelope_decline_terminates: bool,

    /// Send expiring reminders this many hours before the deadline
    pub reminder_window_hours: i64,

    /// Interval of the expiry and webhook-retry background sweeps
    pub sweep_interval_secs: u64,

    pub webhook_backoff_base_secs: i64,
    pub webhook_default_timeout_ms: u64,
    pub webhook_default_max_attempts: i64,
}

impl ServiceConfig {
    /// Resolve the final configuration from a parsed TOML file and the data
    /// folder chosen by the caller.
    pub fn from_toml(toml: &TomlConfig, data_dir: PathBuf) -> Self {
        let bind_host = toml
            .bind_host
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = toml.bind_port.unwrap_or(5820);

        ServiceConfig {
            public_base_url: toml
                .public_base_url
                .clone()
                .unwrap_or_else(|| format!("http://{}:{}", bind_host, bind_port)),
            bind_host,
            bind_port,
            sender_email: toml
                .sender_email
                .clone()
                .unwrap_or_else(|| "contracts@studio.local".to_string()),
            admin_email: toml
                .admin_email
                .clone()
                .unwrap_or_else(|| "admin@studio.local".to_string()),
            mail_gateway_url: toml.mail_gateway_url.clone(),
            mail_gateway_token: toml.mail_gateway_token.clone(),
            magic_link_ttl_hours: toml.magic_link_ttl_hours.unwrap_or(72),
            signer_session_ttl_minutes: toml.signer_session_ttl_minutes.unwrap_or(60),
            otp_ttl_minutes: toml.otp_ttl_minutes.unwrap_or(10),
            require_otp: toml.require_otp.unwrap_or(false),
            envelope_decline_terminates: toml.envelope_decline_terminates.unwrap_or(true),
            reminder_window_hours: toml.reminder_window_hours.unwrap_or(24),
            sweep_interval_secs: toml.sweep_interval_secs.unwrap_or(60),
            webhook_backoff_base_secs: toml.webhook_backoff_base_secs.unwrap_or(30),
            webhook_default_timeout_ms: toml.webhook_default_timeout_ms.unwrap_or(10_000),
            webhook_default_max_attempts: toml.webhook_default_max_attempts.unwrap_or(5),
            data_dir,
        }
    }

    /// Directory holding rendered and signed PDF artifacts
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// SQLite database path inside the data folder
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("studio.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_for_empty_toml() {
        let config = ServiceConfig::from_toml(&TomlConfig::default(), PathBuf::from("/tmp/sd"));
        assert_eq!(config.bind_port, 5820);
        assert_eq!(config.magic_link_ttl_hours, 72);
        assert_eq!(config.signer_session_ttl_minutes, 60);
        assert!(!config.require_otp);
        assert!(config.envelope_decline_terminates);
        assert_eq!(config.public_base_url, "http://127.0.0.1:5820");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/sd/studio.db"));
    }

    #[test]
    fn toml_values_override_defaults() {
        let toml = TomlConfig {
            bind_port: Some(9000),
            public_base_url: Some("https://studio.example.com".into()),
            magic_link_ttl_hours: Some(24),
            require_otp: Some(true),
            ..Default::default()
        };
        let config = ServiceConfig::from_toml(&toml, PathBuf::from("/tmp/sd"));
        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.public_base_url, "https://studio.example.com");
        assert_eq!(config.magic_link_ttl_hours, 24);
        assert!(config.require_otp);
    }
}
