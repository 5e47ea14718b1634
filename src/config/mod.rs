use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    /// Comma-separated keys accepted on the internal dispatch surface.
    #[serde(default)]
    pub internal_api_keys: String,

    #[serde(default)]
    pub sendgrid_api_key: Option<String>,
    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,
    #[serde(default)]
    pub sendgrid_from_email: Option<String>,
    #[serde(default = "default_sendgrid_from_name")]
    pub sendgrid_from_name: String,

    #[serde(default)]
    pub fcm_project_id: Option<String>,
    #[serde(default)]
    pub fcm_access_token: Option<String>,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,

    /// Comma-separated browser origins allowed by CORS.
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,

    #[serde(default = "default_ws_mailbox_capacity")]
    pub ws_mailbox_capacity: usize,
    /// Records older than this many days are purged hourly; 0 disables the sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub telemetry_enabled: bool,
    #[serde(default = "default_telemetry_service_name")]
    pub telemetry_service_name: String,
    #[serde(default = "default_telemetry_service_version")]
    pub telemetry_service_version: String,
    #[serde(default = "default_telemetry_environment")]
    pub telemetry_environment: String,
    #[serde(default = "default_telemetry_otlp_endpoint")]
    pub telemetry_otlp_endpoint: String,
}

fn default_server_port() -> u16 {
    5003
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_sendgrid_from_name() -> String {
    "Notifier".to_string()
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_cors_allowed_origins() -> String {
    "http://localhost:3000,http://localhost:5001".to_string()
}

fn default_ws_mailbox_capacity() -> usize {
    256
}

fn default_retention_days() -> u32 {
    90
}

fn default_telemetry_service_name() -> String {
    "notifier".to_string()
}

fn default_telemetry_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_telemetry_environment() -> String {
    "production".to_string()
}

fn default_telemetry_otlp_endpoint() -> String {
    "http://otel-collector.observability.svc.cluster.local:4317".to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("database_max_connections", 5)?
            .add_source(Environment::default())
            .build()?
            .try_deserialize()
    }

    pub fn api_keys(&self) -> Vec<String> {
        split_list(&self.internal_api_keys)
    }

    pub fn cors_origins(&self) -> Vec<String> {
        split_list(&self.cors_allowed_origins)
    }

    /// `(api_key, from_email)` when email delivery is configured.
    pub fn sendgrid(&self) -> Option<(&str, &str)> {
        non_empty(&self.sendgrid_api_key).zip(non_empty(&self.sendgrid_from_email))
    }

    /// `(project_id, access_token)` when push delivery is configured.
    pub fn fcm(&self) -> Option<(&str, &str)> {
        non_empty(&self.fcm_project_id).zip(non_empty(&self.fcm_access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let mut builder = Config::builder().set_default("database_max_connections", 5).unwrap();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("database_url", "postgres://localhost/db"), ("jwt_secret", "s")]);

        assert_eq!(config.server_port, 5003);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.ws_mailbox_capacity, 256);
        assert_eq!(config.retention_days, 90);
        assert!(config.api_keys().is_empty());
        assert_eq!(
            config.cors_origins(),
            vec!["http://localhost:3000".to_string(), "http://localhost:5001".to_string()]
        );
        assert!(config.sendgrid().is_none());
        assert!(config.fcm().is_none());
    }

    #[test]
    fn test_api_keys_split_and_trimmed() {
        let config = config_from(&[
            ("database_url", "postgres://localhost/db"),
            ("jwt_secret", "s"),
            ("internal_api_keys", " key-a, ,key-b "),
        ]);

        assert_eq!(config.api_keys(), vec!["key-a".to_string(), "key-b".to_string()]);
    }

    #[test]
    fn test_provider_requires_all_settings() {
        let config = config_from(&[
            ("database_url", "postgres://localhost/db"),
            ("jwt_secret", "s"),
            ("sendgrid_api_key", "sg"),
            ("fcm_project_id", "proj"),
            ("fcm_access_token", "tok"),
        ]);

        assert!(config.sendgrid().is_none());
        assert_eq!(config.fcm(), Some(("proj", "tok")));
    }
}
