use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level server configuration (loaded from deaddrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DropConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics endpoint (None disables the listener)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for drop storage
    pub root: PathBuf,
    /// Maximum upload size in MiB, enforced by the HTTP layer before Save
    pub max_upload_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Delete a drop after its first successful retrieval
    pub delete_after_retrieve: bool,
    /// Drops older than this are swept (0 disables the cleanup worker)
    pub max_age_hours: u64,
    /// Base interval between cleanup cycles (jitter is added per cycle)
    pub cleanup_interval_mins: u64,
    /// Multi-pass overwrite before removal
    pub secure_delete: bool,
    /// Total storage cap in GB (0 = unlimited)
    pub max_storage_gb: f64,
    /// Active drop count cap (0 = unlimited)
    pub max_drops: u64,
    /// Environment variable holding the master passphrase (empty = key files
    /// stay plaintext)
    pub master_key_env: String,
    pub honeypots_enabled: bool,
    pub honeypot_count: u32,
    /// Webhook URL for honeypot access alerts
    pub alert_webhook: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./drops"),
            max_upload_mb: 100,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            delete_after_retrieve: false,
            max_age_hours: 168, // 7 days
            cleanup_interval_mins: 60,
            secure_delete: true,
            max_storage_gb: 0.0,
            max_drops: 0,
            master_key_env: String::new(),
            honeypots_enabled: false,
            honeypot_count: 0,
            alert_webhook: None,
        }
    }
}

impl SecurityConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_mins * 60)
    }

    pub fn max_storage_bytes(&self) -> u64 {
        (self.max_storage_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }

    pub fn quota_configured(&self) -> bool {
        self.max_storage_gb > 0.0 || self.max_drops > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
metrics_addr = "127.0.0.1:9200"
log_level = "debug"
log_format = "json"

[storage]
root = "/var/lib/deaddrop"
max_upload_mb = 50

[security]
delete_after_retrieve = true
max_age_hours = 24
cleanup_interval_mins = 30
secure_delete = false
max_storage_gb = 2.5
max_drops = 1000
master_key_env = "DEADDROP_MASTER_KEY"
honeypots_enabled = true
honeypot_count = 5
alert_webhook = "https://alerts.example.com/hook"
"#;
        let config: DropConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.metrics_addr.as_deref(), Some("127.0.0.1:9200"));
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.storage.root, PathBuf::from("/var/lib/deaddrop"));
        assert_eq!(config.storage.max_upload_mb, 50);
        assert!(config.security.delete_after_retrieve);
        assert_eq!(config.security.max_age_hours, 24);
        assert!(!config.security.secure_delete);
        assert_eq!(config.security.max_drops, 1000);
        assert_eq!(config.security.master_key_env, "DEADDROP_MASTER_KEY");
        assert!(config.security.honeypots_enabled);
        assert_eq!(config.security.honeypot_count, 5);
    }

    #[test]
    fn test_parse_defaults() {
        let config: DropConfig = toml::from_str("").unwrap();

        assert_eq!(config.storage.root, PathBuf::from("./drops"));
        assert_eq!(config.storage.max_upload_mb, 100);
        assert_eq!(config.security.max_age_hours, 168);
        assert!(config.security.secure_delete);
        assert!(!config.security.delete_after_retrieve);
        assert_eq!(config.security.max_storage_gb, 0.0);
        assert!(!config.security.quota_configured());
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[security]
max_age_hours = 48
"#;
        let config: DropConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.security.max_age_hours, 48);
        // Defaults
        assert!(config.security.secure_delete);
        assert_eq!(config.storage.root, PathBuf::from("./drops"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = DropConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DropConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.security.max_age_hours, parsed.security.max_age_hours);
        assert_eq!(config.daemon.log_level, parsed.daemon.log_level);
    }

    #[test]
    fn test_duration_helpers() {
        let sec = SecurityConfig {
            max_age_hours: 2,
            cleanup_interval_mins: 15,
            max_storage_gb: 1.0,
            ..Default::default()
        };
        assert_eq!(sec.max_age(), Duration::from_secs(7200));
        assert_eq!(sec.cleanup_interval(), Duration::from_secs(900));
        assert_eq!(sec.max_storage_bytes(), 1024 * 1024 * 1024);
        assert!(sec.quota_configured());
    }
}
