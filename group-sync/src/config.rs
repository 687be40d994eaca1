use crate::error::{GroupSyncError, GroupSyncResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGES: u32 = 10_000;
pub const DEFAULT_DIRECTORY_BASE_URL: &str = "https://admin.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSyncConfig {
    pub registry: RegistryConfig,
    pub directory: DirectoryConfig,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_retry_config")]
    pub retry: RetryConfig
}

/// Connection settings for the CI registry API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String
}

/// Connection settings for the Google Workspace Admin Directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub domain: String,
    /// Admin user the service account impersonates through domain-wide delegation.
    pub admin_email: String,
    /// Only directory groups whose name starts with this prefix are synced.
    pub group_prefix: String,
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_directory_base_url")]
    pub base_url: String
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_directory_base_url() -> String {
    DEFAULT_DIRECTORY_BASE_URL.to_string()
}

fn default_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff_ms: 500,
        max_backoff_ms: 10_000
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        default_retry_config()
    }
}

impl Default for GroupSyncConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig {
                base_url: String::new(),
                client_id: String::new(),
                client_secret: String::new()
            },
            directory: DirectoryConfig {
                domain: String::new(),
                admin_email: String::new(),
                group_prefix: String::new(),
                credentials_path: None,
                base_url: default_directory_base_url()
            },
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout_secs: default_request_timeout_secs(),
            dry_run: false,
            retry: default_retry_config()
        }
    }
}

impl GroupSyncConfig {
    /// Reads the configuration from the same environment variables the CLI
    /// flags fall back to.
    pub fn from_env() -> GroupSyncResult<Self> {
        let config = Self {
            registry: RegistryConfig {
                base_url: required_env("API_BASE_URL")?,
                client_id: required_env("CLIENT_ID")?,
                client_secret: required_env("CLIENT_SECRET")?
            },
            directory: DirectoryConfig {
                domain: required_env("GSUITE_DOMAIN")?,
                admin_email: required_env("GSUITE_ADMIN_EMAIL")?,
                group_prefix: required_env("GSUITE_GROUP_PREFIX")?,
                credentials_path: std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS")
                    .map(PathBuf::from),
                base_url: std::env::var("GSUITE_API_BASE_URL")
                    .unwrap_or_else(|_| default_directory_base_url())
            },
            concurrency: optional_env("SYNC_CONCURRENCY", parse_concurrency)?
                .unwrap_or(DEFAULT_CONCURRENCY),
            dry_run: optional_env("SYNC_DRY_RUN", parse_flag)?.unwrap_or(false),
            ..Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GroupSyncResult<()> {
        let required = [
            ("registry base url", &self.registry.base_url),
            ("client id", &self.registry.client_id),
            ("client secret", &self.registry.client_secret),
            ("gsuite domain", &self.directory.domain),
            ("gsuite admin email", &self.directory.admin_email),
            ("gsuite group prefix", &self.directory.group_prefix)
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(GroupSyncError::ConfigError(format!("{name} must not be empty")));
            }
        }

        if self.concurrency == 0 {
            return Err(GroupSyncError::ConfigError(
                "concurrency must be at least 1".to_string()
            ));
        }
        if self.page_size == 0 || self.max_pages == 0 {
            return Err(GroupSyncError::ConfigError(
                "page size and max pages must be at least 1".to_string()
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn required_env(name: &str) -> GroupSyncResult<String> {
    std::env::var(name).map_err(|_| GroupSyncError::ConfigError(format!("{name} not set")))
}

fn optional_env<T>(name: &str, parse: fn(&str) -> Option<T>) -> GroupSyncResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => parse(raw.trim())
            .map(Some)
            .ok_or_else(|| GroupSyncError::ConfigError(format!("{name} has invalid value '{raw}'"))),
        Err(_) => Ok(None)
    }
}

fn parse_concurrency(raw: &str) -> Option<usize> {
    raw.parse().ok()
}

/// Accepts the same spellings as the CLI's boolean flags.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [(&str, &str); 6] = [
        ("API_BASE_URL", "https://ci.example.com"),
        ("CLIENT_ID", "client"),
        ("CLIENT_SECRET", "secret"),
        ("GSUITE_DOMAIN", "example.com"),
        ("GSUITE_ADMIN_EMAIL", "admin@example.com"),
        ("GSUITE_GROUP_PREFIX", "eng-")
    ];

    fn set_vars() {
        for (k, v) in VARS {
            unsafe { std::env::set_var(k, v) };
        }
    }

    fn clear_vars() {
        for (k, _) in VARS {
            unsafe { std::env::remove_var(k) };
        }
        for k in ["SYNC_CONCURRENCY", "SYNC_DRY_RUN", "GSUITE_API_BASE_URL"] {
            unsafe { std::env::remove_var(k) };
        }
    }

    fn valid_config() -> GroupSyncConfig {
        let mut config = GroupSyncConfig::default();
        config.registry.base_url = "https://ci.example.com".to_string();
        config.registry.client_id = "client".to_string();
        config.registry.client_secret = "secret".to_string();
        config.directory.domain = "example.com".to_string();
        config.directory.admin_email = "admin@example.com".to_string();
        config.directory.group_prefix = "eng-".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = GroupSyncConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.max_retries, 3);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(GroupSyncError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let mut config = valid_config();
        config.directory.group_prefix = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gsuite group prefix"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let json = r#"{
            "registry": {"base_url": "https://ci", "client_id": "a", "client_secret": "b"},
            "directory": {"domain": "d", "admin_email": "e", "group_prefix": "p", "credentials_path": null}
        }"#;
        let config: GroupSyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.directory.base_url, DEFAULT_DIRECTORY_BASE_URL);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_vars();
        set_vars();
        unsafe { std::env::set_var("SYNC_CONCURRENCY", "4") };
        unsafe { std::env::set_var("SYNC_DRY_RUN", "true") };

        let config = GroupSyncConfig::from_env().unwrap();
        assert_eq!(config.registry.base_url, "https://ci.example.com");
        assert_eq!(config.directory.group_prefix, "eng-");
        assert_eq!(config.concurrency, 4);
        assert!(config.dry_run);

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_directory_override_and_numeric_flag() {
        clear_vars();
        set_vars();
        unsafe { std::env::set_var("SYNC_DRY_RUN", "1") };
        unsafe { std::env::set_var("GSUITE_API_BASE_URL", "http://fake-directory") };

        let config = GroupSyncConfig::from_env().unwrap();
        assert!(config.dry_run);
        assert_eq!(config.directory.base_url, "http://fake-directory");

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unparsable_concurrency() {
        clear_vars();
        set_vars();
        unsafe { std::env::set_var("SYNC_CONCURRENCY", "ten") };

        let err = GroupSyncConfig::from_env().unwrap_err();
        assert!(matches!(err, GroupSyncError::ConfigError(_)));
        assert!(err.to_string().contains("SYNC_CONCURRENCY"));

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unparsable_dry_run() {
        clear_vars();
        set_vars();
        unsafe { std::env::set_var("SYNC_DRY_RUN", "maybe") };

        let err = GroupSyncConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SYNC_DRY_RUN"));

        clear_vars();
    }

    #[test]
    fn test_flag_spellings() {
        for raw in ["1", "true", "TRUE", "yes", "on"] {
            assert_eq!(parse_flag(raw), Some(true), "{raw}");
        }
        for raw in ["0", "false", "no", "off"] {
            assert_eq!(parse_flag(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_missing_variable() {
        clear_vars();
        let err = GroupSyncConfig::from_env().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: API_BASE_URL not set");
    }
}
