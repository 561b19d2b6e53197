use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_TRANSACTION_PARAM: &str = "txid";
pub const DEFAULT_API_VERSION: &str = "v1";

/// Client configuration
///
/// Built with [`ClientConfig::new`] and the `with_*` builder methods, from
/// `NIMBUS_*` environment variables with [`ClientConfig::from_env`], or from a
/// TOML document with [`ClientConfig::from_toml_str`] / [`ClientConfig::from_file`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host used for every service without an override
    pub host: String,
    /// Per-service host overrides
    pub service_hosts: HashMap<Service, String>,
    /// Default account when neither the call nor the session provides one
    pub account: Option<String>,
    /// Default realm when neither the call nor the session provides one
    pub realm: Option<String>,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Query parameter carrying the transaction ID
    pub transaction_param: String,
    /// How long before token expiry the session re-logs-in
    pub refresh_margin: Duration,
    /// Delay between failed re-login attempts
    pub refresh_retry_delay: Duration,
    /// Version path segment placed after the service name
    pub api_version: String,
}

/// On-disk shape of the configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    host: String,
    #[serde(default)]
    service_hosts: HashMap<Service, String>,
    account: Option<String>,
    realm: Option<String>,
    timeout_secs: Option<u64>,
    transaction_param: Option<String>,
    refresh_margin_secs: Option<u64>,
    refresh_retry_delay_secs: Option<u64>,
    api_version: Option<String>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service_hosts: HashMap::new(),
            account: None,
            realm: None,
            timeout: DEFAULT_TIMEOUT,
            transaction_param: DEFAULT_TRANSACTION_PARAM.to_string(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            refresh_retry_delay: DEFAULT_REFRESH_RETRY_DELAY,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Route one service to a different host
    pub fn with_service_host(mut self, service: Service, host: impl Into<String>) -> Self {
        self.service_hosts.insert(service, host.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transaction_param(mut self, name: impl Into<String>) -> Self {
        self.transaction_param = name.into();
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_refresh_retry_delay(mut self, delay: Duration) -> Self {
        self.refresh_retry_delay = delay;
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Host serving the given service
    pub fn host_for(&self, service: Service) -> &str {
        self.service_hosts
            .get(&service)
            .map(String::as_str)
            .unwrap_or(&self.host)
    }

    /// Load configuration from the environment
    ///
    /// `NIMBUS_HOST` is required. `NIMBUS_ACCOUNT`, `NIMBUS_REALM`,
    /// `NIMBUS_TIMEOUT_SECS` and `NIMBUS_TXID_PARAM` are optional.
    pub fn from_env() -> Result<Self, NimbusError> {
        let host = std::env::var("NIMBUS_HOST")
            .map_err(|_| NimbusError::Config("NIMBUS_HOST is not set".to_string()))?;

        let mut config = Self::new(host);
        if let Ok(account) = std::env::var("NIMBUS_ACCOUNT") {
            config.account = Some(account);
        }
        if let Ok(realm) = std::env::var("NIMBUS_REALM") {
            config.realm = Some(realm);
        }
        if let Ok(timeout) = std::env::var("NIMBUS_TIMEOUT_SECS") {
            let secs = timeout.parse::<u64>().map_err(|e| {
                NimbusError::Config(format!("NIMBUS_TIMEOUT_SECS is not a number: {}", e))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(param) = std::env::var("NIMBUS_TXID_PARAM") {
            config.transaction_param = param;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, NimbusError> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| NimbusError::Config(format!("Invalid TOML configuration: {}", e)))?;

        let mut config = Self::new(file.host);
        config.service_hosts = file.service_hosts;
        config.account = file.account;
        config.realm = file.realm;
        if let Some(secs) = file.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(param) = file.transaction_param {
            config.transaction_param = param;
        }
        if let Some(secs) = file.refresh_margin_secs {
            config.refresh_margin = Duration::from_secs(secs);
        }
        if let Some(secs) = file.refresh_retry_delay_secs {
            config.refresh_retry_delay = Duration::from_secs(secs);
        }
        if let Some(version) = file.api_version {
            config.api_version = version;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NimbusError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NimbusError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check hosts, identifiers and durations
    pub fn validate(&self) -> Result<(), NimbusError> {
        check_host("host", &self.host)?;
        for (service, host) in &self.service_hosts {
            check_host(service.segment(), host)?;
        }

        if let Some(account) = &self.account {
            validate_identifier("account", account)
                .map_err(|e| NimbusError::Config(e.to_string()))?;
        }
        if let Some(realm) = &self.realm {
            validate_identifier("realm", realm).map_err(|e| NimbusError::Config(e.to_string()))?;
        }

        if self.timeout.is_zero() {
            return Err(NimbusError::Config("timeout must be non-zero".to_string()));
        }
        if self.transaction_param.trim().is_empty() {
            return Err(NimbusError::Config(
                "transaction_param must not be empty".to_string(),
            ));
        }
        if self.api_version.trim().is_empty() || self.api_version.contains('/') {
            return Err(NimbusError::Config(format!(
                "api_version must be a single path segment: {:?}",
                self.api_version
            )));
        }
        Ok(())
    }
}

fn check_host(name: &str, host: &str) -> Result<(), NimbusError> {
    let parsed = reqwest::Url::parse(host)
        .map_err(|e| NimbusError::Config(format!("{} host {:?} is not a URL: {}", name, host, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(NimbusError::Config(format!(
            "{} host must use http or https, got {}",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::new("https://api.nimbus.test");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.transaction_param, "txid");
        assert_eq!(config.api_version, "v1");
        assert!(config.account.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_host_for_uses_override() {
        let config = ClientConfig::new("https://api.nimbus.test")
            .with_service_host(Service::Storage, "https://blobs.nimbus.test");

        assert_eq!(config.host_for(Service::Storage), "https://blobs.nimbus.test");
        assert_eq!(config.host_for(Service::Documents), "https://api.nimbus.test");
    }

    #[test]
    fn test_from_toml_str() {
        let config = ClientConfig::from_toml_str(
            r#"
            host = "https://api.nimbus.test"
            account = "acme"
            realm = "prod"
            timeout_secs = 5
            refresh_margin_secs = 120
            transaction_param = "tx"

            [service_hosts]
            locate = "https://geo.nimbus.test"
            "#,
        )
        .unwrap();

        assert_eq!(config.account.as_deref(), Some("acme"));
        assert_eq!(config.realm.as_deref(), Some("prod"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.refresh_margin, Duration::from_secs(120));
        assert_eq!(config.transaction_param, "tx");
        assert_eq!(config.host_for(Service::Locate), "https://geo.nimbus.test");
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields_and_services() {
        assert!(ClientConfig::from_toml_str("host = \"https://a.test\"\nbogus = 1").is_err());
        assert!(ClientConfig::from_toml_str(
            "host = \"https://a.test\"\n[service_hosts]\nweather = \"https://b.test\""
        )
        .is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new("ftp://api.nimbus.test").validate().is_err());
        assert!(ClientConfig::new("not a url").validate().is_err());
        assert!(ClientConfig::new("https://a.test")
            .with_account("bad account")
            .validate()
            .is_err());
        assert!(ClientConfig::new("https://a.test")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ClientConfig::new("https://a.test")
            .with_api_version("v1/extra")
            .validate()
            .is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("NIMBUS_HOST", "https://env.nimbus.test");
        std::env::set_var("NIMBUS_ACCOUNT", "acme");
        std::env::set_var("NIMBUS_TIMEOUT_SECS", "12");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.host, "https://env.nimbus.test");
        assert_eq!(config.account.as_deref(), Some("acme"));
        assert_eq!(config.timeout, Duration::from_secs(12));

        std::env::set_var("NIMBUS_TIMEOUT_SECS", "soon");
        assert!(ClientConfig::from_env().is_err());

        std::env::remove_var("NIMBUS_HOST");
        std::env::remove_var("NIMBUS_ACCOUNT");
        std::env::remove_var("NIMBUS_TIMEOUT_SECS");
        assert!(ClientConfig::from_env().is_err());
    }
}
