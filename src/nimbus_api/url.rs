use crate::nimbus_api::config::ClientConfig;
use crate::nimbus_api::types::NimbusError;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use std::fmt;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,127}$").expect("identifier regex is valid")
});

/// Backend services reachable through the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Auth,
    Admin,
    Documents,
    Locate,
    Action,
    Code,
    Context,
    Device,
    EventHub,
    Mailbox,
    Metrics,
    Push,
    Query,
    Storage,
    Scope,
    Broadcast,
}

impl Service {
    /// First path segment of every URL for this service
    pub fn segment(self) -> &'static str {
        match self {
            Service::Auth => "auth",
            Service::Admin => "admin",
            Service::Documents => "documents",
            Service::Locate => "locate",
            Service::Action => "action",
            Service::Code => "code",
            Service::Context => "context",
            Service::Device => "device",
            Service::EventHub => "eventhub",
            Service::Mailbox => "mailbox",
            Service::Metrics => "metrics",
            Service::Push => "push",
            Service::Query => "query",
            Service::Storage => "storage",
            Service::Scope => "scope",
            Service::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// Check an account, realm or resource identifier
pub fn validate_identifier(what: &str, value: &str) -> Result<(), NimbusError> {
    if value.is_empty() {
        return Err(NimbusError::Validation(format!("{} is required", what)));
    }
    if !IDENTIFIER.is_match(value) {
        return Err(NimbusError::Validation(format!(
            "{} {:?} may only contain letters, digits, '_', '.' and '-' (max 128 chars)",
            what, value
        )));
    }
    Ok(())
}

/// Check a free-form value that only has to be present
pub fn require_non_empty(what: &str, value: &str) -> Result<(), NimbusError> {
    if value.trim().is_empty() {
        return Err(NimbusError::Validation(format!("{} is required", what)));
    }
    Ok(())
}

/// Builds `{host}/{service}/{version}/{account}/{realm}/{segments...}?...&{txid}=...`
#[derive(Debug, Clone)]
pub struct UrlBuilder<'a> {
    config: &'a ClientConfig,
    service: Service,
    account: Option<String>,
    realm: Option<String>,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    transaction_id: Option<String>,
}

impl<'a> UrlBuilder<'a> {
    pub fn new(config: &'a ClientConfig, service: Service) -> Self {
        Self {
            config,
            service,
            account: None,
            realm: None,
            segments: Vec::new(),
            query: Vec::new(),
            transaction_id: None,
        }
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Append one path segment; it is percent-encoded as a whole
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn query_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    /// Compose the final URL
    pub fn build(self) -> Result<Url, NimbusError> {
        let host = self.config.host_for(self.service);
        let mut url = Url::parse(host)
            .map_err(|e| NimbusError::Config(format!("Invalid host {:?}: {}", host, e)))?;

        if let Some(account) = &self.account {
            validate_identifier("account", account)?;
        }
        if let Some(realm) = &self.realm {
            validate_identifier("realm", realm)?;
        }

        {
            let mut path = url.path_segments_mut().map_err(|_| {
                NimbusError::Config(format!("Host {:?} cannot be used as a base URL", host))
            })?;
            path.pop_if_empty();
            path.push(self.service.segment());
            path.push(&self.config.api_version);
            if let Some(account) = &self.account {
                path.push(account);
            }
            if let Some(realm) = &self.realm {
                path.push(realm);
            }
            for segment in &self.segments {
                path.push(segment);
            }
        }

        let transaction_id = self.transaction_id.unwrap_or_else(new_transaction_id);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair(&self.config.transaction_param, &transaction_id);
        }

        Ok(url)
    }
}

/// Fresh correlation identifier for one request
pub fn new_transaction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
