use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// One key/value pair of realm context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Serialize)]
struct SetRequest<'a> {
    value: &'a serde_json::Value,
}

/// Realm-wide key/value context
#[derive(Debug, Clone)]
pub struct Context<'a> {
    scope: Scope<'a>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn set(&self, key: &str, value: &serde_json::Value) -> Result<ContextEntry, NimbusError> {
        let url = self.key_url(key).await?;
        self.scope
            .send_json(Method::PUT, url, &SetRequest { value })
            .await
    }

    pub async fn get(&self, key: &str) -> Result<ContextEntry, NimbusError> {
        let url = self.key_url(key).await?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), NimbusError> {
        let url = self.key_url(key).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn list(&self, options: &ListOptions) -> Result<PaginatedResponse<ContextEntry>, NimbusError> {
        let url = self.scope.realm_url(Service::Context).await?;
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    async fn key_url(&self, key: &str) -> Result<reqwest::Url, NimbusError> {
        validate_identifier("context key", key)?;
        self.scope
            .realm_url(Service::Context)
            .await?
            .segment(key)
            .build()
    }
}
