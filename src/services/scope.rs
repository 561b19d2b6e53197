//! Access scopes: named groups of users sharing a permission set

use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Access scope as stored by the scope service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessScope {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl AccessScope {
    pub fn new(name: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions,
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scopes<'a> {
    scope: Scope<'a>,
}

impl<'a> Scopes<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn create(&self, access_scope: &AccessScope) -> Result<AccessScope, NimbusError> {
        validate_identifier("scope name", &access_scope.name)?;
        let url = self
            .scope
            .realm_url(Service::Scope)
            .await?
            .segment("scopes")
            .build()?;
        self.scope.send_json(Method::POST, url, access_scope).await
    }

    pub async fn get(&self, name: &str) -> Result<AccessScope, NimbusError> {
        let url = self.scope_url(name, None).await?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<PaginatedResponse<AccessScope>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Scope)
            .await?
            .segment("scopes");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), NimbusError> {
        let url = self.scope_url(name, None).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn add_member(&self, name: &str, username: &str) -> Result<AccessScope, NimbusError> {
        require_non_empty("username", username)?;
        let url = self.scope_url(name, Some(username)).await?;
        tracing::debug!("Adding {} to scope {}", username, name);
        self.scope.send(Method::PUT, url).await
    }

    pub async fn remove_member(&self, name: &str, username: &str) -> Result<(), NimbusError> {
        require_non_empty("username", username)?;
        let url = self.scope_url(name, Some(username)).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    async fn scope_url(&self, name: &str, member: Option<&str>) -> Result<reqwest::Url, NimbusError> {
        validate_identifier("scope name", name)?;
        let builder = self
            .scope
            .realm_url(Service::Scope)
            .await?
            .segment("scopes")
            .segment(name);
        match member {
            Some(member) => builder.segment("members").segment(member).build(),
            None => builder.build(),
        }
    }
}
