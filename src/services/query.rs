use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Rows returned by a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub took_ms: Option<u64>,
}

/// Named query stored server-side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedQuery {
    pub name: String,
    pub statement: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    statement: &'a str,
    params: &'a serde_json::Value,
}

#[derive(Serialize)]
struct RunSavedRequest<'a> {
    params: &'a serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Queries<'a> {
    scope: Scope<'a>,
}

impl<'a> Queries<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Run an ad-hoc statement with bound parameters
    pub async fn run(&self, statement: &str, params: &serde_json::Value) -> Result<QueryResult, NimbusError> {
        require_non_empty("statement", statement)?;
        let url = self
            .scope
            .realm_url(Service::Query)
            .await?
            .segment("run")
            .build()?;
        self.scope
            .send_json(Method::POST, url, &RunRequest { statement, params })
            .await
    }

    pub async fn save(&self, query: &SavedQuery) -> Result<SavedQuery, NimbusError> {
        require_non_empty("statement", &query.statement)?;
        let url = self.saved_url(&query.name).await?.build()?;
        tracing::debug!("Saving query {}", query.name);
        self.scope.send_json(Method::PUT, url, query).await
    }

    pub async fn list_saved(&self, options: &ListOptions) -> Result<PaginatedResponse<SavedQuery>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Query)
            .await?
            .segment("saved");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn run_saved(&self, name: &str, params: &serde_json::Value) -> Result<QueryResult, NimbusError> {
        let url = self.saved_url(name).await?.segment("run").build()?;
        self.scope
            .send_json(Method::POST, url, &RunSavedRequest { params })
            .await
    }

    pub async fn delete_saved(&self, name: &str) -> Result<(), NimbusError> {
        let url = self.saved_url(name).await?.build()?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    async fn saved_url(&self, name: &str) -> Result<crate::nimbus_api::url::UrlBuilder<'a>, NimbusError> {
        validate_identifier("query name", name)?;
        Ok(self
            .scope
            .realm_url(Service::Query)
            .await?
            .segment("saved")
            .segment(name))
    }
}
