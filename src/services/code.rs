use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Deployed server-side script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    pub runtime: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Serialize)]
struct DeployRequest<'a> {
    runtime: &'a str,
    source: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    args: &'a serde_json::Value,
}

/// Output of one script execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub output: serde_json::Value,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Server-side code deployment and execution
#[derive(Debug, Clone)]
pub struct Code<'a> {
    scope: Scope<'a>,
}

impl<'a> Code<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Create or replace a script
    pub async fn deploy(&self, name: &str, runtime: &str, source: &str) -> Result<Script, NimbusError> {
        validate_identifier("script name", name)?;
        require_non_empty("runtime", runtime)?;
        require_non_empty("source", source)?;

        let url = self.script_url(name).await?;
        tracing::debug!("Deploying script {} ({} bytes)", name, source.len());
        self.scope
            .send_json(Method::PUT, url, &DeployRequest { runtime, source })
            .await
    }

    pub async fn get(&self, name: &str) -> Result<Script, NimbusError> {
        let url = self.script_url(name).await?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<PaginatedResponse<Script>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Code)
            .await?
            .segment("scripts");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), NimbusError> {
        let url = self.script_url(name).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<Execution, NimbusError> {
        validate_identifier("script name", name)?;
        let url = self
            .scope
            .realm_url(Service::Code)
            .await?
            .segment("scripts")
            .segment(name)
            .segment("execute")
            .build()?;
        self.scope
            .send_json(Method::POST, url, &ExecuteRequest { args })
            .await
    }

    async fn script_url(&self, name: &str) -> Result<reqwest::Url, NimbusError> {
        validate_identifier("script name", name)?;
        self.scope
            .realm_url(Service::Code)
            .await?
            .segment("scripts")
            .segment(name)
            .build()
    }
}
