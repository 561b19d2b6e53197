use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Server-side action bound to a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn enabled_by_default() -> bool {
    true
}

/// Payload for creating an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Name of the deployed script the action runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Result of triggering an action by hand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRun {
    pub run_id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct Actions<'a> {
    scope: Scope<'a>,
}

impl<'a> Actions<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn create(&self, action: &NewAction) -> Result<Action, NimbusError> {
        validate_identifier("action name", &action.name)?;
        if let Some(script) = &action.script {
            validate_identifier("script", script)?;
        }
        if action.trigger.is_none() && action.script.is_none() {
            return Err(NimbusError::Validation(
                "an action needs a trigger or a script".to_string(),
            ));
        }

        let url = self
            .scope
            .realm_url(Service::Action)
            .await?
            .segment("actions")
            .build()?;
        self.scope.send_json(Method::POST, url, action).await
    }

    pub async fn get(&self, id: &str) -> Result<Action, NimbusError> {
        validate_identifier("action id", id)?;
        let url = self
            .scope
            .realm_url(Service::Action)
            .await?
            .segment("actions")
            .segment(id)
            .build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<PaginatedResponse<Action>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Action)
            .await?
            .segment("actions");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), NimbusError> {
        validate_identifier("action id", id)?;
        let url = self
            .scope
            .realm_url(Service::Action)
            .await?
            .segment("actions")
            .segment(id)
            .build()?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    /// Run an action now with an explicit payload
    pub async fn trigger(
        &self,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<ActionRun, NimbusError> {
        validate_identifier("action id", id)?;
        let url = self
            .scope
            .realm_url(Service::Action)
            .await?
            .segment("actions")
            .segment(id)
            .segment("trigger")
            .build()?;
        tracing::debug!("Triggering action {}", id);
        self.scope.send_json(Method::POST, url, payload).await
    }
}
