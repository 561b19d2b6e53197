use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Event published to the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            occurred_at: None,
        }
    }
}

/// Acknowledgement of a published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub id: String,
    #[serde(default)]
    pub handlers_invoked: u32,
}

/// Handler subscribed to one event type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub event_type: String,
    /// Either a deployed script name or an HTTPS webhook URL
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct EventHub<'a> {
    scope: Scope<'a>,
}

impl<'a> EventHub<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn publish(&self, event: &Event) -> Result<PublishedEvent, NimbusError> {
        validate_identifier("event type", &event.event_type)?;
        let url = self
            .scope
            .realm_url(Service::EventHub)
            .await?
            .segment("events")
            .build()?;
        tracing::debug!("Publishing event {}", event.event_type);
        self.scope.send_json(Method::POST, url, event).await
    }

    pub async fn create_handler(&self, handler: &Handler) -> Result<Handler, NimbusError> {
        validate_identifier("event type", &handler.event_type)?;
        require_non_empty("handler target", &handler.target)?;
        let url = self
            .scope
            .realm_url(Service::EventHub)
            .await?
            .segment("handlers")
            .build()?;
        self.scope.send_json(Method::POST, url, handler).await
    }

    pub async fn get_handler(&self, id: &str) -> Result<Handler, NimbusError> {
        let url = self.handler_url(id).await?;
        self.scope.send(Method::GET, url).await
    }

    /// List handlers, optionally only those for one event type
    pub async fn list_handlers(
        &self,
        event_type: Option<&str>,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<Handler>, NimbusError> {
        if let Some(event_type) = event_type {
            validate_identifier("event type", event_type)?;
        }
        let url = self
            .scope
            .realm_url(Service::EventHub)
            .await?
            .segment("handlers")
            .query_opt("event_type", event_type);
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete_handler(&self, id: &str) -> Result<(), NimbusError> {
        let url = self.handler_url(id).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    async fn handler_url(&self, id: &str) -> Result<reqwest::Url, NimbusError> {
        validate_identifier("handler id", id)?;
        self.scope
            .realm_url(Service::EventHub)
            .await?
            .segment("handlers")
            .segment(id)
            .build()
    }
}
