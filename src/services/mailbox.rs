use crate::nimbus_api::client::Scope;
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Upper bound the mailbox service accepts for one receive call
pub const MAX_RECEIVE_BATCH: u32 = 100;

/// Queue-like mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub name: String,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Message waiting in a mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub body: serde_json::Value,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    body: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct Mailboxes<'a> {
    scope: Scope<'a>,
}

impl<'a> Mailboxes<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn create(&self, name: &str) -> Result<Mailbox, NimbusError> {
        let url = self.mailbox_url(name, &[]).await?;
        self.scope.send(Method::PUT, url).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), NimbusError> {
        let url = self.mailbox_url(name, &[]).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn send(&self, name: &str, body: &serde_json::Value) -> Result<Message, NimbusError> {
        let url = self.mailbox_url(name, &["messages"]).await?;
        self.scope
            .send_json(Method::POST, url, &SendRequest { body })
            .await
    }

    /// Fetch up to `max` pending messages; they stay queued until deleted
    pub async fn receive(&self, name: &str, max: u32) -> Result<Vec<Message>, NimbusError> {
        if max == 0 || max > MAX_RECEIVE_BATCH {
            return Err(NimbusError::Validation(format!(
                "receive batch must be between 1 and {}, got {}",
                MAX_RECEIVE_BATCH, max
            )));
        }
        validate_identifier("mailbox", name)?;
        let url = self
            .scope
            .realm_url(Service::Mailbox)
            .await?
            .segment(name)
            .segment("messages")
            .query("max", max)
            .build()?;
        let response: ReceiveResponse = self.scope.send(Method::GET, url).await?;
        tracing::debug!("Received {} messages from {}", response.messages.len(), name);
        Ok(response.messages)
    }

    pub async fn delete_message(&self, name: &str, message_id: &str) -> Result<(), NimbusError> {
        validate_identifier("message id", message_id)?;
        let url = self.mailbox_url(name, &["messages", message_id]).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    async fn mailbox_url(&self, name: &str, rest: &[&str]) -> Result<reqwest::Url, NimbusError> {
        validate_identifier("mailbox", name)?;
        let mut builder = self
            .scope
            .realm_url(Service::Mailbox)
            .await?
            .segment(name);
        for segment in rest {
            builder = builder.segment(*segment);
        }
        builder.build()
    }
}
