use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Broadcast channel with its current subscriber count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub subscribers: u64,
}

#[derive(Serialize)]
struct BroadcastRequest<'a> {
    message: &'a serde_json::Value,
}

/// Acknowledgement of a broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    #[serde(default)]
    pub id: Option<String>,
    /// Number of subscribers the message was delivered to
    #[serde(default)]
    pub delivered: u64,
}

/// Fan-out messages to every subscriber of a channel
#[derive(Debug, Clone)]
pub struct Broadcast<'a> {
    scope: Scope<'a>,
}

impl<'a> Broadcast<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn send(&self, channel: &str, message: &serde_json::Value) -> Result<BroadcastReceipt, NimbusError> {
        validate_identifier("channel", channel)?;
        let url = self
            .scope
            .realm_url(Service::Broadcast)
            .await?
            .segment("channels")
            .segment(channel)
            .build()?;
        tracing::debug!("Broadcasting to channel {}", channel);
        self.scope
            .send_json(Method::POST, url, &BroadcastRequest { message })
            .await
    }

    pub async fn list_channels(&self, options: &ListOptions) -> Result<PaginatedResponse<Channel>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Broadcast)
            .await?
            .segment("channels");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }
}
