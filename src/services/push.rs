use crate::nimbus_api::client::Scope;
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Push delivery platform of a registered token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Apns,
    Fcm,
    Web,
}

/// Push token registered for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRegistration {
    pub id: String,
    pub platform: Platform,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    platform: Platform,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

/// Notification sent to a set of users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    recipients: &'a [String],
    notification: &'a Notification,
}

/// Delivery summary of a push send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReceipt {
    #[serde(default)]
    pub sent: u32,
    #[serde(default)]
    pub failed: u32,
}

/// Mobile and web push notifications
#[derive(Debug, Clone)]
pub struct Push<'a> {
    scope: Scope<'a>,
}

impl<'a> Push<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Register a device push token, optionally tied to a user
    pub async fn register(
        &self,
        platform: Platform,
        token: &str,
        user_id: Option<&str>,
    ) -> Result<PushRegistration, NimbusError> {
        require_non_empty("push token", token)?;
        let url = self
            .scope
            .realm_url(Service::Push)
            .await?
            .segment("registrations")
            .build()?;
        self.scope
            .send_json(
                Method::POST,
                url,
                &RegisterRequest {
                    platform,
                    token,
                    user_id,
                },
            )
            .await
    }

    pub async fn unregister(&self, registration_id: &str) -> Result<(), NimbusError> {
        validate_identifier("registration id", registration_id)?;
        let url = self
            .scope
            .realm_url(Service::Push)
            .await?
            .segment("registrations")
            .segment(registration_id)
            .build()?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn send(&self, recipients: &[String], notification: &Notification) -> Result<PushReceipt, NimbusError> {
        if recipients.is_empty() {
            return Err(NimbusError::Validation(
                "at least one recipient is required".to_string(),
            ));
        }
        for recipient in recipients {
            require_non_empty("recipient", recipient)?;
        }
        require_non_empty("notification title", &notification.title)?;

        let url = self
            .scope
            .realm_url(Service::Push)
            .await?
            .segment("send")
            .build()?;
        tracing::debug!("Sending push notification to {} recipients", recipients.len());
        self.scope
            .send_json(
                Method::POST,
                url,
                &SendRequest {
                    recipients,
                    notification,
                },
            )
            .await
    }
}
