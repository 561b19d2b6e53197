use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub last_seen: Option<String>,
}

/// Payload for registering a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    /// Client-chosen id; the server assigns one when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Devices<'a> {
    scope: Scope<'a>,
}

impl<'a> Devices<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn register(&self, device: &NewDevice) -> Result<Device, NimbusError> {
        if let Some(id) = &device.id {
            validate_identifier("device id", id)?;
        }
        require_non_empty("device name", &device.name)?;
        validate_identifier("device type", &device.device_type)?;

        let url = self
            .scope
            .realm_url(Service::Device)
            .await?
            .segment("devices")
            .build()?;
        self.scope.send_json(Method::POST, url, device).await
    }

    pub async fn get(&self, id: &str) -> Result<Device, NimbusError> {
        let url = self.device_url(id).await?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<PaginatedResponse<Device>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Device)
            .await?
            .segment("devices");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    /// Merge `changes` into the device record
    pub async fn update(&self, id: &str, changes: &serde_json::Value) -> Result<Device, NimbusError> {
        if !changes.is_object() {
            return Err(NimbusError::Validation(
                "device changes must be a JSON object".to_string(),
            ));
        }
        let url = self.device_url(id).await?;
        self.scope.send_json(Method::PATCH, url, changes).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), NimbusError> {
        let url = self.device_url(id).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    async fn device_url(&self, id: &str) -> Result<reqwest::Url, NimbusError> {
        validate_identifier("device id", id)?;
        self.scope
            .realm_url(Service::Device)
            .await?
            .segment("devices")
            .segment(id)
            .build()
    }
}
