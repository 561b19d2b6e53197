//! Binary object storage
//!
//! Object keys may contain `/`; each part becomes its own path segment so
//! the backend sees a nested key rather than an encoded slash.

use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::transport::Download;
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, Service, UrlBuilder};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata of a stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Storage<'a> {
    scope: Scope<'a>,
}

impl<'a> Storage<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Store `data` under `key`, replacing any existing object
    pub async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo, NimbusError> {
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        require_non_empty("content type", content_type)?;
        let url = self.object_url(key).await?.build()?;
        tracing::debug!("Uploading {} ({} bytes)", key, data.len());
        self.scope
            .send_bytes(Method::PUT, url, data, content_type)
            .await
    }

    pub async fn download(&self, key: &str) -> Result<Download, NimbusError> {
        let url = self.object_url(key).await?.build()?;
        self.scope.fetch_bytes(url).await
    }

    pub async fn metadata(&self, key: &str) -> Result<ObjectInfo, NimbusError> {
        let url = self
            .object_url(key)
            .await?
            .query("metadata", "true")
            .build()?;
        self.scope.send(Method::GET, url).await
    }

    /// List objects whose key starts with `prefix`
    pub async fn list(
        &self,
        prefix: Option<&str>,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<ObjectInfo>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Storage)
            .await?
            .segment("objects")
            .query_opt("prefix", prefix);
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), NimbusError> {
        let url = self.object_url(key).await?.build()?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    async fn object_url(&self, key: &str) -> Result<UrlBuilder<'a>, NimbusError> {
        let parts = split_key(key)?;
        let mut builder = self
            .scope
            .realm_url(Service::Storage)
            .await?
            .segment("objects");
        for part in parts {
            builder = builder.segment(part);
        }
        Ok(builder)
    }
}

fn split_key(key: &str) -> Result<Vec<&str>, NimbusError> {
    require_non_empty("object key", key)?;
    let parts: Vec<&str> = key.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return Err(NimbusError::Validation(format!(
            "object key must not contain empty, '.' or '..' parts: {}",
            key
        )));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("avatar.png").unwrap(), vec!["avatar.png"]);
        assert_eq!(
            split_key("users/ada/avatar.png").unwrap(),
            vec!["users", "ada", "avatar.png"]
        );
        assert!(split_key("").is_err());
        assert!(split_key("/leading").is_err());
        assert!(split_key("a//b").is_err());
        assert!(split_key("a/../b").is_err());
    }
}
