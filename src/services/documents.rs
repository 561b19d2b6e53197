use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Stored JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    #[serde(default)]
    pub version: Option<u64>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a serde_json::Value,
}

/// Document store, addressed by collection and document id
#[derive(Debug, Clone)]
pub struct Documents<'a> {
    scope: Scope<'a>,
}

impl<'a> Documents<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Create a document; the server assigns its id
    pub async fn create(
        &self,
        collection: &str,
        data: &serde_json::Value,
    ) -> Result<Document, NimbusError> {
        validate_identifier("collection", collection)?;
        require_object(data)?;

        let url = self
            .scope
            .realm_url(Service::Documents)
            .await?
            .segment(collection)
            .build()?;
        tracing::debug!("Creating document in collection {}", collection);
        self.scope.send_json(Method::POST, url, data).await
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Document, NimbusError> {
        let url = self.document_url(collection, id).await?.build()?;
        self.scope.send(Method::GET, url).await
    }

    /// Replace a document's data
    ///
    /// With `expected_version`, the server rejects the write when the stored
    /// version differs.
    pub async fn replace(
        &self,
        collection: &str,
        id: &str,
        data: &serde_json::Value,
        expected_version: Option<u64>,
    ) -> Result<Document, NimbusError> {
        require_object(data)?;
        let url = self
            .document_url(collection, id)
            .await?
            .query_opt("if_version", expected_version)
            .build()?;
        self.scope.send_json(Method::PUT, url, data).await
    }

    /// Merge `patch` into the stored data
    pub async fn patch(
        &self,
        collection: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<Document, NimbusError> {
        require_object(patch)?;
        let url = self.document_url(collection, id).await?.build()?;
        self.scope.send_json(Method::PATCH, url, patch).await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), NimbusError> {
        let url = self.document_url(collection, id).await?.build()?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn list(
        &self,
        collection: &str,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<Document>, NimbusError> {
        validate_identifier("collection", collection)?;
        let url = self
            .scope
            .realm_url(Service::Documents)
            .await?
            .segment(collection);
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    /// Run a server-side query against one collection
    pub async fn search(
        &self,
        collection: &str,
        query: &serde_json::Value,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<Document>, NimbusError> {
        validate_identifier("collection", collection)?;
        require_object(query)?;
        let url = self
            .scope
            .realm_url(Service::Documents)
            .await?
            .segment(collection)
            .segment("_search");
        let url = options.apply(url).build()?;
        self.scope
            .send_json(Method::POST, url, &SearchRequest { query })
            .await
    }

    async fn document_url(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<crate::nimbus_api::url::UrlBuilder<'a>, NimbusError> {
        validate_identifier("collection", collection)?;
        validate_identifier("document id", id)?;
        Ok(self
            .scope
            .realm_url(Service::Documents)
            .await?
            .segment(collection)
            .segment(id))
    }
}

fn require_object(value: &serde_json::Value) -> Result<(), NimbusError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(NimbusError::Validation(
            "document data must be a JSON object".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_object() {
        assert!(require_object(&json!({"a": 1})).is_ok());
        assert!(require_object(&json!([1, 2])).is_err());
        assert!(require_object(&json!("text")).is_err());
    }

    #[test]
    fn test_document_deserialization_minimal() {
        let doc: Document = serde_json::from_value(json!({
            "id": "order-1",
            "collection": "orders",
            "data": {"total": 12.5}
        }))
        .unwrap();
        assert_eq!(doc.id, "order-1");
        assert!(doc.version.is_none());
        assert_eq!(doc.data["total"], 12.5);
    }
}
