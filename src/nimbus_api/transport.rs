use crate::nimbus_api::config::ClientConfig;
use crate::nimbus_api::session::ActivityClock;
use crate::nimbus_api::types::{ApiError, NimbusError};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Request body variants sent by the services
#[derive(Debug)]
pub(crate) enum Body {
    Empty,
    Json(serde_json::Value),
    Bytes {
        data: Vec<u8>,
        content_type: String,
    },
}

/// One outgoing API call
#[derive(Debug)]
pub(crate) struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub token: Option<String>,
    pub body: Body,
    /// Whether a successful response counts as session activity
    pub track_activity: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            token: None,
            body: Body::Empty,
            track_activity: true,
        }
    }

    /// Leave the activity clock alone when this request succeeds
    pub fn untracked(mut self) -> Self {
        self.track_activity = false;
        self
    }

    pub fn bearer(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, NimbusError> {
        let value = serde_json::to_value(body).map_err(|e| {
            ApiError::Request(format!("Failed to serialize request body: {}", e))
        })?;
        self.body = Body::Json(value);
        Ok(self)
    }

    pub fn bytes(mut self, data: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body = Body::Bytes {
            data,
            content_type: content_type.into(),
        };
        self
    }
}

/// Binary payload returned by a download
#[derive(Debug, Clone)]
pub struct Download {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// HTTP transport shared by every service
///
/// Issues the request, turns non-success responses into [`ApiError::Http`]
/// with the fields found in the error body, and marks the session active on
/// every tracked success.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    client: reqwest::Client,
    activity: Arc<ActivityClock>,
}

impl Transport {
    pub fn new(config: &ClientConfig, activity: Arc<ActivityClock>) -> Result<Self, NimbusError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("nimbus-sdk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NimbusError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, activity })
    }

    /// Send the request and decode a JSON response
    ///
    /// An empty success body decodes as JSON `null`, so `()` and `Option<T>`
    /// work for endpoints that return no content.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, NimbusError> {
        let (method, url) = (request.method.clone(), request.url.clone());
        let response = self.execute(request).await?;

        let text = response.text().await.map_err(|e| {
            tracing::error!("Failed to read response body from {} {}: {}", method, url.path(), e);
            ApiError::Parse(format!("Failed to read response: {}", e))
        })?;

        let parsed = if text.trim().is_empty() {
            serde_json::from_str("null")
        } else {
            serde_json::from_str(&text)
        };

        parsed.map_err(|e| {
            tracing::error!("Failed to parse response from {} {}: {}", method, url.path(), e);
            NimbusError::Api(ApiError::Parse(format!(
                "Failed to parse response: {} - Body: {}",
                e, text
            )))
        })
    }

    /// Send the request and return the raw body
    pub async fn fetch_bytes(&self, request: ApiRequest) -> Result<Download, NimbusError> {
        let response = self.execute(request).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data = response
            .bytes()
            .await
            .map_err(|e| ApiError::Parse(format!("Failed to read response: {}", e)))?;

        Ok(Download {
            data: data.to_vec(),
            content_type,
        })
    }

    async fn execute(&self, request: ApiRequest) -> Result<reqwest::Response, NimbusError> {
        tracing::debug!("{} {}", request.method, request.url.path());

        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Bytes { data, content_type } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::error!(
                "Request {} {} failed: {}",
                request.method,
                request.url.path(),
                e
            );
            ApiError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let error = extract_error(status.as_u16(), &body);
            tracing::error!(
                "{} {} returned {}",
                request.method,
                request.url.path(),
                error
            );
            return Err(NimbusError::Api(error));
        }

        if request.track_activity {
            self.activity.touch();
        }
        Ok(response)
    }
}

/// Pull `code`, `message` and `details` out of an error body
///
/// Falls back to the raw body (or the status reason) when the body is not a
/// JSON object.
pub(crate) fn extract_error(status: u16, body: &str) -> ApiError {
    let fallback_message = || {
        if body.trim().is_empty() {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown error")
                .to_string()
        } else {
            body.to_string()
        }
    };

    let value = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => {
            return ApiError::Http {
                status,
                code: None,
                message: fallback_message(),
                details: None,
            }
        }
    };

    let field = |names: &[&str]| {
        names.iter().find_map(|name| match value.get(*name) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    let code = field(&["code", "error_code"]);
    let message = field(&["message", "error_description", "error"]).unwrap_or_else(fallback_message);
    let details = value.get("details").cloned();

    ApiError::Http {
        status,
        code,
        message,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_only_tracked_requests_touch_activity() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(2)
            .mount(&mock_server)
            .await;

        let activity = Arc::new(ActivityClock::new());
        let transport = Transport::new(&ClientConfig::new(mock_server.uri()), activity.clone()).unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let idle_since = Utc::now() - ChronoDuration::minutes(10);
        activity.set(idle_since);

        let _: serde_json::Value = transport
            .send_json(ApiRequest::new(Method::POST, url.clone()).untracked())
            .await
            .unwrap();
        assert_eq!(activity.last().timestamp_millis(), idle_since.timestamp_millis());

        let _: serde_json::Value = transport
            .send_json(ApiRequest::new(Method::POST, url))
            .await
            .unwrap();
        assert!(activity.last() > idle_since + ChronoDuration::minutes(9));
    }

    #[test]
    fn test_extract_error_from_json_body() {
        let error = extract_error(
            403,
            r#"{"code":"REALM_FORBIDDEN","message":"No access to realm","details":{"realm":"prod"}}"#,
        );

        match error {
            ApiError::Http {
                status,
                code,
                message,
                details,
            } => {
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("REALM_FORBIDDEN"));
                assert_eq!(message, "No access to realm");
                assert_eq!(details.unwrap()["realm"], "prod");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_extract_error_oauth_style_fields() {
        let error = extract_error(
            401,
            r#"{"error":"invalid_grant","error_description":"Bad credentials"}"#,
        );
        match error {
            ApiError::Http { code, message, .. } => {
                assert_eq!(code, None);
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_extract_error_plain_and_empty_bodies() {
        match extract_error(502, "upstream down") {
            ApiError::Http { message, code, .. } => {
                assert_eq!(message, "upstream down");
                assert!(code.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }

        match extract_error(404, "") {
            ApiError::Http { message, .. } => assert_eq!(message, "Not Found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_http_error_display_includes_code() {
        let error = extract_error(409, r#"{"code":4091,"message":"Version conflict"}"#);
        assert_eq!(error.to_string(), "HTTP 409 error (4091): Version conflict");
    }
}
