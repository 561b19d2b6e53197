use serde::{Deserialize, Serialize};
use std::fmt;

/// Nimbus SDK error type
///
/// Every public operation of the SDK returns this error.
#[derive(Debug)]
pub enum NimbusError {
    /// A parameter was missing or malformed; no request was sent
    Validation(String),
    /// Client configuration is invalid or could not be loaded
    Config(String),
    /// API request failed (network, HTTP, or response parsing error)
    Api(ApiError),
    /// Session persistence failed
    Storage(crate::storage::StorageError),
    /// No usable session (not connected, expired, or credentials missing)
    Session(String),
}

impl fmt::Display for NimbusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NimbusError::Validation(msg) => write!(f, "Invalid parameter: {}", msg),
            NimbusError::Config(msg) => write!(f, "Configuration error: {}", msg),
            NimbusError::Api(err) => write!(f, "API error: {}", err),
            NimbusError::Storage(err) => write!(f, "Storage error: {}", err),
            NimbusError::Session(msg) => write!(f, "Session error: {}", msg),
        }
    }
}

impl std::error::Error for NimbusError {}

impl From<ApiError> for NimbusError {
    fn from(err: ApiError) -> Self {
        NimbusError::Api(err)
    }
}

impl From<crate::storage::StorageError> for NimbusError {
    fn from(err: crate::storage::StorageError) -> Self {
        NimbusError::Storage(err)
    }
}

impl NimbusError {
    /// HTTP status of the failed response, if the error came from one
    pub fn status(&self) -> Option<u16> {
        match self {
            NimbusError::Api(ApiError::Http { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// API-specific errors
#[derive(Debug)]
pub enum ApiError {
    /// Network error (connection, timeout, etc.)
    Network(String),
    /// Non-success HTTP response, with the fields extracted from its body
    Http {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<serde_json::Value>,
    },
    /// Failed to parse response
    Parse(String),
    /// Request building failed
    Request(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Http {
                status,
                code: Some(code),
                message,
                ..
            } => write!(f, "HTTP {} error ({}): {}", status, code, message),
            ApiError::Http { status, message, .. } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            ApiError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ApiError::Request(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timeout".to_string())
        } else if err.is_connect() {
            ApiError::Network(format!("Connection failed: {}", err))
        } else if err.is_builder() {
            ApiError::Request(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Http {
                status: status.as_u16(),
                code: None,
                message: err.to_string(),
                details: None,
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Body of a successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Result of validating an access token server-side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub valid: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Lifecycle notifications emitted by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was established by `connect` or `resume`
    Connected { username: String },
    /// The access token was renewed ahead of expiry
    Refreshed { expires_at: chrono::DateTime<chrono::Utc> },
    /// A re-login attempt failed; the loop will retry while the token lives
    RefreshFailed { message: String },
    /// No activity within the inactivity timeout; the session was dropped
    InactivityTimeout,
    /// The token expired before it could be renewed; the session was dropped
    Expired,
    /// The session was ended by `disconnect` or `logout`
    Disconnected,
}
