//! Nimbus SDK
//!
//! A Rust client library for the Nimbus multi-service cloud backend.
//!
//! This SDK provides:
//! - Scoped URL building with account/realm resolution and transaction IDs
//! - An authenticated HTTP transport with structured error extraction
//! - Session management with automatic re-login before token expiry
//! - Encrypted session persistence via OS keychain or `age`-encrypted files
//! - Typed handles for every backend service (documents, storage, push, ...)
//!
//! # Example
//!
//! ```no_run
//! use nimbus_sdk::{ClientConfig, ConnectOptions, ListOptions, NimbusClient, Persistence};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("https://api.nimbus.example")
//!     .with_account("acme")
//!     .with_realm("production");
//!
//! let client = NimbusClient::with_persistence(
//!     config,
//!     &Persistence::Durable { instance_id: "cli".to_string() },
//! )
//! .await?;
//!
//! // Log in and keep the session alive for up to 30 idle minutes
//! client
//!     .auth()
//!     .connect(
//!         "ada",
//!         "s3cret",
//!         ConnectOptions::default().with_inactivity_timeout(Duration::from_secs(1800)),
//!     )
//!     .await?;
//!
//! let devices = client.devices().list(&ListOptions::new().per_page(50)).await?;
//! println!("{} devices", devices.meta.total);
//!
//! client.auth().disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod nimbus_api;
pub mod services;
pub mod storage;

// Re-export commonly used types and functions
pub use nimbus_api::{
    client::{CallContext, NimbusClient, Scope},
    config::ClientConfig,
    resources::{
        ListOptions, PaginatedResponse, PaginationLinks, PaginationMeta, ResourceResponse,
        StatusResponse,
    },
    session::{Persistence, Session, SessionStore},
    transport::Download,
    types::{ApiError, LoginResponse, NimbusError, SessionEvent, TokenInfo},
    url::{Service, UrlBuilder},
};
pub use services::auth::ConnectOptions;
pub use storage::{StorageBackend, StorageError};
