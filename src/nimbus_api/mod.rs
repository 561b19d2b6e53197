/// Nimbus cloud API plumbing
///
/// Everything the service handles share: configuration, URL composition,
/// the HTTP transport, the session model and the client that ties them
/// together.
///
/// ## Session lifecycle
///
/// 1. `connect` logs in and stores the token plus the (encrypted) credentials
/// 2. A background task re-logs-in `refresh_margin` before the token expires
/// 3. Every successful API call marks the session active
/// 4. Once the inactivity timeout passes without a call, the task ends the session
/// 5. `disconnect` or `logout` stops the task and clears stored state
pub mod client;
pub mod config;
pub mod resources;
pub mod session;
pub mod transport;
pub mod types;
pub mod url;

pub use client::{CallContext, NimbusClient, Scope};
pub use config::ClientConfig;
pub use resources::*;
pub use session::{Persistence, Session, SessionStore};
pub use transport::Download;
pub use types::{ApiError, LoginResponse, NimbusError, SessionEvent, TokenInfo};
pub use url::{new_transaction_id, Service, UrlBuilder};
