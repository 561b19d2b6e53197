use crate::storage::{select_durable_backend, MemoryStorage, StorageBackend, StorageError};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Key under which the session is persisted
const SESSION_STORAGE_KEY: &str = "nimbus/session.json";

/// Last time a request succeeded, shared between transport and session manager
#[derive(Debug)]
pub struct ActivityClock {
    last_millis: AtomicI64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn touch(&self) {
        self.set(Utc::now());
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.last_millis.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_millis.load(Ordering::Relaxed))
            .single()
            .unwrap_or_else(Utc::now)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Credentials kept so the session can re-login on its own
#[derive(Serialize, Deserialize)]
pub struct Credentials {
    #[serde(serialize_with = "serialize_secret")]
    pub password: SecretString,
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            password: SecretString::new(self.password.expose_secret().clone()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Client-side session established by `connect`
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub account: String,
    pub realm: String,
    pub username: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Session ends if no request succeeds for this many seconds
    #[serde(default)]
    pub inactivity_timeout_secs: Option<u64>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("realm", &self.realm)
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("access_token", &format!("[{} chars]", self.access_token.len()))
            .field("expires_at", &self.expires_at)
            .field("last_active", &self.last_active)
            .field("inactivity_timeout_secs", &self.inactivity_timeout_secs)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// True when the token expires within `margin` from now
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.remaining() <= margin
    }

    /// True when `last_active` is older than the inactivity timeout
    pub fn is_inactive(&self, last_active: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.inactivity_timeout_secs {
            Some(secs) => (now - last_active).num_milliseconds() > (secs as i64).saturating_mul(1000),
            None => false,
        }
    }

    /// Time left until the session counts as inactive
    ///
    /// `None` when there is no timeout, or one too large to ever elapse.
    pub fn until_inactive(&self, last_active: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        let secs = i64::try_from(self.inactivity_timeout_secs?).ok()?;
        let deadline = chrono::Duration::try_seconds(secs)
            .and_then(|timeout| timeout.checked_add(&chrono::Duration::milliseconds(1)))
            .and_then(|timeout| last_active.checked_add_signed(timeout))?;
        Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn can_relogin(&self) -> bool {
        self.credentials.is_some()
    }

    /// Time left until the re-login should happen
    pub fn refresh_delay(&self, margin: Duration) -> Duration {
        self.remaining().saturating_sub(margin)
    }

    /// Time left until the token expires
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Where sessions are persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    /// OS keychain, or encrypted files under `~/.nimbus/<instance_id>`
    Durable { instance_id: String },
    /// Process memory only
    Memory,
    /// Not persisted
    None,
}

/// Persists sessions in a [`StorageBackend`]
#[derive(Clone)]
pub struct SessionStore {
    backend: Option<Arc<dyn StorageBackend>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl SessionStore {
    pub async fn open(persistence: &Persistence) -> Result<Self, StorageError> {
        let backend: Option<Arc<dyn StorageBackend>> = match persistence {
            Persistence::Durable { instance_id } => Some(select_durable_backend(instance_id).await?),
            Persistence::Memory => Some(Arc::new(MemoryStorage::new())),
            Persistence::None => None,
        };
        Ok(Self { backend })
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let json = serde_json::to_vec(session).map_err(|e| {
            tracing::error!("Failed to serialize session: {}", e);
            StorageError::Config(format!("JSON serialization failed: {}", e))
        })?;

        backend.write(SESSION_STORAGE_KEY, &json).await?;
        tracing::debug!(
            "Session saved to {} storage: account={}, realm={}, expires_at={}",
            backend.name(),
            session.account,
            session.realm,
            session.expires_at
        );
        Ok(())
    }

    /// `Ok(None)` when nothing is stored
    pub async fn load(&self) -> Result<Option<Session>, StorageError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };

        if !backend.exists(SESSION_STORAGE_KEY) {
            tracing::debug!("No persisted session found");
            return Ok(None);
        }

        let json = backend.read(SESSION_STORAGE_KEY).await?;
        let session: Session = serde_json::from_slice(&json).map_err(|e| {
            tracing::error!("Failed to deserialize session: {}", e);
            StorageError::Config(format!("JSON deserialization failed: {}", e))
        })?;

        tracing::debug!(
            "Session loaded: account={}, realm={}, expired={}",
            session.account,
            session.realm,
            session.is_expired()
        );
        Ok(Some(session))
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        if backend.exists(SESSION_STORAGE_KEY) {
            backend.remove(SESSION_STORAGE_KEY).await?;
            tracing::debug!("Persisted session cleared");
        }
        Ok(())
    }
}
