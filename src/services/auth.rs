//! Authentication and the session lifecycle
//!
//! `connect` logs in, persists the session (credentials included, so the
//! client can log in again on its own) and starts one background task that
//! re-logs-in `refresh_margin` before the access token expires. The task
//! stops when the caller-supplied inactivity timeout elapses without a
//! successful caller request (its own re-logins do not count), when the token
//! expires without being renewed, or on `disconnect`/`logout`.

use crate::nimbus_api::client::{NimbusClient, RefreshTask, Scope};
use crate::nimbus_api::session::{Credentials, Session};
use crate::nimbus_api::transport::ApiRequest;
use crate::nimbus_api::types::{ApiError, LoginResponse, NimbusError, SessionEvent, TokenInfo};
use crate::nimbus_api::url::{require_non_empty, Service, UrlBuilder};
use chrono::{DateTime, Utc};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::IgnoredAny;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for [`Auth::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// End the session once no caller request has succeeded for this long
    pub inactivity_timeout: Option<Duration>,
    /// Keep the password so the session can re-login before token expiry
    pub remember_credentials: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            inactivity_timeout: None,
            remember_credentials: true,
        }
    }
}

impl ConnectOptions {
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn remember_credentials(mut self, remember: bool) -> Self {
        self.remember_credentials = remember;
        self
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ChangePasswordRequest<'a> {
    old_password: &'a str,
    new_password: &'a str,
}

/// Authentication service
#[derive(Debug, Clone)]
pub struct Auth<'a> {
    scope: Scope<'a>,
}

impl<'a> Auth<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Exchange credentials for an access token
    ///
    /// The cached session is not touched; use [`Auth::connect`] to establish
    /// one.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, NimbusError> {
        let account = self.scope.account().await?;
        let realm = self.scope.realm().await?;
        login_request(self.scope.client, &self.scope, &account, &realm, username, password, true).await
    }

    /// Log in, persist the session and schedule automatic re-login
    pub async fn connect(
        &self,
        username: &str,
        password: &str,
        options: ConnectOptions,
    ) -> Result<Session, NimbusError> {
        let client = self.scope.client;
        let account = self.scope.account().await?;
        let realm = self.scope.realm().await?;

        let response =
            login_request(client, &self.scope, &account, &realm, username, password, true).await?;

        let now = Utc::now();
        let expires_at = token_expiry(now, response.expires_in)?;
        let session = Session {
            account,
            realm,
            username: username.to_string(),
            user_id: response.user_id.clone(),
            access_token: response.access_token,
            expires_at,
            last_active: now,
            inactivity_timeout_secs: options.inactivity_timeout.map(|d| d.as_secs().max(1)),
            credentials: options.remember_credentials.then(|| Credentials {
                password: SecretString::new(password.to_string()),
            }),
        };

        stop_refresh(client).await;
        client.inner.activity.set(now);
        client.inner.store.save(&session).await?;
        *client.inner.session.write().await = Some(session.clone());
        schedule_refresh(client).await;

        tracing::info!(
            "Connected: account={}, realm={}, user={}, expires_at={}",
            session.account,
            session.realm,
            session.username,
            session.expires_at
        );
        client.emit(SessionEvent::Connected {
            username: session.username.clone(),
        });
        Ok(session)
    }

    /// Restore a persisted session
    ///
    /// Returns `Ok(None)` when nothing usable was stored: no session, an
    /// inactive one, or an expired one without remembered credentials.
    pub async fn resume(&self) -> Result<Option<Session>, NimbusError> {
        let client = self.scope.client;
        let Some(stored) = client.inner.store.load().await? else {
            return Ok(None);
        };

        if stored.is_inactive(stored.last_active, Utc::now()) {
            tracing::info!("Persisted session exceeded its inactivity timeout, discarding");
            client.inner.store.clear().await?;
            return Ok(None);
        }

        if stored.is_expired() && !stored.can_relogin() {
            tracing::info!("Persisted session expired and cannot re-login, discarding");
            client.inner.store.clear().await?;
            return Ok(None);
        }

        stop_refresh(client).await;
        client.inner.activity.set(stored.last_active);
        let username = stored.username.clone();
        *client.inner.session.write().await = Some(stored);

        let session = if client
            .session()
            .await
            .map(|s| s.expires_within(client.config().refresh_margin))
            .unwrap_or(false)
        {
            match relogin(client, true).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!("Re-login while resuming failed: {}", e);
                    *client.inner.session.write().await = None;
                    client.inner.store.clear().await?;
                    return Err(e);
                }
            }
        } else {
            client
                .session()
                .await
                .ok_or_else(|| NimbusError::Session("session vanished while resuming".to_string()))?
        };

        schedule_refresh(client).await;
        tracing::info!("Resumed session for {}", username);
        client.emit(SessionEvent::Connected { username });
        Ok(Some(session))
    }

    /// Re-login now with the remembered credentials
    pub async fn refresh(&self) -> Result<Session, NimbusError> {
        relogin(self.scope.client, true).await
    }

    /// Invalidate the token server-side and end the session
    pub async fn logout(&self) -> Result<(), NimbusError> {
        let client = self.scope.client;
        let token = match &self.scope.ctx.token {
            Some(token) => Some(token.clone()),
            None => client.session().await.map(|s| s.access_token),
        };

        let result = match token {
            Some(token) => {
                let url = self
                    .scope
                    .realm_url(Service::Auth)
                    .await?
                    .segment("logout")
                    .build()?;
                let request = ApiRequest::new(Method::POST, url).bearer(Some(token));
                client
                    .inner
                    .transport
                    .send_json::<IgnoredAny>(request)
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };

        end_session(client, SessionEvent::Disconnected).await?;
        result
    }

    /// End the session locally without calling the server
    pub async fn disconnect(&self) -> Result<(), NimbusError> {
        end_session(self.scope.client, SessionEvent::Disconnected).await
    }

    /// Change a user's password
    ///
    /// When the user is the session user and credentials are remembered, the
    /// remembered password is updated too.
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), NimbusError> {
        require_non_empty("username", username)?;
        require_non_empty("old_password", old_password)?;
        require_non_empty("new_password", new_password)?;

        let url = self
            .scope
            .realm_url(Service::Auth)
            .await?
            .segment("users")
            .segment(username)
            .segment("password")
            .build()?;
        let body = ChangePasswordRequest {
            old_password,
            new_password,
        };
        self.scope
            .send_json::<IgnoredAny, _>(Method::PUT, url, &body)
            .await?;

        let client = self.scope.client;
        let updated = {
            let mut guard = client.inner.session.write().await;
            match guard.as_mut() {
                Some(session) if session.username == username && session.can_relogin() => {
                    session.credentials = Some(Credentials {
                        password: SecretString::new(new_password.to_string()),
                    });
                    Some(session.clone())
                }
                _ => None,
            }
        };
        if let Some(session) = updated {
            client.inner.store.save(&session).await?;
        }

        tracing::info!("Password changed for {}", username);
        Ok(())
    }

    /// Ask the server whether a token is valid
    pub async fn validate_token(&self, token: &str) -> Result<TokenInfo, NimbusError> {
        require_non_empty("token", token)?;
        let url = self.scope.realm_url(Service::Auth).await?.segment("token").build()?;
        let request = ApiRequest::new(Method::GET, url).bearer(Some(token.to_string()));
        self.scope.client.inner.transport.send_json(request).await
    }
}

async fn login_request(
    client: &NimbusClient,
    scope: &Scope<'_>,
    account: &str,
    realm: &str,
    username: &str,
    password: &str,
    track_activity: bool,
) -> Result<LoginResponse, NimbusError> {
    require_non_empty("username", username)?;
    require_non_empty("password", password)?;

    let mut url = UrlBuilder::new(client.config(), Service::Auth)
        .account(account)
        .realm(realm)
        .segment("login");
    if let Some(id) = &scope.ctx.transaction_id {
        url = url.transaction_id(id.clone());
    }
    let url = url.build()?;

    tracing::debug!("Logging in {} to {}/{}", username, account, realm);
    let mut request = ApiRequest::new(Method::POST, url).json(&LoginRequest { username, password })?;
    if !track_activity {
        request = request.untracked();
    }
    let response: LoginResponse = client.inner.transport.send_json(request).await?;

    if response.access_token.is_empty() {
        return Err(NimbusError::Api(ApiError::Parse(
            "login response carried an empty access token".to_string(),
        )));
    }
    tracing::debug!(
        "Login succeeded: token length={}, expires_in={}s",
        response.access_token.len(),
        response.expires_in
    );
    Ok(response)
}

/// Absolute expiry for a token valid `expires_in` seconds from `now`
fn token_expiry(now: DateTime<Utc>, expires_in: u64) -> Result<DateTime<Utc>, NimbusError> {
    i64::try_from(expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            NimbusError::Api(ApiError::Parse(format!(
                "login response carried an out of range expires_in: {}",
                expires_in
            )))
        })
}

/// Token for a session-scoped call, re-logging-in when it is about to expire
pub(crate) async fn ensure_fresh_token(client: &NimbusClient) -> Result<String, NimbusError> {
    let session = client
        .session()
        .await
        .ok_or_else(|| NimbusError::Session("not connected".to_string()))?;

    if !session.expires_within(client.config().refresh_margin) {
        return Ok(session.access_token);
    }

    if session.can_relogin() {
        tracing::debug!("Access token expires soon, re-logging-in before the call");
        return relogin(client, false).await.map(|s| s.access_token);
    }

    if session.is_expired() {
        Err(NimbusError::Session("access token expired".to_string()))
    } else {
        Ok(session.access_token)
    }
}

/// Re-login with remembered credentials and store the new token
///
/// Concurrent callers are serialized. Unless `force` is set, a caller that
/// finds the token already renewed by someone else returns it as is.
pub(crate) async fn relogin(client: &NimbusClient, force: bool) -> Result<Session, NimbusError> {
    let _guard = client.inner.relogin.lock().await;

    let before = client
        .session()
        .await
        .ok_or_else(|| NimbusError::Session("not connected".to_string()))?;
    if !force && !before.expires_within(client.config().refresh_margin) {
        return Ok(before);
    }

    let credentials = before
        .credentials
        .clone()
        .ok_or_else(|| NimbusError::Session("no credentials remembered for re-login".to_string()))?;

    // Re-logins are not caller activity and must not postpone the inactivity timeout.
    let scope = client.scope();
    let response = login_request(
        client,
        &scope,
        &before.account,
        &before.realm,
        &before.username,
        credentials.password.expose_secret(),
        false,
    )
    .await?;
    let expires_at = token_expiry(Utc::now(), response.expires_in)?;

    let session = {
        let mut guard = client.inner.session.write().await;
        let Some(current) = guard.as_mut() else {
            return Err(NimbusError::Session("disconnected during re-login".to_string()));
        };
        if current.username != before.username {
            return Err(NimbusError::Session("session changed during re-login".to_string()));
        }
        current.access_token = response.access_token;
        current.expires_at = expires_at;
        current.last_active = client.inner.activity.last();
        if response.user_id.is_some() {
            current.user_id = response.user_id;
        }
        current.clone()
    };

    client.inner.store.save(&session).await?;
    tracing::info!("Access token refreshed, expires_at={}", session.expires_at);
    client.emit(SessionEvent::Refreshed {
        expires_at: session.expires_at,
    });
    Ok(session)
}

/// Stop the refresh task, clear the session everywhere and notify
pub(crate) async fn end_session(client: &NimbusClient, event: SessionEvent) -> Result<(), NimbusError> {
    stop_refresh(client).await;
    *client.inner.session.write().await = None;
    client.inner.store.clear().await?;
    tracing::info!("Session ended: {:?}", event);
    client.emit(event);
    Ok(())
}

async fn stop_refresh(client: &NimbusClient) {
    let task = client.inner.refresh_task.lock().await.take();
    if let Some(task) = task {
        task.stop.cancel();
        let _ = task.handle.await;
    }
}

pub(crate) async fn schedule_refresh(client: &NimbusClient) {
    let stop = CancellationToken::new();
    let handle = tokio::spawn(refresh_loop(Arc::downgrade(&client.inner), stop.child_token()));

    let previous = client
        .inner
        .refresh_task
        .lock()
        .await
        .replace(RefreshTask { stop, handle });
    if let Some(previous) = previous {
        previous.stop.cancel();
    }
}

/// Lower bound between scheduled re-logins, for tokens shorter than the margin
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

enum Next {
    Wait,
    Retry(Duration),
    Stop,
}

async fn refresh_loop(inner: Weak<crate::nimbus_api::client::ClientInner>, stop: CancellationToken) {
    let mut retry = None;

    loop {
        let (delay, refresh_due) = match retry.take() {
            Some(delay) => (delay, true),
            None => {
                let Some(inner) = inner.upgrade() else { return };
                let client = NimbusClient { inner };
                let Some(session) = client.session().await else { return };
                next_wake(&client, &session)
            }
        };

        tracing::debug!("Next session check in {:?}", delay);
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(strong) = inner.upgrade() else { return };
        let client = NimbusClient { inner: strong };
        match refresh_step(&client, &stop, refresh_due).await {
            Next::Wait => {}
            Next::Retry(delay) => retry = Some(delay),
            Next::Stop => return,
        }
    }
}

/// Sleep until the re-login point or the inactivity deadline, whichever is first
///
/// The flag tells whether the re-login point is the one being waited for.
fn next_wake(client: &NimbusClient, session: &Session) -> (Duration, bool) {
    let refresh = if session.can_relogin() {
        session
            .refresh_delay(client.config().refresh_margin)
            .max(MIN_REFRESH_DELAY)
    } else {
        session.remaining()
    };

    match session.until_inactive(client.inner.activity.last(), Utc::now()) {
        Some(idle) if idle < refresh => (idle, false),
        _ => (refresh, true),
    }
}

async fn refresh_step(client: &NimbusClient, stop: &CancellationToken, refresh_due: bool) -> Next {
    let Some(session) = client.session().await else {
        return Next::Stop;
    };

    if session.is_inactive(client.inner.activity.last(), Utc::now()) {
        tracing::info!("No activity within the inactivity timeout, ending session");
        detach_and_end(client, SessionEvent::InactivityTimeout).await;
        return Next::Stop;
    }

    if !session.can_relogin() {
        if session.is_expired() {
            detach_and_end(client, SessionEvent::Expired).await;
            return Next::Stop;
        }
        return Next::Wait;
    }

    if !refresh_due {
        return Next::Wait;
    }

    match relogin(client, true).await {
        Ok(_) if stop.is_cancelled() => Next::Stop,
        Ok(_) => Next::Wait,
        Err(e) => {
            tracing::warn!("Scheduled re-login failed: {}", e);
            client.emit(SessionEvent::RefreshFailed {
                message: e.to_string(),
            });

            let Some(current) = client.session().await else {
                return Next::Stop;
            };
            if current.is_expired() {
                detach_and_end(client, SessionEvent::Expired).await;
                return Next::Stop;
            }
            Next::Retry(
                client
                    .config()
                    .refresh_retry_delay
                    .min(current.remaining()),
            )
        }
    }
}

/// End the session from inside the refresh task without awaiting itself
async fn detach_and_end(client: &NimbusClient, event: SessionEvent) {
    // Dropping our own handle detaches the task; it returns right after.
    drop(client.inner.refresh_task.lock().await.take());
    *client.inner.session.write().await = None;
    if let Err(e) = client.inner.store.clear().await {
        tracing::error!("Failed to clear persisted session: {}", e);
    }
    tracing::info!("Session ended: {:?}", event);
    client.emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_defaults() {
        let options = ConnectOptions::default();
        assert!(options.remember_credentials);
        assert!(options.inactivity_timeout.is_none());

        let options = options
            .with_inactivity_timeout(Duration::from_secs(900))
            .remember_credentials(false);
        assert_eq!(options.inactivity_timeout, Some(Duration::from_secs(900)));
        assert!(!options.remember_credentials);
    }

    #[test]
    fn test_login_request_serialization() {
        let json = serde_json::to_value(LoginRequest {
            username: "alice",
            password: "pw",
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"username": "alice", "password": "pw"}));
    }

    #[test]
    fn test_token_expiry_adds_lifetime() {
        let now = Utc::now();
        let expires_at = token_expiry(now, 3600).unwrap();
        assert_eq!(expires_at - now, chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_token_expiry_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        for expires_in in [10_000_000_000_000, i64::MAX as u64, u64::MAX] {
            match token_expiry(now, expires_in) {
                Err(NimbusError::Api(ApiError::Parse(message))) => {
                    assert!(message.contains("expires_in"), "{}", message)
                }
                other => panic!("unexpected result for {}: {:?}", expires_in, other),
            }
        }
    }
}
