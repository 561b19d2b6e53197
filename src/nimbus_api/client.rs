use crate::nimbus_api::config::ClientConfig;
use crate::nimbus_api::session::{ActivityClock, Persistence, Session, SessionStore};
use crate::nimbus_api::transport::{ApiRequest, Download, Transport};
use crate::nimbus_api::types::{NimbusError, SessionEvent};
use crate::nimbus_api::url::{Service, UrlBuilder};
use crate::services::{
    action::Actions, admin::Admin, auth::Auth, broadcast::Broadcast, code::Code,
    context::Context, device::Devices, documents::Documents, eventhub::EventHub,
    locate::Locate, mailbox::Mailboxes, metrics::Metrics, push::Push, query::Queries,
    scope::Scopes, storage::Storage,
};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Background re-login task
pub(crate) struct RefreshTask {
    pub stop: CancellationToken,
    pub handle: JoinHandle<()>,
}

pub(crate) struct ClientInner {
    pub config: ClientConfig,
    pub transport: Transport,
    pub activity: Arc<ActivityClock>,
    pub session: RwLock<Option<Session>>,
    pub store: SessionStore,
    pub refresh_task: Mutex<Option<RefreshTask>>,
    /// Serializes re-logins so concurrent callers share one login round-trip
    pub relogin: Mutex<()>,
    pub events: broadcast::Sender<SessionEvent>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.get_mut().take() {
            task.stop.cancel();
        }
    }
}

/// Client for the Nimbus cloud API
///
/// Cheap to clone; clones share configuration, HTTP connection pool and
/// session. Service handles are obtained with the accessor methods
/// (`documents()`, `locate()`, ...) or through a [`Scope`] carrying per-call
/// overrides.
///
/// # Example
///
/// ```no_run
/// use nimbus_sdk::{ClientConfig, ConnectOptions, NimbusClient};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::new("https://api.nimbus.example")
///     .with_account("acme")
///     .with_realm("production");
/// let client = NimbusClient::new(config)?;
///
/// client
///     .auth()
///     .connect(
///         "alice",
///         "correct horse battery staple",
///         ConnectOptions::default().with_inactivity_timeout(Duration::from_secs(1800)),
///     )
///     .await?;
///
/// let doc = client.documents().get("orders", "order-42").await?;
/// println!("{}", doc.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NimbusClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl std::fmt::Debug for NimbusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NimbusClient")
            .field("host", &self.inner.config.host)
            .field("store", &self.inner.store)
            .finish()
    }
}

impl NimbusClient {
    /// Client whose sessions live in process memory only
    pub fn new(config: ClientConfig) -> Result<Self, NimbusError> {
        Self::with_store(config, SessionStore::with_backend(Arc::new(
            crate::storage::MemoryStorage::new(),
        )))
    }

    /// Client persisting sessions according to `persistence`
    pub async fn with_persistence(
        config: ClientConfig,
        persistence: &Persistence,
    ) -> Result<Self, NimbusError> {
        let store = SessionStore::open(persistence).await?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: ClientConfig, store: SessionStore) -> Result<Self, NimbusError> {
        config.validate()?;
        tracing::debug!("Creating NimbusClient with host: {}", config.host);

        let activity = Arc::new(ActivityClock::new());
        let transport = Transport::new(&config, activity.clone())?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                activity,
                session: RwLock::new(None),
                store,
                refresh_task: Mutex::new(None),
                relogin: Mutex::new(()),
                events,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Snapshot of the current session
    pub async fn session(&self) -> Option<Session> {
        self.inner.session.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.session.read().await.is_some()
    }

    /// Time of the last successful request
    pub fn last_active(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.activity.last()
    }

    /// Receive session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Scope resolving everything from the session and configuration
    pub fn scope(&self) -> Scope<'_> {
        Scope {
            client: self,
            ctx: CallContext::default(),
        }
    }

    /// Scope with explicit per-call overrides
    pub fn with_context(&self, ctx: CallContext) -> Scope<'_> {
        Scope { client: self, ctx }
    }

    pub fn auth(&self) -> Auth<'_> {
        self.scope().auth()
    }

    pub fn admin(&self) -> Admin<'_> {
        self.scope().admin()
    }

    pub fn documents(&self) -> Documents<'_> {
        self.scope().documents()
    }

    pub fn locate(&self) -> Locate<'_> {
        self.scope().locate()
    }

    pub fn actions(&self) -> Actions<'_> {
        self.scope().actions()
    }

    pub fn code(&self) -> Code<'_> {
        self.scope().code()
    }

    pub fn context(&self) -> Context<'_> {
        self.scope().context()
    }

    pub fn devices(&self) -> Devices<'_> {
        self.scope().devices()
    }

    pub fn eventhub(&self) -> EventHub<'_> {
        self.scope().eventhub()
    }

    pub fn mailboxes(&self) -> Mailboxes<'_> {
        self.scope().mailboxes()
    }

    pub fn metrics(&self) -> Metrics<'_> {
        self.scope().metrics()
    }

    pub fn push(&self) -> Push<'_> {
        self.scope().push()
    }

    pub fn queries(&self) -> Queries<'_> {
        self.scope().queries()
    }

    pub fn storage(&self) -> Storage<'_> {
        self.scope().storage()
    }

    pub fn scopes(&self) -> Scopes<'_> {
        self.scope().scopes()
    }

    pub fn broadcast(&self) -> Broadcast<'_> {
        self.scope().broadcast()
    }
}

/// Per-call overrides for the parameters normally taken from the session
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub account: Option<String>,
    pub realm: Option<String>,
    pub token: Option<String>,
    pub transaction_id: Option<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }
}

/// Parameter resolver shared by every service handle
///
/// Account, realm and token are resolved in the order: explicit
/// [`CallContext`] value, current session, client configuration.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub(crate) client: &'a NimbusClient,
    pub(crate) ctx: CallContext,
}

impl<'a> Scope<'a> {
    pub fn client(&self) -> &'a NimbusClient {
        self.client
    }

    pub fn call_context(&self) -> &CallContext {
        &self.ctx
    }

    pub(crate) fn config(&self) -> &'a ClientConfig {
        &self.client.inner.config
    }

    pub async fn account(&self) -> Result<String, NimbusError> {
        if let Some(account) = &self.ctx.account {
            return Ok(account.clone());
        }
        if let Some(session) = self.client.inner.session.read().await.as_ref() {
            return Ok(session.account.clone());
        }
        self.config()
            .account
            .clone()
            .ok_or_else(|| NimbusError::Validation("account is required".to_string()))
    }

    pub async fn realm(&self) -> Result<String, NimbusError> {
        if let Some(realm) = &self.ctx.realm {
            return Ok(realm.clone());
        }
        if let Some(session) = self.client.inner.session.read().await.as_ref() {
            return Ok(session.realm.clone());
        }
        self.config()
            .realm
            .clone()
            .ok_or_else(|| NimbusError::Validation("realm is required".to_string()))
    }

    /// Access token for the call, re-logging-in first if it is about to expire
    pub async fn token(&self) -> Result<String, NimbusError> {
        if let Some(token) = &self.ctx.token {
            return Ok(token.clone());
        }
        crate::services::auth::ensure_fresh_token(self.client).await
    }

    /// URL builder for `{service}/{version}/{account}/{realm}`
    pub(crate) async fn realm_url(&self, service: Service) -> Result<UrlBuilder<'a>, NimbusError> {
        let account = self.account().await?;
        let realm = self.realm().await?;
        Ok(self.base_url(service).account(account).realm(realm))
    }

    /// URL builder for `{service}/{version}/{account}`
    pub(crate) async fn account_url(&self, service: Service) -> Result<UrlBuilder<'a>, NimbusError> {
        let account = self.account().await?;
        Ok(self.base_url(service).account(account))
    }

    fn base_url(&self, service: Service) -> UrlBuilder<'a> {
        let builder = UrlBuilder::new(self.config(), service);
        match &self.ctx.transaction_id {
            Some(id) => builder.transaction_id(id.clone()),
            None => builder,
        }
    }

    /// Authenticated request without a body
    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
    ) -> Result<T, NimbusError> {
        let token = self.token().await?;
        let request = ApiRequest::new(method, url).bearer(Some(token));
        self.client.inner.transport.send_json(request).await
    }

    /// Authenticated request with a JSON body
    pub(crate) async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T, NimbusError> {
        let token = self.token().await?;
        let request = ApiRequest::new(method, url).bearer(Some(token)).json(body)?;
        self.client.inner.transport.send_json(request).await
    }

    /// Authenticated request with a raw body
    pub(crate) async fn send_bytes<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<T, NimbusError> {
        let token = self.token().await?;
        let request = ApiRequest::new(method, url)
            .bearer(Some(token))
            .bytes(data, content_type);
        self.client.inner.transport.send_json(request).await
    }

    /// Authenticated request returning a raw body
    pub(crate) async fn fetch_bytes(&self, url: Url) -> Result<Download, NimbusError> {
        let token = self.token().await?;
        let request = ApiRequest::new(Method::GET, url).bearer(Some(token));
        self.client.inner.transport.fetch_bytes(request).await
    }

    pub fn auth(self) -> Auth<'a> {
        Auth::new(self)
    }

    pub fn admin(self) -> Admin<'a> {
        Admin::new(self)
    }

    pub fn documents(self) -> Documents<'a> {
        Documents::new(self)
    }

    pub fn locate(self) -> Locate<'a> {
        Locate::new(self)
    }

    pub fn actions(self) -> Actions<'a> {
        Actions::new(self)
    }

    pub fn code(self) -> Code<'a> {
        Code::new(self)
    }

    pub fn context(self) -> Context<'a> {
        Context::new(self)
    }

    pub fn devices(self) -> Devices<'a> {
        Devices::new(self)
    }

    pub fn eventhub(self) -> EventHub<'a> {
        EventHub::new(self)
    }

    pub fn mailboxes(self) -> Mailboxes<'a> {
        Mailboxes::new(self)
    }

    pub fn metrics(self) -> Metrics<'a> {
        Metrics::new(self)
    }

    pub fn push(self) -> Push<'a> {
        Push::new(self)
    }

    pub fn queries(self) -> Queries<'a> {
        Queries::new(self)
    }

    pub fn storage(self) -> Storage<'a> {
        Storage::new(self)
    }

    pub fn scopes(self) -> Scopes<'a> {
        Scopes::new(self)
    }

    pub fn broadcast(self) -> Broadcast<'a> {
        Broadcast::new(self)
    }
}
