//! Connection lifecycle: decides which credentials are live and owns the
//! single `GraphClient` bound to them.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::auth::{Credentials, RuntimeConfig};
use crate::client::{DEFAULT_BASE_URL, GraphClient};
use crate::error::{Error, Result};
use crate::source::{CredentialSource, Origin, default_chain};
use crate::store::{CredentialStore, LOCAL_ACCESS_TOKEN_KEY, LOCAL_AD_ACCOUNT_ID_KEY, LocalStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// True only while a resolution or persistence step is outstanding.
    pub loading: bool,
    /// Last non-fatal message for the user.
    pub error: Option<String>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Result of an explicit `connect`.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    /// Adopted locally but the durable copy could not be written.
    ConnectedUnsaved(Error),
    /// Nothing adopted.
    Rejected(Error),
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// How clients built by the resolver reach the Graph API.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_BASE_URL.to_string(),
            timeout: None,
        }
    }
}

pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
    store: Arc<dyn CredentialStore>,
    local: Arc<dyn LocalStorage>,
    options: ClientOptions,
    state: ConnectionState,
    credentials: Option<Credentials>,
    origin: Option<Origin>,
    client: Option<GraphClient>,
}

impl CredentialResolver {
    /// Resolver over the standard chain: runtime config, server record,
    /// local fallback.
    pub fn new(
        config: RuntimeConfig,
        store: Arc<dyn CredentialStore>,
        local: Arc<dyn LocalStorage>,
        options: ClientOptions,
    ) -> Self {
        let sources = default_chain(config, store.clone(), local.clone());
        Self::with_sources(sources, store, local, options)
    }

    pub fn with_sources(
        sources: Vec<Box<dyn CredentialSource>>,
        store: Arc<dyn CredentialStore>,
        local: Arc<dyn LocalStorage>,
        options: ClientOptions,
    ) -> Self {
        Self {
            sources,
            store,
            local,
            options,
            state: ConnectionState::default(),
            credentials: None,
            origin: None,
            client: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    /// The live client, if any. Gone after `disconnect`.
    pub fn client(&self) -> Option<&GraphClient> {
        self.client.as_ref()
    }

    pub fn require_client(&self) -> Result<&GraphClient> {
        self.client.as_ref().ok_or(Error::NotConnected)
    }

    /// Walks the source chain once and adopts the first usable pair.
    ///
    /// A source that has nothing, fails, or yields an invalid pair is
    /// skipped. Local fallback adoption goes through `connect` so the
    /// server record is rewritten. Running out of sources is not an error.
    pub async fn initialize(&mut self) -> Option<Origin> {
        self.begin();
        let mut last_failure = None;

        for idx in 0..self.sources.len() {
            let origin = self.sources[idx].origin();
            let resolved = match self.sources[idx].resolve().await {
                Ok(Some(credentials)) => credentials,
                Ok(None) => {
                    debug!("no credentials from {origin}");
                    continue;
                }
                Err(err) => {
                    warn!("failed to read credentials from {origin}: {err}");
                    last_failure = Some(format!("{origin}: {err}"));
                    continue;
                }
            };

            if let Err(err) = resolved.validate() {
                warn!("ignoring credentials from {origin}: {err}");
                continue;
            }

            if origin == Origin::LocalFallback {
                if self.connect_from(resolved, origin).await.is_connected() {
                    return Some(origin);
                }
                continue;
            }

            match self.adopt(resolved, origin) {
                Ok(()) => {
                    self.state.loading = false;
                    return Some(origin);
                }
                Err(err) => {
                    warn!("could not build client from {origin}: {err}");
                    last_failure = Some(format!("{origin}: {err}"));
                }
            }
        }

        self.reset();
        self.state.error = last_failure;
        None
    }

    /// Adopts the pair immediately, then writes the server record and the
    /// local backup. A failed write does not undo the adoption.
    pub async fn connect(&mut self, access_token: &str, ad_account_id: &str) -> ConnectOutcome {
        self.begin();
        self.connect_from(Credentials::new(access_token, ad_account_id), Origin::Explicit)
            .await
    }

    /// Clears local state unconditionally. The returned error only reports
    /// that the durable copies may still exist.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.state.loading = true;
        let server = self.store.delete().await;
        let local = self.clear_local().await;

        self.reset();
        info!("disconnected");

        if let Err(err) = server.and(local) {
            warn!("failed to remove saved credentials: {err}");
            self.state.error = Some(format!("saved credentials could not be removed: {err}"));
            return Err(err);
        }
        Ok(())
    }

    /// Re-reads only the runtime configuration.
    pub async fn use_default_credentials(&mut self) -> bool {
        let Some(source) = self
            .sources
            .iter()
            .find(|s| s.origin() == Origin::RuntimeConfig)
        else {
            return false;
        };

        let credentials = match source.resolve().await {
            Ok(Some(credentials)) if credentials.validate().is_ok() => credentials,
            Ok(_) => return false,
            Err(err) => {
                warn!("failed to read runtime config: {err}");
                return false;
            }
        };

        match self.adopt(credentials, Origin::RuntimeConfig) {
            Ok(()) => true,
            Err(err) => {
                warn!("could not build client from runtime config: {err}");
                false
            }
        }
    }

    async fn connect_from(&mut self, credentials: Credentials, origin: Origin) -> ConnectOutcome {
        if let Err(err) = self.adopt(credentials.clone(), origin) {
            self.reset();
            self.state.error = Some(err.to_string());
            return ConnectOutcome::Rejected(err);
        }

        self.state.loading = true;
        let persisted = self.persist(&credentials).await;
        self.state.loading = false;

        match persisted {
            Ok(()) => ConnectOutcome::Connected,
            Err(err) => {
                warn!("connected, but saving credentials failed: {err}");
                self.state.error = Some(format!("credentials could not be saved: {err}"));
                ConnectOutcome::ConnectedUnsaved(err)
            }
        }
    }

    fn adopt(&mut self, credentials: Credentials, origin: Origin) -> Result<()> {
        credentials.validate()?;
        let client =
            GraphClient::with_base_url(&credentials, &self.options.endpoint, self.options.timeout)?;
        info!(
            "using ad account act_{} from {origin}",
            client.ad_account_id()
        );
        self.client = Some(client);
        self.credentials = Some(credentials);
        self.origin = Some(origin);
        self.state = ConnectionState {
            status: ConnectionStatus::Connected,
            loading: false,
            error: None,
        };
        Ok(())
    }

    async fn persist(&self, credentials: &Credentials) -> Result<()> {
        let server = self.store.save(credentials).await;
        let local = self.write_local(credentials).await;
        server.and(local)
    }

    async fn write_local(&self, credentials: &Credentials) -> Result<()> {
        self.local
            .set(LOCAL_ACCESS_TOKEN_KEY, &credentials.access_token)
            .await?;
        self.local
            .set(LOCAL_AD_ACCOUNT_ID_KEY, &credentials.ad_account_id)
            .await
    }

    async fn clear_local(&self) -> Result<()> {
        let token = self.local.remove(LOCAL_ACCESS_TOKEN_KEY).await;
        let account = self.local.remove(LOCAL_AD_ACCOUNT_ID_KEY).await;
        token.and(account)
    }

    fn begin(&mut self) {
        self.state.status = ConnectionStatus::Connecting;
        self.state.loading = true;
        self.state.error = None;
    }

    fn reset(&mut self) {
        self.client = None;
        self.credentials = None;
        self.origin = None;
        self.state = ConnectionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileCredentialStore;
    use crate::test_utils::{MockCredentialStore, MockLocalStorage};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runtime(token: &str, account: &str) -> RuntimeConfig {
        RuntimeConfig {
            access_token: Some(token.to_string()),
            ad_account_id: Some(account.to_string()),
        }
    }

    fn build(
        config: RuntimeConfig,
        store: &Arc<MockCredentialStore>,
        local: &Arc<MockLocalStorage>,
    ) -> CredentialResolver {
        CredentialResolver::new(
            config,
            store.clone(),
            local.clone(),
            ClientOptions::default(),
        )
    }

    async fn seed_local(local: &MockLocalStorage, token: &str, account: &str) {
        local.set(LOCAL_ACCESS_TOKEN_KEY, token).await.unwrap();
        local.set(LOCAL_AD_ACCOUNT_ID_KEY, account).await.unwrap();
    }

    #[tokio::test]
    async fn runtime_config_wins_without_consulting_other_sources() {
        let store = Arc::new(MockCredentialStore::with_record(Credentials::new("S", "2")));
        let local = Arc::new(MockLocalStorage::new());
        seed_local(&local, "L", "3").await;

        let mut resolver = build(runtime("R", "act_1"), &store, &local);
        assert_eq!(resolver.initialize().await, Some(Origin::RuntimeConfig));

        assert!(resolver.state().is_connected());
        assert_eq!(resolver.credentials(), Some(&Credentials::new("R", "1")));
        assert_eq!(store.load_calls(), 0);
        assert_eq!(local.get_calls(), 0);
    }

    #[tokio::test]
    async fn server_record_beats_local_fallback() {
        let store = Arc::new(MockCredentialStore::with_record(Credentials::new("S", "2")));
        let local = Arc::new(MockLocalStorage::new());
        seed_local(&local, "L", "3").await;

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert_eq!(resolver.initialize().await, Some(Origin::ServerRecord));

        assert_eq!(resolver.credentials(), Some(&Credentials::new("S", "2")));
        assert_eq!(local.get_calls(), 0);
        assert_eq!(store.save_calls(), 0);
    }

    #[tokio::test]
    async fn local_fallback_is_persisted_to_server() {
        let store = Arc::new(MockCredentialStore::new());
        let local = Arc::new(MockLocalStorage::new());
        seed_local(&local, "L", "act_3").await;

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert_eq!(resolver.initialize().await, Some(Origin::LocalFallback));

        assert!(resolver.state().is_connected());
        assert!(!resolver.state().loading);
        assert_eq!(store.record().await, Some(Credentials::new("L", "3")));
    }

    #[tokio::test]
    async fn no_sources_leaves_disconnected_without_error() {
        let store = Arc::new(MockCredentialStore::new());
        let local = Arc::new(MockLocalStorage::new());

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert_eq!(resolver.initialize().await, None);

        assert_eq!(resolver.state(), &ConnectionState::default());
        assert!(resolver.client().is_none());
    }

    #[tokio::test]
    async fn store_failure_falls_through_to_local() {
        let store = Arc::new(MockCredentialStore::new());
        store.set_load_error(Some("server down")).await;
        let local = Arc::new(MockLocalStorage::new());
        seed_local(&local, "L", "4").await;

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert_eq!(resolver.initialize().await, Some(Origin::LocalFallback));
        assert_eq!(resolver.state().error, None);
    }

    #[tokio::test]
    async fn store_failure_is_surfaced_when_nothing_resolves() {
        let store = Arc::new(MockCredentialStore::new());
        store.set_load_error(Some("server down")).await;
        let local = Arc::new(MockLocalStorage::new());

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert_eq!(resolver.initialize().await, None);

        assert!(!resolver.state().is_connected());
        let message = resolver.state().error.clone().unwrap();
        assert!(message.contains("server down"));
    }

    #[tokio::test]
    async fn prefixed_server_record_is_adopted_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"accessToken":"T","adAccountId":"act_9"}"#).unwrap();
        let local = Arc::new(MockLocalStorage::new());

        let mut resolver = CredentialResolver::new(
            RuntimeConfig::default(),
            Arc::new(FileCredentialStore::new(path)),
            local.clone(),
            ClientOptions::default(),
        );
        assert_eq!(resolver.initialize().await, Some(Origin::ServerRecord));

        assert_eq!(resolver.credentials().unwrap().ad_account_id, "9");
        assert_eq!(resolver.client().unwrap().ad_account_id(), "9");
    }

    #[tokio::test]
    async fn invalid_server_record_is_skipped() {
        let store = Arc::new(MockCredentialStore::with_record(Credentials::new("", "2")));
        let local = Arc::new(MockLocalStorage::new());
        seed_local(&local, "L", "5").await;

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert_eq!(resolver.initialize().await, Some(Origin::LocalFallback));
        assert_eq!(resolver.credentials(), Some(&Credentials::new("L", "5")));
    }

    #[tokio::test]
    async fn connect_then_get_account_uses_new_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_A1"))
            .and(query_param("access_token", "T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Shop"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MockCredentialStore::new());
        let local = Arc::new(MockLocalStorage::new());
        let mut resolver = CredentialResolver::new(
            RuntimeConfig::default(),
            store.clone(),
            local.clone(),
            ClientOptions {
                endpoint: server.uri(),
                timeout: None,
            },
        );

        let outcome = resolver.connect("T1", "act_A1").await;
        assert!(matches!(outcome, ConnectOutcome::Connected));
        assert_eq!(resolver.origin(), Some(Origin::Explicit));

        let account = resolver.require_client().unwrap().get_account().await.unwrap();
        assert_eq!(account["name"], "Shop");

        assert_eq!(store.record().await, Some(Credentials::new("T1", "A1")));
        let saved = local.snapshot().await;
        assert_eq!(saved.get(LOCAL_ACCESS_TOKEN_KEY).map(String::as_str), Some("T1"));
        assert_eq!(saved.get(LOCAL_AD_ACCOUNT_ID_KEY).map(String::as_str), Some("A1"));
    }

    #[tokio::test]
    async fn connect_rejects_empty_fields() {
        let store = Arc::new(MockCredentialStore::new());
        let local = Arc::new(MockLocalStorage::new());
        let mut resolver = build(RuntimeConfig::default(), &store, &local);

        let outcome = resolver.connect("", "123").await;
        assert!(matches!(
            outcome,
            ConnectOutcome::Rejected(Error::Validation { field: "access token" })
        ));
        assert!(!resolver.state().is_connected());
        assert!(resolver.state().error.is_some());
        assert!(resolver.client().is_none());
        assert_eq!(store.save_calls(), 0);
    }

    #[tokio::test]
    async fn connect_keeps_connection_when_save_fails() {
        let store = Arc::new(MockCredentialStore::new());
        store.set_save_error(Some("disk full")).await;
        let local = Arc::new(MockLocalStorage::new());
        let mut resolver = build(RuntimeConfig::default(), &store, &local);

        let outcome = resolver.connect("T1", "1").await;
        assert!(matches!(outcome, ConnectOutcome::ConnectedUnsaved(_)));
        assert!(outcome.is_connected());
        assert!(resolver.state().is_connected());
        assert!(resolver.client().is_some());
        assert!(resolver.state().error.as_deref().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn disconnect_clears_everything() {
        let store = Arc::new(MockCredentialStore::new());
        let local = Arc::new(MockLocalStorage::new());
        let mut resolver = build(RuntimeConfig::default(), &store, &local);

        assert!(resolver.connect("T1", "1").await.is_connected());
        resolver.disconnect().await.unwrap();

        assert!(!resolver.state().is_connected());
        assert!(resolver.client().is_none());
        assert!(matches!(resolver.require_client(), Err(Error::NotConnected)));
        assert!(store.record().await.is_none());
        assert!(local.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_local_state_even_if_server_delete_fails() {
        let store = Arc::new(MockCredentialStore::new());
        let local = Arc::new(MockLocalStorage::new());
        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert!(resolver.connect("T1", "1").await.is_connected());

        store.set_delete_error(Some("server down")).await;
        assert!(resolver.disconnect().await.is_err());

        assert!(!resolver.state().is_connected());
        assert!(resolver.client().is_none());
        assert!(local.snapshot().await.is_empty());
        assert!(resolver.state().error.is_some());
    }

    #[tokio::test]
    async fn use_default_credentials_only_reads_runtime_config() {
        let store = Arc::new(MockCredentialStore::with_record(Credentials::new("S", "2")));
        let local = Arc::new(MockLocalStorage::new());

        let mut resolver = build(RuntimeConfig::default(), &store, &local);
        assert!(!resolver.use_default_credentials().await);
        assert_eq!(store.load_calls(), 0);
        assert!(!resolver.state().is_connected());

        let mut resolver = build(runtime("R", "9"), &store, &local);
        assert!(resolver.use_default_credentials().await);
        assert_eq!(resolver.origin(), Some(Origin::RuntimeConfig));
        assert_eq!(store.load_calls(), 0);
    }
}
