//! Credential sources, tried by the resolver in priority order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{Credentials, RuntimeConfig};
use crate::error::Result;
use crate::store::{CredentialStore, LOCAL_ACCESS_TOKEN_KEY, LOCAL_AD_ACCOUNT_ID_KEY, LocalStorage};

/// Where the adopted credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    RuntimeConfig,
    ServerRecord,
    LocalFallback,
    Explicit,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RuntimeConfig => "runtime config",
            Self::ServerRecord => "server record",
            Self::LocalFallback => "local fallback",
            Self::Explicit => "explicit connect",
        };
        f.write_str(name)
    }
}

/// One link of the resolution chain.
///
/// `Ok(None)` means the source has nothing to offer; `Err` means it could
/// not be consulted.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn origin(&self) -> Origin;
    async fn resolve(&self) -> Result<Option<Credentials>>;
}

pub struct RuntimeConfigSource {
    config: RuntimeConfig,
}

impl RuntimeConfigSource {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialSource for RuntimeConfigSource {
    fn origin(&self) -> Origin {
        Origin::RuntimeConfig
    }

    async fn resolve(&self) -> Result<Option<Credentials>> {
        Ok(self.config.credentials())
    }
}

pub struct ServerRecordSource {
    store: Arc<dyn CredentialStore>,
}

impl ServerRecordSource {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialSource for ServerRecordSource {
    fn origin(&self) -> Origin {
        Origin::ServerRecord
    }

    async fn resolve(&self) -> Result<Option<Credentials>> {
        self.store.load().await
    }
}

pub struct LocalFallbackSource {
    storage: Arc<dyn LocalStorage>,
}

impl LocalFallbackSource {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CredentialSource for LocalFallbackSource {
    fn origin(&self) -> Origin {
        Origin::LocalFallback
    }

    async fn resolve(&self) -> Result<Option<Credentials>> {
        let token = self.storage.get(LOCAL_ACCESS_TOKEN_KEY).await?;
        let account = self.storage.get(LOCAL_AD_ACCOUNT_ID_KEY).await?;
        match (token, account) {
            (Some(token), Some(account)) if !token.is_empty() && !account.is_empty() => {
                Ok(Some(Credentials::new(token, account)))
            }
            _ => Ok(None),
        }
    }
}

/// Runtime config, then server record, then local fallback.
pub fn default_chain(
    config: RuntimeConfig,
    store: Arc<dyn CredentialStore>,
    storage: Arc<dyn LocalStorage>,
) -> Vec<Box<dyn CredentialSource>> {
    vec![
        Box::new(RuntimeConfigSource::new(config)),
        Box::new(ServerRecordSource::new(store)),
        Box::new(LocalFallbackSource::new(storage)),
    ]
}
