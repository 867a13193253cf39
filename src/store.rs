//! Durable copies of the adopted credentials.
//!
//! The server record is the primary copy and can live behind the internal
//! credentials API or in a local `credentials.json`. The local fallback is a
//! two-key backup read only by the resolver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::auth::Credentials;
use crate::error::{Error, Result};

pub const LOCAL_ACCESS_TOKEN_KEY: &str = "meta_access_token";
pub const LOCAL_AD_ACCOUNT_ID_KEY: &str = "meta_ad_account_id";

/// Persistence collaborator holding the saved credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, credentials: &Credentials) -> Result<()>;

    /// * `Ok(Some(credentials))` - a record exists
    /// * `Ok(None)` - nothing saved
    async fn load(&self) -> Result<Option<Credentials>>;

    /// Deleting an absent record succeeds.
    async fn delete(&self) -> Result<()>;
}

/// String key/value backup storage.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

// ===== HTTP credentials API =====

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

/// Talks to the internal credentials endpoint (`POST`/`GET`/`DELETE`).
///
/// Responses are `{ success, data?, message? }`; 404 means no record.
pub struct HttpCredentialStore {
    http: Client,
    url: String,
}

impl HttpCredentialStore {
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            url: url.trim().trim_end_matches('/').to_string(),
        })
    }

    async fn read_envelope<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
    ) -> Result<(StatusCode, Option<Envelope<T>>)> {
        let status = resp.status();
        let body = resp.text().await?;
        let envelope = serde_json::from_str::<Envelope<T>>(&body).ok();
        Ok((status, envelope))
    }
}

fn failure_message<T>(status: StatusCode, envelope: Option<&Envelope<T>>) -> String {
    envelope
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| format!("credentials api http {status}"))
}

#[async_trait]
impl CredentialStore for HttpCredentialStore {
    async fn save(&self, credentials: &Credentials) -> Result<()> {
        debug!("POST {}", self.url);
        let resp = self.http.post(&self.url).json(credentials).send().await?;
        let (status, envelope) = Self::read_envelope::<serde_json::Value>(resp).await?;

        if status == StatusCode::BAD_REQUEST {
            return Err(Error::Validation { field: "credentials" });
        }
        match envelope {
            Some(ref e) if status.is_success() && e.success => Ok(()),
            other => Err(Error::Persistence(failure_message(status, other.as_ref()))),
        }
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        debug!("GET {}", self.url);
        let resp = self.http.get(&self.url).send().await?;
        let (status, envelope) = Self::read_envelope::<Credentials>(resp).await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        match envelope {
            Some(e) if status.is_success() && e.success => Ok(e.data),
            other => Err(Error::Persistence(failure_message(status, other.as_ref()))),
        }
    }

    async fn delete(&self) -> Result<()> {
        debug!("DELETE {}", self.url);
        let resp = self.http.delete(&self.url).send().await?;
        let (status, envelope) = Self::read_envelope::<serde_json::Value>(resp).await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        match envelope {
            Some(ref e) if status.is_success() && e.success => Ok(()),
            other => Err(Error::Persistence(failure_message(status, other.as_ref()))),
        }
    }
}

// ===== File-backed stores =====

/// Keeps the record as pretty-printed JSON in a single file.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_string_pretty(credentials)?;
        write_file(&self.path, &json).await
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        let Some(contents) = read_file(&self.path).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Flat JSON object of string values on disk.
pub struct FileLocalStorage {
    path: PathBuf,
}

impl FileLocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match read_file(&self.path).await? {
            Some(contents) if !contents.trim().is_empty() => Ok(serde_json::from_str(&contents)?),
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        write_file(&self.path, &serde_json::to_string_pretty(map)?).await
    }
}

#[async_trait]
impl LocalStorage for FileLocalStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}

async fn read_file(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}
