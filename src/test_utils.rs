//! In-memory stores for resolver tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::auth::Credentials;
use crate::error::{Error, Result};
use crate::store::{CredentialStore, LocalStorage};

// ===== MockCredentialStore =====

pub struct MockCredentialStore {
    record: RwLock<Option<Credentials>>,
    /// If Some, the matching operation fails with this message.
    load_error: RwLock<Option<String>>,
    save_error: RwLock<Option<String>>,
    delete_error: RwLock<Option<String>>,
    load_calls: AtomicUsize,
    save_calls: AtomicUsize,
}

impl MockCredentialStore {
    pub fn new() -> Self {
        Self {
            record: RwLock::new(None),
            load_error: RwLock::new(None),
            save_error: RwLock::new(None),
            delete_error: RwLock::new(None),
            load_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_record(credentials: Credentials) -> Self {
        let store = Self::new();
        *store.record.try_write().expect("fresh lock") = Some(credentials);
        store
    }

    pub async fn record(&self) -> Option<Credentials> {
        self.record.read().await.clone()
    }

    pub async fn set_load_error(&self, err: Option<&str>) {
        *self.load_error.write().await = err.map(str::to_string);
    }

    pub async fn set_save_error(&self, err: Option<&str>) {
        *self.save_error.write().await = err.map(str::to_string);
    }

    pub async fn set_delete_error(&self, err: Option<&str>) {
        *self.delete_error.write().await = err.map(str::to_string);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn save(&self, credentials: &Credentials) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref msg) = *self.save_error.read().await {
            return Err(Error::Persistence(msg.clone()));
        }
        *self.record.write().await = Some(credentials.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref msg) = *self.load_error.read().await {
            return Err(Error::Persistence(msg.clone()));
        }
        Ok(self.record.read().await.clone())
    }

    async fn delete(&self) -> Result<()> {
        if let Some(ref msg) = *self.delete_error.read().await {
            return Err(Error::Persistence(msg.clone()));
        }
        *self.record.write().await = None;
        Ok(())
    }
}

// ===== MockLocalStorage =====

pub struct MockLocalStorage {
    values: RwLock<HashMap<String, String>>,
    get_calls: AtomicUsize,
}

impl MockLocalStorage {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().await.clone()
    }
}

#[async_trait]
impl LocalStorage for MockLocalStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}
