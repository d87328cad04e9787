//! Credential storage
//!
//! `CredentialStore` is the persistence contract the manager and the OAuth
//! flow use: an async key → JSON map. Two implementations:
//!
//! - `LocalStorage`: a prefix-scoped adapter over a synchronous keyed backend
//!   (`KeyValueBackend`). The backend may be shared with unrelated data, so
//!   `clear` only removes keys under the adapter's prefix. `FileBackend` is
//!   the durable backend: a JSON file written atomically.
//! - `MemoryStorage`: a plain in-process map.
//!
//! Both give the same round trip: `save(k, v)` then `load(k)` returns `v`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::DEFAULT_STORAGE_PREFIX;
use crate::error::{Error, Result};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async key/value persistence for credentials.
///
/// All operations are idempotent per key. Errors from serialization or the
/// storage medium are always returned, never swallowed.
pub trait CredentialStore: Send + Sync {
    /// Persist `value` under `key`, replacing any previous value.
    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<Value>>;

    /// Most recently saved value for `key`, `None` if never saved or deleted.
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    /// Remove `key`. Returns whether a value was present.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Remove every value in this store's namespace.
    fn clear(&self) -> BoxFuture<'_, Result<()>>;
}

/// Serialize `value` and save it under `key`.
pub async fn save_as<T: Serialize>(store: &dyn CredentialStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_value(value)
        .map_err(|e| Error::CredentialParse(format!("serializing {key}: {e}")))?;
    store.save(key, json).await?;
    Ok(())
}

/// Load `key` and deserialize it.
pub async fn load_as<T: DeserializeOwned>(store: &dyn CredentialStore, key: &str) -> Result<Option<T>> {
    match store.load(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::CredentialParse(format!("parsing {key}: {e}"))),
        None => Ok(None),
    }
}

/// In-memory store for tests and non-persistent contexts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStorage {
    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            self.values
                .lock()
                .await
                .insert(key.to_string(), value.clone());
            Ok(value)
        })
    }

    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { Ok(self.values.lock().await.get(key).cloned()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.values.lock().await.remove(key).is_some()) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.values.lock().await.clear();
            Ok(())
        })
    }
}

/// Synchronous string key/value medium, possibly shared with other data.
pub trait KeyValueBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: String) -> Result<()>;
    /// Returns whether the key existed.
    fn remove_item(&self, key: &str) -> Result<bool>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// Prefix-scoped `CredentialStore` over a `KeyValueBackend`.
pub struct LocalStorage<B: KeyValueBackend> {
    backend: Arc<B>,
    prefix: String,
}

impl<B: KeyValueBackend> LocalStorage<B> {
    /// Adapter using the default `cozy:oauth:` prefix.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_prefix(backend, DEFAULT_STORAGE_PREFIX)
    }

    pub fn with_prefix(backend: Arc<B>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl LocalStorage<FileBackend> {
    /// Durable store backed by the JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(Arc::new(FileBackend::open(path)?)))
    }
}

impl<B: KeyValueBackend> CredentialStore for LocalStorage<B> {
    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let raw = serde_json::to_string(&value)
                .map_err(|e| Error::CredentialParse(format!("serializing {key}: {e}")))?;
            self.backend.set_item(&self.scoped(key), raw)?;
            Ok(value)
        })
    }

    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            match self.backend.get_item(&self.scoped(key))? {
                Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| Error::CredentialParse(format!("parsing {key}: {e}"))),
                _ => Ok(None),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { self.backend.remove_item(&self.scoped(key)) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for key in self.backend.keys()? {
                if key.starts_with(&self.prefix) {
                    self.backend.remove_item(&key)?;
                }
            }
            debug!(prefix = %self.prefix, "cleared storage namespace");
            Ok(())
        })
    }
}

/// JSON file holding a flat string → string map.
///
/// Every mutation rewrites the file atomically (temp file + rename) with
/// 0600 permissions, since it contains OAuth tokens. A std Mutex serializes
/// writers within the process.
pub struct FileBackend {
    path: PathBuf,
    items: std::sync::Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open the file at `path`, creating it as `{}` if it doesn't exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
            let items: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), keys = items.len(), "opened credential file");
            items
        } else {
            info!(path = %path.display(), "credential file not found, starting empty");
            let items = BTreeMap::new();
            write_atomic(&path, &items)?;
            items
        };
        Ok(Self {
            path,
            items: std::sync::Mutex::new(items),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.items
            .lock()
            .map_err(|_| Error::Storage("credential file lock poisoned".into()))
    }
}

impl KeyValueBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        let mut items = self.lock()?;
        items.insert(key.to_string(), value);
        write_atomic(&self.path, &items)
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        let mut items = self.lock()?;
        if items.remove(key).is_some() {
            write_atomic(&self.path, &items)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

/// Write the map to `path` atomically with owner-only permissions.
fn write_atomic(path: &Path, items: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(items)
        .map_err(|e| Error::CredentialParse(format!("serializing credential file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("credential path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Storage(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Storage(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential file");
    Ok(())
}
