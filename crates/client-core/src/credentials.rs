use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::Mutex;

pub const USER_TOKEN_KEY: &str = "userToken";
pub const USER_API_KEY_KEY: &str = "user_google_api_key";

pub type CredentialFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CredentialStoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("credential store io failed for {path}: {message}")]
    Io { path: String, message: String },
    #[error("credential store at {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },
}

/// Async string key-value storage for tokens and API keys.
pub trait CredentialStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> CredentialFuture<'a, Option<String>>;
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> CredentialFuture<'a, ()>;
    fn delete<'a>(&'a self, key: &'a str) -> CredentialFuture<'a, ()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get<'a>(&'a self, key: &'a str) -> CredentialFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }
}

/// Stores credentials as a flat JSON object on disk.
///
/// A missing file reads as empty. Writes go through a sibling temp file and a
/// rename so a crash mid-write never leaves a truncated store behind.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<BTreeMap<String, String>, CredentialStoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(self.io_error(err)),
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }

        serde_json::from_slice(&raw).map_err(|err| CredentialStoreError::Corrupt {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })
    }

    async fn write_entries(
        &self,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), CredentialStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.io_error(err))?;
        }

        let body = serde_json::to_vec_pretty(entries).map_err(|err| CredentialStoreError::Corrupt {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        tokio::fs::write(&temp_path, body)
            .await
            .map_err(|err| self.io_error(err))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|err| self.io_error(err))
    }

    fn io_error(&self, err: std::io::Error) -> CredentialStoreError {
        CredentialStoreError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get<'a>(&'a self, key: &'a str) -> CredentialFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.read_entries().await?.remove(key)) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut entries = self.read_entries().await?;
            entries.insert(key.to_string(), value.to_string());
            self.write_entries(&entries).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut entries = self.read_entries().await?;
            if entries.remove(key).is_none() {
                return Ok(());
            }
            self.write_entries(&entries).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CredentialStore, CredentialStoreError, FileCredentialStore, MemoryCredentialStore,
        USER_API_KEY_KEY, USER_TOKEN_KEY,
    };

    #[tokio::test]
    async fn memory_store_round_trips_and_deletes() {
        let store = MemoryCredentialStore::with_entries([(USER_TOKEN_KEY, "token-1")]);
        assert_eq!(
            store.get(USER_TOKEN_KEY).await.expect("get"),
            Some("token-1".to_string())
        );

        store.delete(USER_TOKEN_KEY).await.expect("delete");
        assert_eq!(store.get(USER_TOKEN_KEY).await.expect("get"), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.get(USER_API_KEY_KEY).await.expect("empty get"), None);
        store.set(USER_API_KEY_KEY, "byok-123").await.expect("set");
        store.set(USER_TOKEN_KEY, "token-9").await.expect("set");
        store.delete(USER_TOKEN_KEY).await.expect("delete");

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(
            reopened.get(USER_API_KEY_KEY).await.expect("get"),
            Some("byok-123".to_string())
        );
        assert_eq!(reopened.get(USER_TOKEN_KEY).await.expect("get"), None);
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"{not json").expect("seed corrupt file");

        let err = FileCredentialStore::new(&path)
            .get(USER_TOKEN_KEY)
            .await
            .expect_err("corrupt file should error");
        assert!(matches!(err, CredentialStoreError::Corrupt { .. }));
    }
}
