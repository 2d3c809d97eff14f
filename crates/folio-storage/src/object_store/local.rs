//! Local filesystem implementation of ObjectStore
//!
//! Objects are stored as files with the key as the relative path. Writes go to
//! a hidden temporary file that is renamed into place, so readers never see a
//! partially written object.

use super::{validate_key, ObjectMetadata, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use folio_core::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Local filesystem object store
pub struct LocalObjectStore {
    base_dir: PathBuf,
    temp_counter: AtomicU64,
}

impl LocalObjectStore {
    /// Create a new local object store
    ///
    /// Creates the base directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IoError` if directory creation fails
    pub async fn new(base_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Convert key to full filesystem path
    fn full_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// Strip base directory from path to get key
    fn path_to_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(segments.join("/"))
    }

    /// Recursively list all files under a directory, skipping in-flight temp files
    fn list_recursive<'a>(
        &'a self,
        dir: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<Vec<PathBuf>>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut results = Vec::new();

            let mut read_dir = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let hidden = entry.file_name().to_str().map_or(true, |n| n.starts_with('.'));
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };

                if metadata.is_file() && !hidden {
                    results.push(path);
                } else if metadata.is_dir() {
                    let mut sub_results = self.list_recursive(&path).await?;
                    results.append(&mut sub_results);
                }
            }

            Ok(results)
        })
    }

    fn not_found_or_io(key: &str, err: std::io::Error) -> CoreError {
        if err.kind() == std::io::ErrorKind::NotFound {
            CoreError::not_found("object", key)
        } else {
            CoreError::from(err)
        }
    }
}

fn modified_at(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .ok()
        .and_then(|t: SystemTime| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        validate_key(key)?;
        let path = self.full_path(key);

        let parent = path
            .parent()
            .ok_or_else(|| CoreError::internal(format!("object key `{key}` has no parent")))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::internal(format!("object key `{key}` has no file name")))?;
        let temp_path = parent.join(format!(
            ".{file_name}.{}.tmp",
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(err) = tokio::fs::write(&temp_path, &data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        validate_key(key)?;
        let data = tokio::fs::read(self.full_path(key))
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;

        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        validate_key(key)?;
        Ok(tokio::fs::try_exists(self.full_path(key)).await?)
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.full_path(key)).await {
            Ok(()) => Ok(()),
            // Idempotent - no error if file doesn't exist
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMetadata>> {
        let prefix = prefix.trim_end_matches('/');
        let prefix_path = if prefix.is_empty() {
            self.base_dir.clone()
        } else {
            validate_key(prefix)?;
            self.full_path(prefix)
        };

        let metadata_check = match tokio::fs::metadata(&prefix_path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let files = if metadata_check.is_file() {
            vec![prefix_path]
        } else if metadata_check.is_dir() {
            self.list_recursive(&prefix_path).await?
        } else {
            vec![]
        };

        let mut results = Vec::new();
        for path in files {
            // Entries may vanish between listing and stat under concurrent deletes.
            if let Ok(metadata) = tokio::fs::metadata(&path).await {
                if let Some(key) = self.path_to_key(&path) {
                    results.push(ObjectMetadata {
                        key,
                        size_bytes: metadata.len(),
                        last_modified: modified_at(&metadata),
                    });
                }
            }
        }
        results.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(results)
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        validate_key(key)?;
        let metadata = tokio::fs::metadata(self.full_path(key))
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size_bytes: metadata.len(),
            last_modified: modified_at(&metadata),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_store_put_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path()).await.unwrap();

        let data = Bytes::from("lexicon payload");
        store.put("corpora/en-core/1.0.0", data.clone()).await.unwrap();

        let retrieved = store.get("corpora/en-core/1.0.0").await.unwrap();
        assert_eq!(retrieved, data);
        assert!(store.exists("corpora/en-core/1.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_store_overwrite_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path()).await.unwrap();

        store.put("ns/key", Bytes::from("one")).await.unwrap();
        store.put("ns/key", Bytes::from("two")).await.unwrap();

        assert_eq!(store.get("ns/key").await.unwrap(), Bytes::from("two"));
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path().join("ns"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_local_store_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path()).await.unwrap();

        store.put("delete/me", Bytes::from("data")).await.unwrap();
        store.delete("delete/me").await.unwrap();
        assert!(!store.exists("delete/me").await.unwrap());

        store.delete("delete/me").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_store_list_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path()).await.unwrap();

        store.put("dictionary/run/1.0.0", Bytes::from("a")).await.unwrap();
        store.put("dictionary/run/1.0.1", Bytes::from("bb")).await.unwrap();
        store.put("corpora/en/1.0.0", Bytes::from("ccc")).await.unwrap();

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);

        let dictionary = store.list("dictionary/").await.unwrap();
        let keys: Vec<&str> = dictionary.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["dictionary/run/1.0.0", "dictionary/run/1.0.1"]);
        assert_eq!(dictionary[1].size_bytes, 2);

        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_store_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path()).await.unwrap();

        let result = store.get("nonexistent").await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));

        let result = store.head("nonexistent").await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path()).await.unwrap();

        let result = store.put("../outside", Bytes::from("data")).await;
        assert!(matches!(result, Err(CoreError::InvalidResource(_))));
    }
}
