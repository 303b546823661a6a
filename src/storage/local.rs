//! Local filesystem storage backend.
//!
//! Each bucket is a directory under a configurable root and each key is a
//! relative path inside it (`{root}/{bucket}/{key}`).
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::backend::{md5_hex, StorageBackend};
use crate::errors::{LakeError, Result};
use crate::path::validate_bucket_name;

/// Directory under the root that holds in-flight writes.
const TMP_DIR: &str = ".tmp";

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    /// Root directory; buckets are its subdirectories.
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        info!("Local storage backend rooted at {}", root.display());
        Ok(Self { root })
    }

    /// Resolve `(bucket, key)` to an absolute file path.
    ///
    /// Rejects keys that would land outside the bucket directory or that
    /// cannot name a regular file.
    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let invalid = |reason| LakeError::InvalidPath {
            path: key.to_string(),
            reason,
        };

        validate_bucket_name(bucket)?;
        if key.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if key.starts_with('/') {
            return Err(invalid("must be relative on the local backend"));
        }
        if key.ends_with('/') {
            return Err(invalid("must not end with '/' on the local backend"));
        }
        // Filesystem paths collapse `//` and `.`; distinct keys must not share a file.
        for segment in key.split('/') {
            match segment {
                "" => {
                    return Err(invalid("must not contain empty segments on the local backend"))
                }
                "." => {
                    return Err(invalid("must not contain '.' segments on the local backend"))
                }
                ".." => return Err(invalid("must not contain '..'")),
                _ => {}
            }
        }
        for component in Path::new(key).components() {
            if let Component::RootDir | Component::Prefix(_) = component {
                return Err(invalid("must be relative on the local backend"));
            }
        }

        Ok(self.root.join(bucket).join(key))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(TMP_DIR).join(format!("tmp-{id}"))
    }

    async fn write_atomic(&self, final_path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.temp_path();
        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, final_path).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }

    /// Collect every regular file below `dir` as a `/`-joined relative key.
    async fn walk_keys(dir: &Path) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(dir.to_path_buf(), String::new())];

        while let Some((current, rel)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_rel = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), child_rel));
                } else if file_type.is_file() {
                    keys.push(child_rel);
                }
            }
        }

        Ok(keys)
    }
}

/// The key's file path runs through an existing file, or names an
/// existing directory.
fn is_key_conflict(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AlreadyExists | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory
    )
}

/// No file at the path, either directly or because an ancestor is a file.
fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&bucket, &key)?;
            debug!("local put: {}", final_path.display());

            match self.write_atomic(&final_path, &data).await {
                Ok(()) => Ok(md5_hex(&data)),
                Err(err) if is_key_conflict(&err) => Err(LakeError::InvalidPath {
                    path: key,
                    reason: "conflicts with an existing object or prefix on the local backend",
                }),
                Err(err) => Err(anyhow::Error::new(err)
                    .context(format!("writing {}", final_path.display()))
                    .into()),
            }
        })
    }

    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&bucket, &key)?;
            debug!("local get: {}", path.display());

            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(err) if is_missing(&err) => Err(LakeError::not_found(&bucket, &key)),
                // A key naming a directory is not an object either.
                Err(_) if path.is_dir() => Err(LakeError::not_found(&bucket, &key)),
                Err(err) => Err(anyhow::Error::new(err)
                    .context(format!("reading {}", path.display()))
                    .into()),
            }
        })
    }

    fn exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&bucket, &key)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(err) if is_missing(&err) => Ok(false),
                Err(err) => Err(anyhow::Error::new(err).into()),
            }
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&bucket, &key)?;
            debug!("local delete: {}", path.display());

            // Idempotent: if the file doesn't exist, that's fine.
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if is_missing(&err) => Ok(()),
                Err(err) => Err(anyhow::Error::new(err).into()),
            }
        })
    }

    fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            validate_bucket_name(&bucket)?;
            let bucket_dir = self.root.join(&bucket);
            let mut keys = Self::walk_keys(&bucket_dir)
                .await
                .map_err(anyhow::Error::new)?;
            keys.retain(|key| key.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
