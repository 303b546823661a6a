//! The data lake: file and string transfer against a storage backend.
//!
//! [`DataLake`] is the capability pipeline code depends on.  [`Lake`] is its
//! implementation over any [`StorageBackend`]: it fills in the default
//! bucket, prefixes keys with the configured root, and moves bytes between
//! the backend and local files.

use bytes::Bytes;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{LakeError, Result};
use crate::metrics;
use crate::path::{
    normalize_root, object_key, strip_root, validate_bucket_name, validate_bucket_path,
};
use crate::storage::backend::StorageBackend;

/// Upload and download objects by bucket path.
///
/// `bucket_name = None` targets the configured default bucket.  Every
/// operation either completes or returns a [`LakeError`]; a read of a path
/// that was never written fails with [`LakeError::NotFound`].
pub trait DataLake: Send + Sync {
    /// Store the contents of `local_path` at `bucket_path`, replacing any
    /// existing object.
    fn upload(
        &self,
        bucket_path: &str,
        local_path: &Path,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Store the UTF-8 bytes of `content` at `bucket_path`.
    fn upload_string(
        &self,
        bucket_path: &str,
        content: &str,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Write the object at `bucket_path` to `destination`.
    ///
    /// Parent directories are created and an existing file is replaced.  On
    /// failure the destination is left as it was.
    fn download(
        &self,
        bucket_path: &str,
        destination: &Path,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Fetch the object at `bucket_path` as a UTF-8 string.
    fn download_string(
        &self,
        bucket_path: &str,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// [`DataLake`] over a [`StorageBackend`].  Cheap to clone.
#[derive(Clone)]
pub struct Lake {
    backend: Arc<dyn StorageBackend>,
    default_bucket: String,
    /// Normalized key prefix; empty for none.
    root: String,
}

impl Lake {
    /// Create a lake writing to `default_bucket` unless a call names another.
    pub fn new(backend: Arc<dyn StorageBackend>, default_bucket: impl Into<String>) -> Result<Self> {
        let default_bucket = default_bucket.into();
        validate_bucket_name(&default_bucket)?;
        Ok(Self {
            backend,
            default_bucket,
            root: String::new(),
        })
    }

    /// Prefix every bucket path with `root` (slashes at either end ignored).
    pub fn with_root(mut self, root: &str) -> Self {
        self.root = normalize_root(root);
        self
    }

    /// Build the backend and lake described by `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backend = crate::storage::from_config(&config.storage).await?;
        let lake =
            Lake::new(backend, config.lake.bucket.clone())?.with_root(&config.lake.root_path);
        info!(
            "Data lake ready: backend={} bucket={} root='{}'",
            lake.backend_name(),
            lake.default_bucket,
            lake.root
        );
        Ok(lake)
    }

    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether an object is stored at `bucket_path`.
    pub async fn exists(&self, bucket_path: &str, bucket_name: Option<&str>) -> Result<bool> {
        self.observed("exists", async {
            let (bucket, key) = self.resolve(bucket_path, bucket_name)?;
            self.backend.exists(&bucket, &key).await
        })
        .await
    }

    /// Bucket paths under `prefix`, relative to the root, sorted.
    pub async fn list(&self, prefix: &str, bucket_name: Option<&str>) -> Result<Vec<String>> {
        self.observed("list", async {
            let bucket = bucket_name.unwrap_or(&self.default_bucket);
            validate_bucket_name(bucket)?;

            let keys = self
                .backend
                .list(bucket, &object_key(&self.root, prefix))
                .await?;
            Ok(keys
                .iter()
                .filter_map(|key| strip_root(&self.root, key))
                .map(str::to_string)
                .collect())
        })
        .await
    }

    /// Pick the bucket and the stored key for a call.
    fn resolve(&self, bucket_path: &str, bucket_name: Option<&str>) -> Result<(String, String)> {
        let bucket = bucket_name.unwrap_or(&self.default_bucket);
        validate_bucket_name(bucket)?;
        validate_bucket_path(bucket_path)?;
        Ok((bucket.to_string(), object_key(&self.root, bucket_path)))
    }

    /// Run `fut` as lake operation `operation`, recording metrics and
    /// logging failures.
    async fn observed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = fut.await;
        metrics::record_operation(operation, self.backend.name(), &result, start.elapsed());

        if let Err(ref err) = result {
            if err.is_not_found() {
                debug!("{} {}: {}", self.backend.name(), operation, err);
            } else {
                warn!("{} {} failed: {}", self.backend.name(), operation, err);
            }
        }
        result
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let len = data.len();
        let md5 = self.backend.put(bucket, key, data).await?;
        metrics::record_bytes_uploaded(len);
        info!("Stored {}/{} ({} bytes, md5={})", bucket, key, len, md5);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let data = self.backend.get(bucket, key).await?;
        metrics::record_bytes_downloaded(data.len());
        debug!("Fetched {}/{} ({} bytes)", bucket, key, data.len());
        Ok(data)
    }
}

impl DataLake for Lake {
    fn upload(
        &self,
        bucket_path: &str,
        local_path: &Path,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let resolved = self.resolve(bucket_path, bucket_name);
        let local_path = local_path.to_path_buf();
        Box::pin(self.observed("upload", async move {
            let (bucket, key) = resolved?;
            let data = tokio::fs::read(&local_path)
                .await
                .map_err(|e| LakeError::local_io(&local_path, e))?;
            self.put_object(&bucket, &key, Bytes::from(data)).await
        }))
    }

    fn upload_string(
        &self,
        bucket_path: &str,
        content: &str,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let resolved = self.resolve(bucket_path, bucket_name);
        let data = Bytes::copy_from_slice(content.as_bytes());
        Box::pin(self.observed("upload_string", async move {
            let (bucket, key) = resolved?;
            self.put_object(&bucket, &key, data).await
        }))
    }

    fn download(
        &self,
        bucket_path: &str,
        destination: &Path,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let resolved = self.resolve(bucket_path, bucket_name);
        let destination = destination.to_path_buf();
        Box::pin(self.observed("download", async move {
            let (bucket, key) = resolved?;
            let data = self.get_object(&bucket, &key).await?;
            write_local_atomic(&destination, &data)
                .await
                .map_err(|e| LakeError::local_io(&destination, e))
        }))
    }

    fn download_string(
        &self,
        bucket_path: &str,
        bucket_name: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let resolved = self.resolve(bucket_path, bucket_name);
        Box::pin(self.observed("download_string", async move {
            let (bucket, key) = resolved?;
            let data = self.get_object(&bucket, &key).await?;
            String::from_utf8(data.to_vec()).map_err(|source| LakeError::Decode {
                bucket,
                path: key,
                source,
            })
        }))
    }
}

/// Write `data` to `destination` through a temp file in the same directory,
/// so readers never observe a partial file.
async fn write_local_atomic(destination: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = destination.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination does not name a file",
        )
    })?;

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let tmp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4()
    ));
    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, destination).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalBackend;
    use crate::storage::memory::MemoryBackend;

    fn memory_lake() -> Lake {
        Lake::new(Arc::new(MemoryBackend::default()), "grwdt-dev-lake").unwrap()
    }

    fn local_lake() -> (tempfile::TempDir, Lake) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = LocalBackend::new(dir.path().join("store")).expect("failed to create backend");
        let lake = Lake::new(Arc::new(backend), "grwdt-dev-lake").unwrap();
        (dir, lake)
    }

    /// Backend whose every call fails like an unreachable provider.
    struct UnreachableBackend;

    impl StorageBackend for UnreachableBackend {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _data: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused").into()) })
        }

        fn get(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused").into()) })
        }

        fn exists(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused").into()) })
        }

        fn delete(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused").into()) })
        }

        fn list(
            &self,
            _bucket: &str,
            _prefix: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused").into()) })
        }
    }

    #[tokio::test]
    async fn test_model_metadata_roundtrip() {
        let lake = memory_lake();

        lake.upload_string("models/v1/meta.json", "{\"version\":1}", None)
            .await
            .unwrap();
        let content = lake
            .download_string("models/v1/meta.json", None)
            .await
            .unwrap();
        assert_eq!(content, "{\"version\":1}");
    }

    #[tokio::test]
    async fn test_upload_download_file_roundtrip() {
        let (dir, lake) = local_lake();
        let source = dir.path().join("train.csv");
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::write(&source, &payload).unwrap();

        lake.upload("training/train.csv", &source, None).await.unwrap();

        let dest = dir.path().join("out/nested/train.csv");
        lake.download("training/train.csv", &dest, None).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_empty_string_roundtrip() {
        let lake = memory_lake();

        lake.upload_string("empty", "", None).await.unwrap();
        assert_eq!(lake.download_string("empty", None).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_never_written_is_not_found() {
        let (dir, lake) = local_lake();

        let err = lake.download_string("never/written", None).await.unwrap_err();
        assert!(err.is_not_found());

        let dest = dir.path().join("dest.txt");
        let err = lake.download("never/written", &dest, None).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_failed_download_keeps_existing_destination() {
        let (dir, lake) = local_lake();
        let dest = dir.path().join("dest.txt");
        std::fs::write(&dest, "previous").unwrap();

        assert!(lake.download("missing", &dest, None).await.is_err());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "previous");
    }

    #[tokio::test]
    async fn test_download_replaces_existing_file() {
        let (dir, lake) = local_lake();
        let dest = dir.path().join("dest.txt");
        std::fs::write(&dest, "a much longer previous content").unwrap();

        lake.upload_string("k", "new", None).await.unwrap();
        lake.download("k", &dest, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");

        // No temp files left next to the destination.
        let entries = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn test_download_onto_directory_is_local_io() {
        let (dir, lake) = local_lake();
        let dest = dir.path().join("a-directory");
        std::fs::create_dir(&dest).unwrap();

        lake.upload_string("k", "data", None).await.unwrap();
        let err = lake.download("k", &dest, None).await.unwrap_err();
        assert_eq!(err.code(), "LocalIo");
        assert!(dest.is_dir());
    }

    #[tokio::test]
    async fn test_overwrite_returns_latest() {
        let lake = memory_lake();

        lake.upload_string("k", "first", None).await.unwrap();
        lake.upload_string("k", "second", None).await.unwrap();
        assert_eq!(lake.download_string("k", None).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_default_bucket_matches_explicit() {
        let lake = memory_lake();

        lake.upload_string("k", "default", None).await.unwrap();
        let explicit = lake
            .download_string("k", Some("grwdt-dev-lake"))
            .await
            .unwrap();
        assert_eq!(explicit, "default");
    }

    #[tokio::test]
    async fn test_explicit_bucket_is_isolated() {
        let lake = memory_lake();

        lake.upload_string("k", "elsewhere", Some("other-bucket"))
            .await
            .unwrap();
        assert!(lake.download_string("k", None).await.unwrap_err().is_not_found());
        assert_eq!(
            lake.download_string("k", Some("other-bucket")).await.unwrap(),
            "elsewhere"
        );
    }

    #[tokio::test]
    async fn test_non_utf8_is_decode_error() {
        let (dir, lake) = local_lake();
        let source = dir.path().join("blob.bin");
        std::fs::write(&source, [0xff, 0xfe, 0x00]).unwrap();

        lake.upload("blob.bin", &source, None).await.unwrap();
        let err = lake.download_string("blob.bin", None).await.unwrap_err();
        assert_eq!(err.code(), "Decode");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_local_io() {
        let (dir, lake) = local_lake();

        let err = lake
            .upload("k", &dir.path().join("does-not-exist.csv"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LocalIo");
        assert!(!lake.exists("k", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let lake = memory_lake();

        let err = lake.upload_string("", "x", None).await.unwrap_err();
        assert_eq!(err.code(), "InvalidPath");

        let err = lake.upload_string("k", "x", Some("")).await.unwrap_err();
        assert_eq!(err.code(), "InvalidBucket");

        let err = lake.download_string("k", Some("a/b")).await.unwrap_err();
        assert_eq!(err.code(), "InvalidBucket");

        assert!(Lake::new(Arc::new(MemoryBackend::default()), "").is_err());
    }

    #[tokio::test]
    async fn test_root_prefixes_keys() {
        let backend = Arc::new(MemoryBackend::default());
        let lake = Lake::new(backend.clone(), "lake")
            .unwrap()
            .with_root("/hypermodel/demo/");
        assert_eq!(lake.root(), "hypermodel/demo");

        lake.upload_string("data/x.csv", "1,2", None).await.unwrap();
        assert!(backend
            .exists("lake", "hypermodel/demo/data/x.csv")
            .await
            .unwrap());
        assert_eq!(lake.download_string("data/x.csv", None).await.unwrap(), "1,2");
    }

    #[tokio::test]
    async fn test_list_is_relative_to_root() {
        let backend = Arc::new(MemoryBackend::default());
        backend
            .put("lake", "outside/root", Bytes::from("x"))
            .await
            .unwrap();
        let lake = Lake::new(backend, "lake").unwrap().with_root("team");

        for path in ["models/v2/meta.json", "models/v1/meta.json", "data/a.csv"] {
            lake.upload_string(path, "x", None).await.unwrap();
        }

        assert_eq!(
            lake.list("", None).await.unwrap(),
            vec!["data/a.csv", "models/v1/meta.json", "models/v2/meta.json"]
        );
        assert_eq!(
            lake.list("models/", None).await.unwrap(),
            vec!["models/v1/meta.json", "models/v2/meta.json"]
        );
    }

    #[tokio::test]
    async fn test_exists_and_list_count_rejected_calls() {
        crate::metrics::init_metrics();
        let lake = Lake::new(Arc::new(MemoryBackend::default()), "metrics-lake").unwrap();

        let err = lake.exists("", None).await.unwrap_err();
        assert_eq!(err.code(), "InvalidPath");
        let err = lake.list("", Some("a/b")).await.unwrap_err();
        assert_eq!(err.code(), "InvalidBucket");

        let text = crate::metrics::render().unwrap();
        assert!(text.lines().any(|line| line.starts_with(crate::metrics::OPERATIONS_TOTAL)
            && line.contains("operation=\"exists\"")
            && line.contains("status=\"InvalidPath\"")));
        assert!(text.lines().any(|line| line.starts_with(crate::metrics::OPERATIONS_TOTAL)
            && line.contains("operation=\"list\"")
            && line.contains("status=\"InvalidBucket\"")));
    }

    #[tokio::test]
    async fn test_backend_failure_is_retryable() {
        let lake = Lake::new(Arc::new(UnreachableBackend), "lake").unwrap();

        let err = lake.upload_string("k", "x", None).await.unwrap_err();
        assert_eq!(err.code(), "Backend");
        assert!(err.is_retryable());

        let err = lake.download_string("k", None).await.unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_uploads() {
        let lake = memory_lake();

        let mut handles = Vec::new();
        for i in 0..16 {
            let lake = lake.clone();
            handles.push(tokio::spawn(async move {
                lake.upload_string(&format!("batch/{i}"), &format!("value {i}"), None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            let content = lake
                .download_string(&format!("batch/{i}"), None)
                .await
                .unwrap();
            assert_eq!(content, format!("value {i}"));
        }
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let lake: Arc<dyn DataLake> = Arc::new(memory_lake());

        lake.upload_string("k", "via dyn", None).await.unwrap();
        assert_eq!(lake.download_string("k", None).await.unwrap(), "via dyn");
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let mut config = Config::default();
        config.storage.backend = "memory".into();
        config.lake.bucket = "configured".into();
        config.lake.root_path = "root/".into();

        let lake = Lake::from_config(&config).await.unwrap();
        assert_eq!(lake.default_bucket(), "configured");
        assert_eq!(lake.root(), "root");
        assert_eq!(lake.backend_name(), "memory");
    }
}
