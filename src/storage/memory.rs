//! In-memory storage backend.
//!
//! Objects are held per bucket in ordered maps behind a
//! `tokio::sync::RwLock`, so listings come out sorted without extra work.
//! A configurable memory limit (`max_size_bytes`) caps total stored bytes.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

use super::backend::{md5_hex, StorageBackend};
use crate::errors::{LakeError, Result};

type Buckets = HashMap<String, BTreeMap<String, Bytes>>;

/// In-memory storage backend.
pub struct MemoryBackend {
    buckets: RwLock<Buckets>,
    /// Current total bytes stored across all buckets.
    current_size: RwLock<u64>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
}

impl MemoryBackend {
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            current_size: RwLock::new(0),
            max_size_bytes,
        }
    }

    /// Total bytes currently held.
    pub async fn size(&self) -> u64 {
        *self.current_size.read().await
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
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
            let md5 = md5_hex(&data);

            // Lock order: buckets, then size.
            let mut buckets = self.buckets.write().await;
            let mut size = self.current_size.write().await;

            let replaced = buckets
                .get(&bucket)
                .and_then(|objects| objects.get(&key))
                .map_or(0, |old| old.len() as u64);
            let additional = data.len() as u64;

            let next = size.saturating_sub(replaced) + additional;
            if self.max_size_bytes != 0 && next > self.max_size_bytes {
                return Err(LakeError::CapacityExceeded {
                    current: *size,
                    additional,
                    max: self.max_size_bytes,
                });
            }

            buckets.entry(bucket).or_default().insert(key, data);
            *size = next;
            Ok(md5)
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
            let buckets = self.buckets.read().await;
            buckets
                .get(&bucket)
                .and_then(|objects| objects.get(&key))
                .cloned()
                .ok_or_else(|| LakeError::not_found(&bucket, &key))
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
            let buckets = self.buckets.read().await;
            Ok(buckets
                .get(&bucket)
                .is_some_and(|objects| objects.contains_key(&key)))
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
            let mut buckets = self.buckets.write().await;
            let removed = buckets
                .get_mut(&bucket)
                .and_then(|objects| objects.remove(&key));

            if let Some(old) = removed {
                let mut size = self.current_size.write().await;
                *size = size.saturating_sub(old.len() as u64);
            }
            Ok(())
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
            let buckets = self.buckets.read().await;
            let Some(objects) = buckets.get(&bucket) else {
                return Ok(Vec::new());
            };
            Ok(objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let backend = MemoryBackend::default();

        let md5 = backend
            .put("lake", "key.txt", Bytes::from("hello world"))
            .await
            .unwrap();
        assert_eq!(md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            backend.get("lake", "key.txt").await.unwrap(),
            Bytes::from("hello world")
        );
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let backend = MemoryBackend::default();

        backend.put("a", "key", Bytes::from("in a")).await.unwrap();
        assert!(backend.exists("a", "key").await.unwrap());
        assert!(!backend.exists("b", "key").await.unwrap());
        assert!(backend.get("b", "key").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_overwrite_adjusts_size() {
        let backend = MemoryBackend::default();

        backend.put("lake", "k", Bytes::from("12345")).await.unwrap();
        backend.put("lake", "k", Bytes::from("12")).await.unwrap();
        assert_eq!(backend.size().await, 2);

        backend.delete("lake", "k").await.unwrap();
        assert_eq!(backend.size().await, 0);

        // Idempotent.
        backend.delete("lake", "k").await.unwrap();
        assert_eq!(backend.size().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let backend = MemoryBackend::new(8);

        backend.put("lake", "a", Bytes::from("12345")).await.unwrap();
        let err = backend
            .put("lake", "b", Bytes::from("1234"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CapacityExceeded");
        assert!(!backend.exists("lake", "b").await.unwrap());

        // Replacing an object only counts the difference.
        backend
            .put("lake", "a", Bytes::from("12345678"))
            .await
            .unwrap();
        assert_eq!(backend.size().await, 8);
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_prefixed() {
        let backend = MemoryBackend::default();

        for key in ["models/v2", "data/x", "models/v1", "modelsx"] {
            backend.put("lake", key, Bytes::from("x")).await.unwrap();
        }

        assert_eq!(
            backend.list("lake", "models/").await.unwrap(),
            vec!["models/v1", "models/v2"]
        );
        assert_eq!(backend.list("lake", "").await.unwrap().len(), 4);
        assert!(backend.list("nope", "").await.unwrap().is_empty());
    }
}
