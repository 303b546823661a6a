//! Abstract storage backend trait.
//!
//! Every provider must implement [`StorageBackend`].  The trait deals in
//! whole objects addressed by `(bucket, key)`; the lake layer above it owns
//! default buckets, root prefixes and local file handling.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;

/// Async object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Short identifier used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Write `data` to `key` in `bucket`, replacing any existing object.
    /// Returns the hex MD5 of the stored bytes.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Read the full object; [`LakeError::NotFound`] when it does not exist.
    ///
    /// [`LakeError::NotFound`]: crate::errors::LakeError::NotFound
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>>;

    /// Check whether an object exists at `key`.
    fn exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Delete the object at `key`.  Deleting a missing object succeeds.
    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// List every key in `bucket` that starts with `prefix`, sorted.
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>>;
}

/// Hex MD5 digest, the checksum every backend reports for `put`.
pub(crate) fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex_empty() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_md5_hex_hello() {
        assert_eq!(md5_hex(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }
}
