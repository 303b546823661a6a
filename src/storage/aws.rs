//! AWS S3 storage backend.
//!
//! Lake bucket `b` and key `k` map straight to S3 bucket `b`, key `k`.
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless both static keys
//! are configured.  `endpoint_url` plus `use_path_style` point the client at
//! S3-compatible stores such as MinIO.

use aws_sdk_s3::config::{RequestChecksumCalculation, ResponseChecksumValidation};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

use super::backend::{md5_hex, StorageBackend};
use crate::config::AwsStorageConfig;
use crate::errors::{LakeError, Result};

/// Backend that stores lake objects in AWS S3.
pub struct AwsBackend {
    /// AWS S3 SDK client.
    client: Client,
}

impl AwsBackend {
    /// Create a new S3 backend from configuration.
    pub async fn new(config: &AwsStorageConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if !config.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&config.endpoint_url);
        }

        // Explicit keys win over the default chain.
        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "datalake-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;
        // Uploads carry Content-MD5, so the SDK's own CRC trailers are only
        // added where the operation demands them. S3-compatible stores often
        // reject aws-chunked bodies.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        info!(
            "AWS storage backend initialized: region={} endpoint='{}' path_style={}",
            config.region, config.endpoint_url, config.use_path_style
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }

    /// `Content-MD5` header value: base64 of the raw digest.
    fn content_md5(md5_hex: &str) -> anyhow::Result<String> {
        let raw = hex::decode(md5_hex)?;
        Ok(BASE64_STANDARD.encode(raw))
    }

    /// Map an AWS SDK error to an anyhow error with context.
    ///
    /// The whole source chain is rendered, so dispatch and timeout failures
    /// keep their cause instead of collapsing to "unhandled error".
    fn map_sdk_error(context: &str, err: impl std::error::Error) -> anyhow::Error {
        anyhow::anyhow!("AWS S3 {context}: {}", DisplayErrorContext(&err))
    }
}

impl StorageBackend for AwsBackend {
    fn name(&self) -> &'static str {
        "aws"
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
            debug!("AWS put_object: bucket={} key={} bytes={}", bucket, key, data.len());

            // S3 rejects the write if the body does not match Content-MD5.
            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .content_md5(Self::content_md5(&md5)?)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e))?;

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
            debug!("AWS get_object: bucket={} key={}", bucket, key);

            let resp = match self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                        return Err(LakeError::not_found(&bucket, &key));
                    }
                    return Err(Self::map_sdk_error("get_object", e).into());
                }
            };

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();

            Ok(body)
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
            debug!("AWS head_object: bucket={} key={}", bucket, key);

            match self
                .client
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
                Err(e) => Err(Self::map_sdk_error("head_object", e).into()),
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
            debug!("AWS delete_object: bucket={} key={}", bucket, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

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
            debug!("AWS list_objects_v2: bucket={} prefix={}", bucket, prefix);

            let mut keys: Vec<String> = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let resp = self
                    .client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("list_objects_v2", e))?;

                keys.extend(
                    resp.contents()
                        .iter()
                        .filter_map(|obj| obj.key().map(str::to_string)),
                );

                match resp.next_continuation_token() {
                    Some(token) if resp.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            keys.sort();
            Ok(keys)
        })
    }
}
