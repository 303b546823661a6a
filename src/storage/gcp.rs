//! Google Cloud Storage backend.
//!
//! Talks to the GCS JSON API with `reqwest`.  Objects map one to one:
//! lake bucket `b` and key `k` are GCS bucket `b`, object name `k`.
//!
//! Credentials are resolved once at construction, first match wins:
//!   - `anonymous: true` in config (storage emulators)
//!   - `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable (pre-minted token)
//!   - `credentials_file` in config, else `GOOGLE_APPLICATION_CREDENTIALS`
//!     (service account key or authorized-user JSON)
//!   - gcloud CLI auth (`gcloud auth application-default login`)
//!   - GCE metadata server (when running on Google Cloud)

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::backend::{md5_hex, StorageBackend};
use crate::config::GcpStorageConfig;
use crate::errors::{LakeError, Result};

/// GCS JSON API base URL.
const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// OAuth2 token endpoint used when a credentials file does not name one.
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scope requested for service account tokens.
const GCS_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Lifetime requested for self-signed service account assertions.
const JWT_LIFETIME_SECS: u64 = 3600;

/// Tokens are refreshed this long before they actually expire.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

// -- GCS JSON API response types -----------------------------------------------

#[derive(Debug, Deserialize)]
struct GcsObject {
    name: Option<String>,
    #[serde(rename = "md5Hash")]
    md5_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsListResponse {
    items: Option<Vec<GcsObject>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorResponse {
    error: Option<GcsErrorDetail>,
}

// -- Credentials ----------------------------------------------------------------

/// Contents of a Google credentials JSON file.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Where access tokens come from.
#[derive(Debug)]
enum TokenSource {
    Anonymous,
    Static(String),
    File(CredentialsFile),
    MetadataServer,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Backend that stores lake objects in Google Cloud Storage.
pub struct GcpBackend {
    /// HTTP client for GCS JSON API calls.
    client: reqwest::Client,
    /// API root; the public endpoint unless an emulator is configured.
    api_base: String,
    /// GCP project ID (informational; object calls do not need it).
    project: String,
    source: TokenSource,
    /// Cached OAuth2 access token.
    token_cache: Mutex<Option<CachedToken>>,
}

impl GcpBackend {
    /// Create a new GCS backend from configuration.
    pub async fn new(config: &GcpStorageConfig) -> anyhow::Result<Self> {
        let source = Self::resolve_token_source(config).await?;
        let backend = Self::from_parts(
            &config.endpoint_url,
            &config.project,
            Duration::from_secs(config.request_timeout_secs),
            source,
        )?;

        info!(
            "GCS storage backend initialized: endpoint={} project='{}' credentials={}",
            backend.api_base,
            backend.project,
            backend.source.describe()
        );
        Ok(backend)
    }

    fn from_parts(
        endpoint_url: &str,
        project: &str,
        timeout: Duration,
        source: TokenSource,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let api_base = if endpoint_url.is_empty() {
            GCS_API_BASE.to_string()
        } else {
            endpoint_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            client,
            api_base,
            project: project.to_string(),
            source,
            token_cache: Mutex::new(None),
        })
    }

    async fn resolve_token_source(config: &GcpStorageConfig) -> anyhow::Result<TokenSource> {
        if config.anonymous {
            return Ok(TokenSource::Anonymous);
        }

        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            return Ok(TokenSource::Static(token));
        }

        let explicit = if config.credentials_file.is_empty() {
            std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok()
        } else {
            Some(config.credentials_file.clone())
        };
        if let Some(path) = explicit {
            return Ok(TokenSource::File(Self::read_credentials_file(&path).await?));
        }

        let adc_path = Self::application_default_credentials_path();
        if let Ok(true) = tokio::fs::try_exists(&adc_path).await {
            return Ok(TokenSource::File(Self::read_credentials_file(&adc_path).await?));
        }

        Ok(TokenSource::MetadataServer)
    }

    async fn read_credentials_file(path: &str) -> anyhow::Result<CredentialsFile> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read credentials file {path}: {e}"))?;
        serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Unsupported credentials file {path}: {e}"))
    }

    /// Get the path to gcloud application-default credentials.
    fn application_default_credentials_path() -> String {
        if let Ok(config_dir) = std::env::var("CLOUDSDK_CONFIG") {
            return format!("{config_dir}/application_default_credentials.json");
        }
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/.config/gcloud/application_default_credentials.json");
        }
        ".config/gcloud/application_default_credentials.json".to_string()
    }

    // -- Token management -----------------------------------------------------

    /// Current access token, or `None` when requests go out unauthenticated.
    ///
    /// Fetched tokens are cached until shortly before they expire.  The
    /// cache lock is held across a refresh so concurrent callers wait for
    /// one exchange instead of each starting their own.
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        match &self.source {
            TokenSource::Anonymous => return Ok(None),
            TokenSource::Static(token) => return Ok(Some(token.clone())),
            TokenSource::File(_) | TokenSource::MetadataServer => {}
        }

        let mut cache = self.token_cache.lock().await;
        if let Some(ref cached) = *cache {
            if cached.expiry > Instant::now() {
                return Ok(Some(cached.access_token.clone()));
            }
        }

        let fresh = match &self.source {
            TokenSource::File(CredentialsFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            }) => {
                self.token_from_service_account(client_email, private_key, token_uri)
                    .await?
            }
            TokenSource::File(CredentialsFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            }) => {
                self.request_token(
                    token_uri,
                    &[
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                        ("grant_type", "refresh_token"),
                    ],
                )
                .await?
            }
            TokenSource::MetadataServer => self.token_from_metadata_server().await?,
            TokenSource::Anonymous | TokenSource::Static(_) => return Ok(None),
        };

        debug!("GCS access token refreshed, expires in {}s", fresh.expires_in);
        let expiry = Instant::now()
            + Duration::from_secs(fresh.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));
        *cache = Some(CachedToken {
            access_token: fresh.access_token.clone(),
            expiry,
        });

        Ok(Some(fresh.access_token))
    }

    /// Exchange a self-signed JWT assertion for an access token.
    async fn token_from_service_account(
        &self,
        client_email: &str,
        private_key_pem: &str,
        token_uri: &str,
    ) -> anyhow::Result<TokenResponse> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let claims = JwtClaims {
            iss: client_email,
            scope: GCS_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid service account private key: {e}"))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        self.request_token(
            token_uri,
            &[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ],
        )
        .await
    }

    async fn request_token(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> anyhow::Result<TokenResponse> {
        let resp = self
            .client
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Token request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Token request failed ({status}): {body}"));
        }

        Ok(resp.json().await?)
    }

    /// Obtain an access token from the GCE metadata server.
    async fn token_from_metadata_server(&self) -> anyhow::Result<TokenResponse> {
        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Metadata server request failed: {e}. \
                     Set GOOGLE_APPLICATION_CREDENTIALS, run 'gcloud auth application-default login', \
                     or set GOOGLE_OAUTH_ACCESS_TOKEN."
                )
            })?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "Metadata server returned {}: set GOOGLE_APPLICATION_CREDENTIALS or \
                 GOOGLE_OAUTH_ACCESS_TOKEN",
                resp.status()
            ));
        }

        Ok(resp.json().await?)
    }

    /// Attach the bearer token, if any, to a request.
    async fn authorize(&self, req: RequestBuilder) -> anyhow::Result<RequestBuilder> {
        Ok(match self.access_token().await? {
            Some(token) => req.bearer_auth(token),
            None => req,
        })
    }

    // -- URLs and errors ------------------------------------------------------

    /// URL-encode a bucket or object name for use in API paths.
    fn url_encode(name: &str) -> String {
        percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC).to_string()
    }

    fn objects_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}/o", self.api_base, Self::url_encode(bucket))
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", self.objects_url(bucket), Self::url_encode(key))
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.api_base,
            Self::url_encode(bucket)
        )
    }

    /// Map a GCS HTTP error to an anyhow error with context.
    fn map_gcs_error(context: &str, status: StatusCode, body: &str) -> anyhow::Error {
        if let Ok(err_resp) = serde_json::from_str::<GcsErrorResponse>(body) {
            if let Some(err) = err_resp.error {
                return anyhow::anyhow!(
                    "GCS {}: {} (code {})",
                    context,
                    err.message.unwrap_or_default(),
                    err.code.unwrap_or(status.as_u16())
                );
            }
        }
        anyhow::anyhow!("GCS {context}: HTTP {status} - {body}")
    }

    async fn error_from(context: &str, resp: reqwest::Response) -> LakeError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Self::map_gcs_error(context, status, &body).into()
    }

    /// Convert the base64 `md5Hash` GCS reports into hex.
    fn md5_hash_to_hex(md5_hash: &str) -> anyhow::Result<String> {
        let raw = BASE64_STANDARD
            .decode(md5_hash)
            .map_err(|e| anyhow::anyhow!("GCS returned malformed md5Hash {md5_hash:?}: {e}"))?;
        Ok(hex::encode(raw))
    }
}

impl TokenSource {
    fn describe(&self) -> &'static str {
        match self {
            TokenSource::Anonymous => "anonymous",
            TokenSource::Static(_) => "access-token",
            TokenSource::File(CredentialsFile::ServiceAccount { .. }) => "service-account",
            TokenSource::File(CredentialsFile::AuthorizedUser { .. }) => "authorized-user",
            TokenSource::MetadataServer => "metadata-server",
        }
    }
}

impl StorageBackend for GcpBackend {
    fn name(&self) -> &'static str {
        "gcp"
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
            debug!("GCS put: bucket={} name={} bytes={}", bucket, key, data.len());

            let req = self
                .client
                .post(self.upload_url(&bucket))
                .query(&[("uploadType", "media"), ("name", key.as_str())])
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data);
            let resp = self
                .authorize(req)
                .await?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS upload request failed: {e}"))?;

            if !resp.status().is_success() {
                return Err(Self::error_from("upload", resp).await);
            }

            let stored: GcsObject = resp
                .json()
                .await
                .map_err(|e| anyhow::anyhow!("GCS upload response unreadable: {e}"))?;
            if let Some(remote) = stored.md5_hash.as_deref() {
                let remote = Self::md5_hash_to_hex(remote)?;
                if remote != md5 {
                    return Err(anyhow::anyhow!(
                        "GCS upload: checksum mismatch for {bucket}/{key}: sent {md5}, stored {remote}"
                    )
                    .into());
                }
            }

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
            debug!("GCS get: bucket={} name={}", bucket, key);

            let req = self
                .client
                .get(self.object_url(&bucket, &key))
                .query(&[("alt", "media")]);
            let resp = self
                .authorize(req)
                .await?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS download request failed: {e}"))?;

            match resp.status() {
                status if status.is_success() => {}
                StatusCode::NOT_FOUND => return Err(LakeError::not_found(&bucket, &key)),
                _ => return Err(Self::error_from("download", resp).await),
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("GCS download body read failed: {e}"))?;
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
            debug!("GCS exists: bucket={} name={}", bucket, key);

            let req = self
                .client
                .get(self.object_url(&bucket, &key))
                .query(&[("fields", "name")]);
            let resp = self
                .authorize(req)
                .await?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS exists check failed: {e}"))?;

            match resp.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(Self::error_from("exists", resp).await),
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
            debug!("GCS delete: bucket={} name={}", bucket, key);

            let req = self.client.delete(self.object_url(&bucket, &key));
            let resp = self
                .authorize(req)
                .await?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS delete request failed: {e}"))?;

            // GCS answers 404 for missing objects; deletes are idempotent here.
            match resp.status() {
                status if status.is_success() => Ok(()),
                StatusCode::NOT_FOUND => Ok(()),
                _ => Err(Self::error_from("delete", resp).await),
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
            debug!("GCS list: bucket={} prefix={}", bucket, prefix);

            let mut names: Vec<String> = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut req = self.client.get(self.objects_url(&bucket)).query(&[
                    ("prefix", prefix.as_str()),
                    ("fields", "items(name),nextPageToken"),
                ]);
                if let Some(ref token) = page_token {
                    req = req.query(&[("pageToken", token.as_str())]);
                }

                let resp = self
                    .authorize(req)
                    .await?
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("GCS list request failed: {e}"))?;

                if !resp.status().is_success() {
                    return Err(Self::error_from("list", resp).await);
                }

                let page: GcsListResponse = resp
                    .json()
                    .await
                    .map_err(|e| anyhow::anyhow!("GCS list response unreadable: {e}"))?;
                names.extend(page.items.unwrap_or_default().into_iter().filter_map(|o| o.name));

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }

            names.sort();
            Ok(names)
        })
    }
}

// -- Tests -------------------------------------------------------------------
