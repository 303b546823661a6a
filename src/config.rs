//! Configuration loading and types for the data lake.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default, so an empty file (or no
//! file at all) yields a working local setup.  A handful of environment
//! variables override the file; see [`Config::apply_env`].

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default bucket and key prefix.
    #[serde(default)]
    pub lake: LakeConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Lake addressing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LakeConfig {
    /// Bucket used when a call does not name one.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key prefix prepended to every bucket path (empty = none).
    #[serde(default)]
    pub root_path: String,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            root_path: String::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder and count lake operations.
    #[serde(default)]
    pub metrics: bool,
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, `gcp`, `aws`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Memory storage configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,

    /// GCP Cloud Storage configuration.
    #[serde(default)]
    pub gcp: GcpStorageConfig,

    /// AWS S3 configuration.
    #[serde(default)]
    pub aws: AwsStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
            gcp: GcpStorageConfig::default(),
            aws: AwsStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory; each bucket is a subdirectory.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Memory storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// GCP Cloud Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GcpStorageConfig {
    /// GCP project ID.
    #[serde(default)]
    pub project: String,
    /// Path to a service account or authorized-user JSON file.
    #[serde(default)]
    pub credentials_file: String,
    /// Custom endpoint (e.g. a local GCS emulator).
    #[serde(default)]
    pub endpoint_url: String,
    /// Send requests without credentials.
    #[serde(default)]
    pub anonymous: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GcpStorageConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            credentials_file: String::new(),
            endpoint_url: String::new(),
            anonymous: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// AWS S3 configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsStorageConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

impl Default for AwsStorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: String::new(),
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_bucket() -> String {
    "datalake".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/lake".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Environment overrides ---------------------------------------------------

impl Config {
    /// Apply overrides from the process environment.
    ///
    /// | Variable       | Field               |
    /// |----------------|---------------------|
    /// | `LAKE_BUCKET`  | `lake.bucket`       |
    /// | `LAKE_PATH`    | `lake.root_path`    |
    /// | `LAKE_BACKEND` | `storage.backend`   |
    /// | `GCP_PROJECT`  | `storage.gcp.project` |
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env`] with a custom variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("LAKE_BUCKET") {
            self.lake.bucket = bucket;
        }
        if let Some(root) = lookup("LAKE_PATH") {
            self.lake.root_path = root;
        }
        if let Some(backend) = lookup("LAKE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Some(project) = lookup("GCP_PROJECT") {
            self.storage.gcp.project = project;
        }
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.  An empty document yields defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.lake.bucket, "datalake");
        assert_eq!(config.lake.root_path, "");
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.storage.local.root_dir, "./data/lake");
        assert_eq!(config.storage.gcp.request_timeout_secs, 300);
        assert_eq!(config.storage.aws.region, "us-east-1");
        assert_eq!(config.logging.level, "info");
        assert!(!config.observability.metrics);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_config("").unwrap();
        assert_eq!(config.lake.bucket, "datalake");
    }

    #[test]
    fn test_parse_gcp_config() {
        let yaml = r#"
lake:
  bucket: grwdt-dev-lake
  root_path: hypermodel/demo/car-crashes
storage:
  backend: gcp
  gcp:
    project: grwdt-dev
    credentials_file: /secrets/svcacc.json
logging:
  format: json
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.lake.bucket, "grwdt-dev-lake");
        assert_eq!(config.lake.root_path, "hypermodel/demo/car-crashes");
        assert_eq!(config.storage.backend, "gcp");
        assert_eq!(config.storage.gcp.project, "grwdt-dev");
        assert_eq!(config.storage.gcp.credentials_file, "/secrets/svcacc.json");
        assert!(!config.storage.gcp.anonymous);
        assert_eq!(config.storage.gcp.request_timeout_secs, 300);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_aws_config() {
        let yaml = r#"
storage:
  backend: aws
  aws:
    endpoint_url: http://localhost:9000
    use_path_style: true
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.storage.aws.region, "us-east-1");
        assert_eq!(config.storage.aws.endpoint_url, "http://localhost:9000");
        assert!(config.storage.aws.use_path_style);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LAKE_BUCKET", "from-env"),
            ("LAKE_PATH", "team/a"),
            ("LAKE_BACKEND", "memory"),
            ("GCP_PROJECT", "proj-env"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.lake.bucket, "from-env");
        assert_eq!(config.lake.root_path, "team/a");
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.gcp.project, "proj-env");
    }

    #[test]
    fn test_env_overrides_leave_unset_fields() {
        let mut config = parse_config("lake:\n  bucket: from-file\n").unwrap();
        config.apply_env_from(|_| None);
        assert_eq!(config.lake.bucket, "from-file");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datalake.yaml");
        std::fs::write(&path, "storage:\n  backend: memory\n  memory:\n    max_size_bytes: 1024\n")
            .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.memory.max_size_bytes, 1024);
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        assert!(load_config("/nonexistent/datalake.yaml").is_err());
    }
}
