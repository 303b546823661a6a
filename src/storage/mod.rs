//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where bytes
//! physically live.  Implementations include local disk, process memory,
//! Google Cloud Storage and AWS S3; [`from_config`] picks one at startup.

pub mod aws;
pub mod backend;
pub mod gcp;
pub mod local;
pub mod memory;

use std::sync::Arc;
use tracing::info;

use crate::config::StorageConfig;
use backend::StorageBackend;

/// Build the backend named by `config.backend`.
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend.as_str() {
        "local" => Arc::new(local::LocalBackend::new(&config.local.root_dir)?),
        "memory" => Arc::new(memory::MemoryBackend::new(config.memory.max_size_bytes)),
        "gcp" => Arc::new(gcp::GcpBackend::new(&config.gcp).await?),
        "aws" => Arc::new(aws::AwsBackend::new(&config.aws).await?),
        other => anyhow::bail!(
            "unknown storage backend '{other}' (expected local, memory, gcp or aws)"
        ),
    };
    info!("Storage backend selected: {}", backend.name());
    Ok(backend)
}
