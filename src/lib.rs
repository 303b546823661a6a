//! Data lake storage library.
//!
//! Moves files and strings between a local machine and an object store
//! addressed by bucket path.  Pipeline code depends on the [`DataLake`]
//! trait; [`Lake`] implements it over any [`storage::backend::StorageBackend`]
//! (local disk, memory, Google Cloud Storage, AWS S3).

pub mod config;
pub mod errors;
pub mod lake;
pub mod metrics;
pub mod path;
pub mod storage;

pub use errors::{LakeError, Result};
pub use lake::{DataLake, Lake};
