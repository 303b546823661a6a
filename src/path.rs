//! Bucket names and bucket paths.
//!
//! A bucket path is opaque: the lake only insists that it is non-empty and
//! does not rewrite it.  When the lake has a root prefix, the stored object
//! key is `{root}/{bucket_path}`.

use crate::errors::{LakeError, Result};

/// Reject bucket names that no supported provider accepts.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("must not contain path separators")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LakeError::InvalidBucket {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

pub fn validate_bucket_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(LakeError::InvalidPath {
            path: String::new(),
            reason: "must not be empty",
        });
    }
    Ok(())
}

/// Strip leading and trailing slashes from a configured root prefix.
pub fn normalize_root(root: &str) -> String {
    root.trim_matches('/').to_string()
}

/// Map a bucket path (or list prefix) to the stored object key.
///
/// `root` must already be normalized.
pub fn object_key(root: &str, bucket_path: &str) -> String {
    if root.is_empty() {
        bucket_path.to_string()
    } else {
        format!("{root}/{bucket_path}")
    }
}

/// Inverse of [`object_key`]; `None` when `key` lies outside the root.
pub fn strip_root<'a>(root: &str, key: &'a str) -> Option<&'a str> {
    if root.is_empty() {
        return Some(key);
    }
    key.strip_prefix(root)?.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_rules() {
        assert!(validate_bucket_name("grwdt-dev-lake").is_ok());
        assert!(validate_bucket_name("lake.example.com").is_ok());

        for bad in ["", "a/b", "a\\b", ".tmp", ".."] {
            let err = validate_bucket_name(bad).unwrap_err();
            assert_eq!(err.code(), "InvalidBucket", "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_bucket_path_is_opaque() {
        assert!(validate_bucket_path("models/v1/meta.json").is_ok());
        assert!(validate_bucket_path("/leading/slash").is_ok());
        assert!(validate_bucket_path("spaces in name.txt").is_ok());
        assert_eq!(validate_bucket_path("").unwrap_err().code(), "InvalidPath");
    }

    #[test]
    fn test_object_key_without_root() {
        assert_eq!(object_key("", "models/v1/meta.json"), "models/v1/meta.json");
    }

    #[test]
    fn test_object_key_with_root() {
        let root = normalize_root("/hypermodel/demo/car-crashes/");
        assert_eq!(root, "hypermodel/demo/car-crashes");
        assert_eq!(
            object_key(&root, "training/data.csv"),
            "hypermodel/demo/car-crashes/training/data.csv"
        );
        assert_eq!(object_key(&root, ""), "hypermodel/demo/car-crashes/");
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(strip_root("", "a/b"), Some("a/b"));
        assert_eq!(strip_root("root", "root/a/b"), Some("a/b"));
        assert_eq!(strip_root("root", "rootless/a"), None);
        assert_eq!(strip_root("root", "other/a"), None);
    }
}
