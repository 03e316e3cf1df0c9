//! Persistence contract for pipeline definitions.
//!
//! The hub only needs `put`/`get`/`get_all`/`delete` over JSON values grouped
//! in collections. Backends are free to be local or remote.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Collection holding registered pipelines.
pub const PIPELINES: &str = "pipelines";

/// Key/value persistence grouped by collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Inserts or replaces `key` in `collection`.
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()>;

    /// Reads `key` from `collection`.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>>;

    /// Reads every entry of `collection`, ordered by key.
    async fn get_all(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>>;

    /// Removes `key` from `collection`; removing a missing key is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;
}

/// Rejects keys that are empty, too long, or could escape a directory.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 256 {
        return Err(anyhow!("store key must be 1..=256 chars"));
    }
    if key.starts_with('.') {
        return Err(anyhow!("store key must not start with '.'"));
    }
    for b in key.bytes() {
        let ok = matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' | b':');
        if !ok {
            return Err(anyhow!("store key '{key}' contains an invalid character"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("crm-sync_01").is_ok());
        assert!(validate_key("tenant:acme.pipeline").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(&"x".repeat(257)).is_err());
    }
}
