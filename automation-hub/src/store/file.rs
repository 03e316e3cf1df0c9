//! File-backed store: one directory per collection, one JSON file per key.

use super::{validate_key, PipelineStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Persists entries as `<root>/<collection>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating store directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        validate_key(collection)?;
        Ok(self.root.join(collection))
    }

    fn entry_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.collection_dir(collection)?.join(format!("{key}.json")))
    }
}

#[async_trait]
impl PipelineStore for JsonFileStore {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.entry_path(collection, key)?;
        tokio::fs::create_dir_all(self.collection_dir(collection)?).await?;

        // Write-then-rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&value)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.entry_path(collection, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(key) = name.strip_suffix(".json") else {
                continue;
            };
            let bytes = tokio::fs::read(entry.path()).await?;
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", entry.path().display()))?;
            out.push((key.to_string(), value));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let path = self.entry_path(collection, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}
