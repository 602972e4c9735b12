//! Raw document storage.
//!
//! The pipeline only needs "list names, fetch bytes, delete". Cloud blob
//! containers implement [`BlobStore`] outside this crate; [`DirectoryStore`]
//! serves a local folder.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// A flat store of named raw documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Names of all stored documents, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// The raw bytes of `name`.
    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Remove `name`. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// A [`BlobStore`] over the files directly inside one directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` inside the root, refusing anything that is not a
    /// plain file name.
    fn path_of(&self, name: &str) -> Result<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && Path::new(name).file_name().is_some_and(|f| f == name);
        if !plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{name}' is not a plain file name"),
            )
            .into());
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobStore for DirectoryStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        debug!(root = %self.root.display(), count = names.len(), "listed documents");
        Ok(names)
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("docqa-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        dir
    }

    #[tokio::test]
    async fn lists_gets_and_deletes_files() {
        let dir = scratch_dir("roundtrip");
        std::fs::write(dir.join("b.txt"), "bee").unwrap();
        std::fs::write(dir.join("a.md"), "ay").unwrap();
        let store = DirectoryStore::new(&dir);

        assert_eq!(store.list().await.unwrap(), vec!["a.md", "b.txt"]);
        assert_eq!(store.get("b.txt").await.unwrap(), b"bee");
        assert!(store.delete("a.md").await.unwrap());
        assert!(!store.delete("a.md").await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec!["b.txt"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn refuses_paths_outside_root() {
        let store = DirectoryStore::new(scratch_dir("escape"));
        assert!(matches!(store.get("../etc/passwd").await, Err(RagError::Io(_))));
        assert!(matches!(store.delete("..").await, Err(RagError::Io(_))));
    }
}
