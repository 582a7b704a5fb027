//! Filesystem adapter for the two mutations upgrades historically need:
//! deleting deprecated asset trees and writing protective marker files.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::FileSystem;
use crate::error::AdapterError;

pub struct DiskFileSystem;

impl DiskFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DiskFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for DiskFileSystem {
    async fn remove_dir_recursive(&self, path: &Path) -> Result<(), AdapterError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                debug!("removed directory {}", path.display());
                Ok(())
            }
            // Already gone counts as done; re-runs must not fail here.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::io(path.display().to_string(), e)),
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), AdapterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AdapterError::io(parent.display().to_string(), e))?;
        }
        std::fs::write(path, contents).map_err(|e| AdapterError::io(path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn remove_missing_directory_is_ok() {
        let dir = TempDir::new().unwrap();
        let fs = DiskFileSystem::new();
        fs.remove_dir_recursive(&dir.path().join("never-existed"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_nested_tree() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("assets").join("old_templates");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("invoice.tpl"), "x").unwrap();

        let fs = DiskFileSystem::new();
        fs.remove_dir_recursive(&dir.path().join("assets"))
            .await
            .unwrap();
        assert!(!dir.path().join("assets").exists());
    }

    #[tokio::test]
    async fn write_file_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("protected").join(".htaccess");

        let fs = DiskFileSystem::new();
        fs.write_file(&path, b"Deny from all\n").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"Deny from all\n");
    }
}
