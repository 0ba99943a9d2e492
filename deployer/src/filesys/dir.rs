//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployerError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployerError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List files with the given extension, sorted by path.
    ///
    /// A missing directory lists as empty.
    pub async fn list_files_with_extension(&self, ext: &str) -> Result<Vec<PathBuf>, DeployerError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(ext)
            {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_only_matching_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Dir::new(tmp.path());
        dir.file("b.json").write_atomic(b"{}").await.unwrap();
        dir.file("a.json").write_atomic(b"{}").await.unwrap();
        dir.file("a.jsonl").write_atomic(b"").await.unwrap();
        dir.subdir("nested.json").create().await.unwrap();

        let files = dir.list_files_with_extension("json").await.unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Dir::new(tmp.path().join("missing"));
        assert!(!dir.exists().await);
        assert!(dir.list_files_with_extension("json").await.unwrap().is_empty());
    }
}
