//! Local file storage for uploaded documents.
//!
//! Paths recorded in the database are relative to the upload root, laid out
//! as `{plans|specs}/{project_id}/{file_id}.pdf`.

use anyhow::{bail, Context, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::documents::DocType;

#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the upload root and the per-type folders.
    pub async fn ensure_layout(&self) -> Result<()> {
        for doc_type in [DocType::Plan, DocType::Spec] {
            let dir = self.root.join(doc_type.folder());
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Relative storage path for a new document
    pub fn document_key(doc_type: DocType, project_id: Uuid, file_id: Uuid) -> String {
        format!("{}/{}/{}.pdf", doc_type.folder(), project_id, file_id)
    }

    /// Absolute path for a stored key, refusing keys that escape the root.
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid storage key: {}", key);
        }
        Ok(self.root.join(relative))
    }

    pub async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(key, bytes = bytes.len(), "Stored file");
        Ok(())
    }

    /// File contents, or `None` when the file is gone.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Remove a file; a missing file is not an error.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    /// Remove every stored file of a project.
    pub async fn delete_project(&self, project_id: Uuid) {
        for doc_type in [DocType::Plan, DocType::Spec] {
            let dir = self.root.join(doc_type.folder()).join(project_id.to_string());
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(dir = %dir.display(), "Removed project files"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove project files"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_type_folder_layout() {
        let project = Uuid::nil();
        let file = Uuid::from_u128(1);
        assert_eq!(
            FileStorage::document_key(DocType::Spec, project, file),
            format!("specs/{}/{}.pdf", project, file)
        );
    }

    #[test]
    fn keys_cannot_escape_the_root() {
        let storage = FileStorage::new("/srv/uploads");
        assert!(storage.resolve("plans/a/b.pdf").is_ok());
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("/etc/passwd").is_err());
        assert!(storage.resolve("plans/../../x.pdf").is_err());
    }

    #[tokio::test]
    async fn save_read_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let project = Uuid::new_v4();
        let key = FileStorage::document_key(DocType::Plan, project, Uuid::new_v4());

        storage.save(&key, b"%PDF-1.4 test").await.unwrap();
        assert_eq!(storage.read(&key).await.unwrap().unwrap(), b"%PDF-1.4 test");

        assert!(storage.delete(&key).await.unwrap());
        assert!(!storage.delete(&key).await.unwrap());
        assert!(storage.read(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_project_removes_its_folders() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.ensure_layout().await.unwrap();

        let project = Uuid::new_v4();
        let plan = FileStorage::document_key(DocType::Plan, project, Uuid::new_v4());
        let spec = FileStorage::document_key(DocType::Spec, project, Uuid::new_v4());
        storage.save(&plan, b"%PDF").await.unwrap();
        storage.save(&spec, b"%PDF").await.unwrap();

        storage.delete_project(project).await;

        assert!(storage.read(&plan).await.unwrap().is_none());
        assert!(storage.read(&spec).await.unwrap().is_none());
        assert!(dir.path().join("plans").exists());
    }
}
