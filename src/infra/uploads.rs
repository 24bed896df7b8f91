//! On-disk storage for uploaded model files.
//!
//! The parser reads from a path, so every fresh upload is written below the
//! configured root before parsing.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file is empty")]
    EmptyPayload,
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Path relative to the storage root.
    pub stored_path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
    retain_files: bool,
}

impl UploadStorage {
    /// Initialise storage rooted at `root`, creating the directory if necessary.
    pub fn new(root: PathBuf, retain_files: bool) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, retain_files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retains_files(&self) -> bool {
        self.retain_files
    }

    /// Write `data` under a dated, collision-free name derived from `original_name`.
    pub async fn store(
        &self,
        original_name: &str,
        data: &Bytes,
    ) -> Result<StoredUpload, UploadStorageError> {
        if data.is_empty() {
            return Err(UploadStorageError::EmptyPayload);
        }

        let stored_path = self.build_stored_path(original_name);
        let absolute = self.resolve(&stored_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(data).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(err.into());
        }
        file.flush().await?;

        Ok(StoredUpload {
            stored_path,
            absolute_path: absolute,
            size_bytes: data.len() as u64,
        })
    }

    /// Remove the stored file once it has been parsed, unless retention is on.
    pub async fn release(&self, upload: &StoredUpload) -> Result<(), UploadStorageError> {
        if self.retain_files {
            return Ok(());
        }
        self.delete(&upload.stored_path).await
    }

    /// Remove a stored file. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UploadStorageError::Io(err)),
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(UploadStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }

    fn build_stored_path(&self, original_name: &str) -> String {
        let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
        let identifier = Uuid::new_v4();
        let filename = sanitize_filename(original_name);
        format!("{year}/{:02}/{:02}/{identifier}-{filename}", month as u8, day)
    }
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("model");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "model".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_slugged_and_lowercased() {
        assert_eq!(sanitize_filename("Office Tower (v2).IFC"), "office-tower-v2.ifc");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("###.ifc"), "model.ifc");
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = UploadStorage::new(dir.path().to_path_buf(), true).expect("storage");
        assert!(matches!(
            storage.resolve("../outside.ifc"),
            Err(UploadStorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve("/abs.ifc"),
            Err(UploadStorageError::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn store_and_release_respect_retention() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = Bytes::from_static(b"ISO-10303-21;");

        let retaining = UploadStorage::new(dir.path().join("keep"), true).expect("storage");
        let kept = retaining.store("a.ifc", &data).await.expect("store");
        assert_eq!(kept.size_bytes, 13);
        retaining.release(&kept).await.expect("release");
        assert!(kept.absolute_path.exists());

        let discarding = UploadStorage::new(dir.path().join("drop"), false).expect("storage");
        let dropped = discarding.store("a.ifc", &data).await.expect("store");
        assert!(dropped.absolute_path.exists());
        discarding.release(&dropped).await.expect("release");
        assert!(!dropped.absolute_path.exists());
    }

    #[tokio::test]
    async fn empty_payloads_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = UploadStorage::new(dir.path().to_path_buf(), true).expect("storage");
        assert!(matches!(
            storage.store("a.ifc", &Bytes::new()).await,
            Err(UploadStorageError::EmptyPayload)
        ));
    }
}
