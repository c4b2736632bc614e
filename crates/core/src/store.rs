//! Project artifact storage.
//!
//! Uploaded project files are persisted under the working directory and
//! identified by the SHA-256 digest of their exact bytes, so the same upload
//! always yields the same identity. Exported reports live in a sibling
//! directory, named with a generation timestamp to avoid collisions.

use bc_protocol::ProjectIdentity;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("project file is empty")]
    EmptyUpload,

    #[error("invalid project file name `{0}`")]
    InvalidFileName(String),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write project file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Store rooted at `root`; directories are created lazily on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where uploaded project files are persisted.
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Where exported reports are written by default.
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// SHA-256 of `bytes` as 64 lowercase hex chars.
    pub fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Persist an uploaded project file and return its identity.
    ///
    /// `file_name` is reduced to its final component; anything that would
    /// escape the projects directory is rejected. `name` overrides the
    /// display name, which otherwise defaults to the file stem.
    pub async fn store(
        &self,
        file_name: &str,
        name: Option<&str>,
        bytes: &[u8],
    ) -> Result<ProjectIdentity, StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::EmptyUpload);
        }
        let safe_name = sanitize_file_name(file_name)?;

        let dir = self.projects_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let stored_path = dir.join(&safe_name);
        tokio::fs::write(&stored_path, bytes)
            .await
            .map_err(|source| StoreError::Write {
                path: stored_path.clone(),
                source,
            })?;

        let sha256 = Self::digest(bytes);
        let display_name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => Path::new(&safe_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(safe_name.clone()),
        };

        info!(
            "project stored: name={display_name}, path={}, sha256={sha256}",
            stored_path.display()
        );

        Ok(ProjectIdentity {
            name: display_name,
            sha256,
            stored_path,
            loaded_at: Utc::now(),
        })
    }

    /// Ensure the reports directory exists and return it.
    pub async fn ensure_reports_dir(&self) -> Result<PathBuf, StoreError> {
        let dir = self.reports_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }
}

fn sanitize_file_name(file_name: &str) -> Result<String, StoreError> {
    let candidate = Path::new(file_name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .last()
        .unwrap_or_default();

    if candidate.is_empty() || candidate == ".." {
        return Err(StoreError::InvalidFileName(file_name.to_string()));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(ProjectStore::digest(b"abc"), ABC_SHA256);
        assert_eq!(ProjectStore::digest(b"abc"), ProjectStore::digest(b"abc"));
        assert_ne!(ProjectStore::digest(b"abc"), ProjectStore::digest(b"abd"));
    }

    #[tokio::test]
    async fn test_store_persists_and_identifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let identity = store.store("demo.bproj", None, b"abc").await.unwrap();
        assert_eq!(identity.name, "demo");
        assert_eq!(identity.sha256, ABC_SHA256);
        assert!(identity.stored_path.starts_with(store.projects_dir()));

        let written = std::fs::read(&identity.stored_path).unwrap();
        assert_eq!(written, b"abc");
    }

    #[tokio::test]
    async fn test_store_same_bytes_same_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let first = store.store("demo.bproj", None, b"abc").await.unwrap();
        let second = store.store("demo.bproj", None, b"abc").await.unwrap();
        assert_eq!(first.sha256, second.sha256);
    }

    #[tokio::test]
    async fn test_store_explicit_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let identity = store
            .store("upload.bproj", Some("eol-audio-check"), b"abc")
            .await
            .unwrap();
        assert_eq!(identity.name, "eol-audio-check");
    }

    #[tokio::test]
    async fn test_store_rejects_empty_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let err = store.store("demo.bproj", None, b"").await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyUpload));
    }

    #[tokio::test]
    async fn test_store_strips_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let identity = store
            .store("../../etc/evil.bproj", None, b"abc")
            .await
            .unwrap();
        assert_eq!(
            identity.stored_path,
            store.projects_dir().join("evil.bproj")
        );
    }

    #[tokio::test]
    async fn test_store_rejects_nameless_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let err = store.store("..", None, b"abc").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidFileName(_)));
    }
}
