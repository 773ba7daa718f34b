//! Persistence of flow artifacts (rendered posts, portfolio reports)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact name '{0}' is empty after sanitizing")]
    InvalidName(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where flows put their final documents
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `contents` under a name derived from `name`; returns the location
    async fn save(&self, name: &str, contents: &str) -> Result<PathBuf, ArtifactError>;
}

/// Writes artifacts as files under one directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, name: &str, contents: &str) -> Result<PathBuf, ArtifactError> {
        let file_name = sanitize_file_name(name)?;
        let path = self.root.join(file_name);

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArtifactError::Io {
                path: self.root.clone(),
                source,
            })?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), bytes = contents.len(), "Saved artifact");
        Ok(path)
    }
}

/// Keep letters (any script), digits, `.`, `-` and `_`; everything else
/// becomes `_`. Path separators never survive.
pub fn sanitize_file_name(name: &str) -> Result<String, ArtifactError> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();

    if cleaned.trim_matches('_').is_empty() {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(cleaned)
}
