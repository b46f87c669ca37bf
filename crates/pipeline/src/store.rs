//! Artifact store capability and its local-filesystem implementation.
//!
//! Completed jobs hand their encoded image to an [`ArtifactStore`], which
//! persists it and returns a stable URL. Status payloads carry only that
//! URL; the bytes are served separately by name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imagine_core::types::JobId;

/// URL prefix under which the api crate serves stored artifacts.
pub const ARTIFACT_URL_PREFIX: &str = "/artifacts";

/// Extension used when the bytes are not a recognised image format.
const FALLBACK_EXTENSION: &str = "png";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Artifact is empty")]
    Empty,

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored artifact read back for serving.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Capability that persists job output.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist the output of `job_id` and return its retrievable URL.
    async fn save(&self, job_id: JobId, bytes: &[u8]) -> Result<String, StoreError>;

    /// Read an artifact by file name. `Ok(None)` when it does not exist.
    async fn load(&self, name: &str) -> Result<Option<Artifact>, StoreError>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// File extension for encoded image bytes, sniffed from the header.
pub fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or(FALLBACK_EXTENSION)
}

/// Guess a Content-Type from a file extension.
pub fn content_type_for_extension(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Accept only bare file names: no separators, no parent references, no
/// hidden files.
pub fn validate_artifact_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// LocalArtifactStore
// ---------------------------------------------------------------------------

/// Stores artifacts as `<root>/<job_id>.<ext>`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, job_id: JobId, bytes: &[u8]) -> Result<String, StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::Empty);
        }

        tokio::fs::create_dir_all(&self.root).await?;

        let file_name = format!("{job_id}.{}", extension_for(bytes));
        let final_path = self.root.join(&file_name);
        let tmp_path = self.root.join(format!(".{file_name}.tmp"));

        // Write-then-rename so readers never see a partial file.
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        tracing::debug!(
            job_id = %job_id,
            path = %final_path.display(),
            size = bytes.len(),
            "Artifact stored",
        );
        Ok(format!("{ARTIFACT_URL_PREFIX}/{file_name}"))
    }

    async fn load(&self, name: &str) -> Result<Option<Artifact>, StoreError> {
        validate_artifact_name(name)?;

        match tokio::fs::read(self.root.join(name)).await {
            Ok(bytes) => Ok(Some(Artifact {
                file_name: name.to_string(),
                content_type: content_type_for_extension(name),
                bytes,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn extension_is_sniffed_from_header() {
        assert_eq!(extension_for(PNG_HEADER), "png");
        assert_eq!(extension_for(JPEG_HEADER), "jpg");
        assert_eq!(extension_for(b"not an image"), "png");
    }

    #[test]
    fn content_type_mapping() {
        assert_eq!(content_type_for_extension("a.png"), "image/png");
        assert_eq!(content_type_for_extension("a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for_extension("a.bin"), "application/octet-stream");
    }

    #[test]
    fn traversal_names_are_rejected() {
        for name in ["", "../secret.png", "a/b.png", "a\\b.png", ".hidden", "x..png", "%2e%2e"] {
            assert_matches!(validate_artifact_name(name), Err(StoreError::InvalidName(_)), "{name}");
        }
        assert!(validate_artifact_name("0b9d1c5e-1f2a-4e3b-9c8d-7a6b5c4d3e2f.png").is_ok());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("generated"));
        let job_id = uuid::Uuid::new_v4();

        let url = store.save(job_id, PNG_HEADER).await.unwrap();
        assert_eq!(url, format!("/artifacts/{job_id}.png"));

        let artifact = store.load(&format!("{job_id}.png")).await.unwrap().unwrap();
        assert_eq!(artifact.bytes, PNG_HEADER);
        assert_eq!(artifact.content_type, "image/png");
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.save(uuid::Uuid::new_v4(), JPEG_HEADER).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".jpg"), "{names:?}");
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert_matches!(store.save(uuid::Uuid::new_v4(), b"").await, Err(StoreError::Empty));
    }

    #[tokio::test]
    async fn missing_artifact_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.load("nope.png").await.unwrap().is_none());
    }
}
