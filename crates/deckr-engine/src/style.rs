use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deckr_contracts::deck::ReferenceImage;

use crate::error::DeckError;

const LIBRARY_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Persistent collection of style references addressed by id.
pub trait StyleLibrary: Send + Sync {
    fn lookup(&self, id: &str) -> Result<Option<ReferenceImage>>;
}

/// Library backed by `<dir>/<id>.<png|jpg|jpeg|webp>`.
#[derive(Debug, Clone)]
pub struct DirectoryStyleLibrary {
    root: PathBuf,
}

impl DirectoryStyleLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StyleLibrary for DirectoryStyleLibrary {
    fn lookup(&self, id: &str) -> Result<Option<ReferenceImage>> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Ok(None);
        }
        for ext in LIBRARY_EXTENSIONS {
            let path = self.root.join(format!("{id}.{ext}"));
            if path.is_file() {
                return reference_from_path(&path).map(Some);
            }
        }
        Ok(None)
    }
}

/// At most one style reference is active per run: choosing an upload drops
/// the library pick and the other way round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StyleSelection {
    #[default]
    None,
    Upload(ReferenceImage),
    Library(String),
}

impl StyleSelection {
    pub fn select_upload(&mut self, image: ReferenceImage) {
        *self = Self::Upload(image);
    }

    pub fn select_library(&mut self, id: impl Into<String>) {
        *self = Self::Library(id.into());
    }

    pub fn clear(&mut self) {
        *self = Self::None;
    }

    pub fn resolve(
        &self,
        library: Option<&dyn StyleLibrary>,
    ) -> Result<Option<ReferenceImage>, DeckError> {
        match self {
            Self::None => Ok(None),
            Self::Upload(image) => Ok(Some(image.clone())),
            Self::Library(id) => {
                let Some(library) = library else {
                    return Err(DeckError::StyleNotFound(id.clone()));
                };
                library
                    .lookup(id)
                    .map_err(|err| DeckError::StyleLibrary(format!("{err:#}")))?
                    .map(Some)
                    .ok_or_else(|| DeckError::StyleNotFound(id.clone()))
            }
        }
    }
}

pub fn reference_from_path(path: &Path) -> Result<ReferenceImage> {
    let bytes = std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let label = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("reference")
        .to_string();
    Ok(ReferenceImage {
        label,
        mime_type: mime_for_path(path).unwrap_or("image/png").to_string(),
        bytes,
    })
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> ReferenceImage {
        ReferenceImage {
            label: "upload.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn selections_are_mutually_exclusive() -> Result<(), DeckError> {
        let mut selection = StyleSelection::default();
        assert_eq!(selection.resolve(None)?, None);

        selection.select_library("brand");
        selection.select_upload(upload());
        assert_eq!(selection.resolve(None)?, Some(upload()));

        selection.select_library("brand");
        assert!(matches!(selection, StyleSelection::Library(_)));
        selection.clear();
        assert_eq!(selection, StyleSelection::None);
        Ok(())
    }

    #[test]
    fn library_selection_reads_from_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("brand.jpg"), b"jpeg-bytes")?;
        let library = DirectoryStyleLibrary::new(temp.path());

        let mut selection = StyleSelection::default();
        selection.select_library("brand");
        let resolved = selection.resolve(Some(&library))?;
        let Some(reference) = resolved else {
            anyhow::bail!("expected a reference image");
        };
        assert_eq!(reference.label, "brand.jpg");
        assert_eq!(reference.mime_type, "image/jpeg");
        assert_eq!(reference.bytes, b"jpeg-bytes".to_vec());
        Ok(())
    }

    #[test]
    fn unknown_library_id_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let library = DirectoryStyleLibrary::new(temp.path());
        let mut selection = StyleSelection::default();
        selection.select_library("../secret");
        assert_eq!(
            selection.resolve(Some(&library)),
            Err(DeckError::StyleNotFound("../secret".to_string()))
        );
        Ok(())
    }
}
