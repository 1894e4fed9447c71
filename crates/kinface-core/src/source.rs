//! Reference image lookup for enrollment.

use crate::types::FaceImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
#[error("reference image for {label:?} unavailable at {}: {reason}", path.display())]
pub struct ImageFetchError {
    pub label: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Where enrollment photos come from.
pub trait ImageSource: Send {
    fn fetch(&self, label: &str) -> Result<FaceImage, ImageFetchError>;
}

/// Reads `<base>/<label, lowercased>.<extension>` from disk.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    base: PathBuf,
    extension: String,
}

impl DirectoryImageSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.base.join(format!("{}.{}", label.to_lowercase(), self.extension))
    }
}

impl ImageSource for DirectoryImageSource {
    fn fetch(&self, label: &str) -> Result<FaceImage, ImageFetchError> {
        let path = self.path_for(label);
        let decoded = image::open(&path).map_err(|e| ImageFetchError {
            label: label.to_string(),
            path: path.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            label,
            path = %path.display(),
            width = decoded.width(),
            height = decoded.height(),
            "reference image loaded"
        );

        Ok(FaceImage::from_dynamic(&decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_lowercases_label() {
        let source = DirectoryImageSource::new("/srv/faces");
        assert_eq!(source.path_for("Akmal"), Path::new("/srv/faces/akmal.jpg"));
        assert_eq!(source.path_for("UKAM"), Path::new("/srv/faces/ukam.jpg"));
    }

    #[test]
    fn test_custom_extension() {
        let source = DirectoryImageSource::new("faces").with_extension(".png");
        assert_eq!(source.path_for("Opa"), Path::new("faces/opa.png"));
    }

    #[test]
    fn test_fetch_decodes_to_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = image::RgbImage::from_pixel(8, 6, image::Rgb([0, 0, 0]));
        rgb.save(dir.path().join("opa.png")).unwrap();

        let source = DirectoryImageSource::new(dir.path()).with_extension("png");
        let img = source.fetch("Opa").unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
        assert!(img.data().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_fetch_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryImageSource::new(dir.path());
        let err = source.fetch("Akmal").unwrap_err();
        assert_eq!(err.label, "Akmal");
        assert_eq!(err.path, dir.path().join("akmal.jpg"));
    }

    #[test]
    fn test_fetch_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ukam.jpg"), b"not a jpeg").unwrap();
        let source = DirectoryImageSource::new(dir.path());
        assert!(source.fetch("Ukam").is_err());
    }
}
