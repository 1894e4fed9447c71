//! Model loading: the three ONNX artifacts behind [`OnnxFaceAnalyzer`].

use crate::detector::{DetectorError, FaceDetector};
use crate::landmarks::{LandmarkError, LandmarkEstimator};
use crate::pipeline::{FaceAnalyzer, OnnxFaceAnalyzer};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_FILE: &str = "det_10g.onnx";
pub const LANDMARKS_FILE: &str = "2d106det.onnx";
pub const RECOGNIZER_FILE: &str = "w600k_r50.onnx";

/// Which of the three models failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArtifact {
    Detector,
    Landmarks,
    Recognizer,
}

impl fmt::Display for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelArtifact::Detector => "detector",
            ModelArtifact::Landmarks => "landmark estimator",
            ModelArtifact::Recognizer => "recognizer",
        })
    }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("failed to load detector model: {0}")]
    Detector(#[from] DetectorError),
    #[error("failed to load landmark estimator model: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("failed to load recognizer model: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl ModelLoadError {
    pub fn artifact(&self) -> ModelArtifact {
        match self {
            ModelLoadError::Detector(_) => ModelArtifact::Detector,
            ModelLoadError::Landmarks(_) => ModelArtifact::Landmarks,
            ModelLoadError::Recognizer(_) => ModelArtifact::Recognizer,
        }
    }
}

/// Produces a ready analyzer. Either all models load or none are used.
pub trait ModelLoader: Send + 'static {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ModelLoadError>;
}

/// Paths to the detector, landmark and recognition models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSet {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelSet {
    /// Default artifact names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detector: dir.join(DETECTOR_FILE),
            landmarks: dir.join(LANDMARKS_FILE),
            recognizer: dir.join(RECOGNIZER_FILE),
        }
    }

    /// Artifacts that are not present on disk.
    pub fn missing(&self) -> Vec<(ModelArtifact, &Path)> {
        [
            (ModelArtifact::Detector, self.detector.as_path()),
            (ModelArtifact::Landmarks, self.landmarks.as_path()),
            (ModelArtifact::Recognizer, self.recognizer.as_path()),
        ]
        .into_iter()
        .filter(|(_, path)| !path.exists())
        .collect()
    }

    pub fn load_analyzer(&self) -> Result<OnnxFaceAnalyzer, ModelLoadError> {
        let detector = FaceDetector::load(&self.detector)?;
        let landmarks = LandmarkEstimator::load(&self.landmarks)?;
        let recognizer = FaceRecognizer::load(&self.recognizer)?;

        tracing::info!(
            detector = %self.detector.display(),
            landmarks = %self.landmarks.display(),
            recognizer = %self.recognizer.display(),
            "face models loaded"
        );

        Ok(OnnxFaceAnalyzer::new(detector, landmarks, recognizer))
    }
}

impl ModelLoader for ModelSet {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ModelLoadError> {
        Ok(Box::new(self.load_analyzer()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_dir_uses_default_names() {
        let set = ModelSet::in_dir("/opt/models");
        assert_eq!(set.detector, Path::new("/opt/models/det_10g.onnx"));
        assert_eq!(set.landmarks, Path::new("/opt/models/2d106det.onnx"));
        assert_eq!(set.recognizer, Path::new("/opt/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_missing_lists_every_absent_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let set = ModelSet::in_dir(dir.path());
        std::fs::write(&set.landmarks, b"stub").unwrap();

        let missing: Vec<ModelArtifact> = set.missing().into_iter().map(|(a, _)| a).collect();
        assert_eq!(missing, vec![ModelArtifact::Detector, ModelArtifact::Recognizer]);
    }

    #[test]
    fn test_load_fails_on_missing_detector() {
        let dir = tempfile::tempdir().unwrap();
        let err = match ModelSet::in_dir(dir.path()).load() {
            Ok(_) => panic!("expected load failure"),
            Err(e) => e,
        };
        assert_eq!(err.artifact(), ModelArtifact::Detector);
        assert!(err.to_string().contains("det_10g.onnx"), "{err}");
    }

    #[test]
    fn test_load_fails_on_malformed_detector() {
        let dir = tempfile::tempdir().unwrap();
        let set = ModelSet::in_dir(dir.path());
        std::fs::write(&set.detector, b"not an onnx graph").unwrap();

        let err = match set.load() {
            Ok(_) => panic!("expected load failure"),
            Err(e) => e,
        };
        assert_eq!(err.artifact(), ModelArtifact::Detector);
        assert!(matches!(err, ModelLoadError::Detector(DetectorError::Ort(_))), "{err}");
    }

    #[test]
    fn test_error_names_failing_artifact() {
        let landmarks: ModelLoadError = LandmarkError::ModelNotFound("2d106det.onnx".into()).into();
        assert_eq!(landmarks.artifact(), ModelArtifact::Landmarks);

        let recognizer: ModelLoadError =
            RecognizerError::ModelNotFound("w600k_r50.onnx".into()).into();
        assert_eq!(recognizer.artifact(), ModelArtifact::Recognizer);
        assert!(recognizer.to_string().starts_with("failed to load recognizer model"));
    }
}
