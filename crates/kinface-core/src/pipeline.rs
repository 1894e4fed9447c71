//! Single-face analysis: detect → landmarks → align → embed.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::landmarks::{LandmarkError, LandmarkEstimator};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{FaceDescription, FaceImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// The face-embedding capability the gallery builder and engine are written against.
///
/// `Ok(None)` means no face was found. That is a normal outcome, not an error.
pub trait FaceAnalyzer: Send {
    /// Describe the highest-confidence face in `image`.
    fn describe_single(
        &mut self,
        image: &FaceImage,
        options: &DetectorOptions,
    ) -> Result<Option<FaceDescription>, AnalyzeError>;
}

/// ONNX Runtime implementation backed by SCRFD, 2d106det and ArcFace.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    landmarks: LandmarkEstimator,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub fn new(
        detector: FaceDetector,
        landmarks: LandmarkEstimator,
        recognizer: FaceRecognizer,
    ) -> Self {
        Self {
            detector,
            landmarks,
            recognizer,
        }
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn describe_single(
        &mut self,
        image: &FaceImage,
        options: &DetectorOptions,
    ) -> Result<Option<FaceDescription>, AnalyzeError> {
        let faces = self.detector.detect(image, options)?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };

        let dense = self.landmarks.estimate(image, &face)?;
        let landmarks = dense.five_point();
        let embedding = self.recognizer.extract(image, &landmarks)?;

        tracing::trace!(
            confidence = face.confidence,
            x = face.x,
            y = face.y,
            "face described"
        );

        Ok(Some(FaceDescription {
            face,
            landmarks,
            embedding,
        }))
    }
}
