//! kinface-core — face enrollment and recognition.
//!
//! SCRFD detection, 2d106det landmarks and ArcFace embeddings on ONNX Runtime,
//! plus the gallery builder and nearest-identity matcher built on top of them.

pub mod alignment;
pub mod detector;
pub mod gallery;
pub mod landmarks;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod recognizer;
pub mod source;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use detector::DetectorOptions;
pub use gallery::{
    build_gallery, EnrollError, EnrollmentReport, Gallery, LabelOutcome, LabelReport,
    LabeledEmbedding, SkipReason,
};
pub use matcher::{FaceMatcher, MatchLabel, MatchResult, DEFAULT_DISTANCE_THRESHOLD};
pub use models::{ModelArtifact, ModelLoadError, ModelLoader, ModelSet};
pub use pipeline::{AnalyzeError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use source::{DirectoryImageSource, ImageFetchError, ImageSource};
pub use types::{BoundingBox, Embedding, FaceDescription, FaceImage, ImageShapeError};
