use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance over the shared dimensions of both embeddings.
    ///
    /// Callers comparing embeddings of unknown provenance check the lengths
    /// first; see [`crate::FaceMatcher::find_best_match`].
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Error, Debug)]
#[error("pixel buffer holds {actual} bytes, {width}x{height} grayscale needs {expected}")]
pub struct ImageShapeError {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

/// An 8-bit grayscale image handed to the face analyzer.
///
/// Both enrollment photos and live camera frames are reduced to this form so
/// that gallery and query embeddings come from identical preprocessing.
#[derive(Debug, Clone)]
pub struct FaceImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl FaceImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, ImageShapeError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(ImageShapeError {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Convert a decoded image of any color type to grayscale.
    pub fn from_dynamic(image: &image::DynamicImage) -> Self {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        Self {
            data: gray.into_raw(),
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single analyzed face: where it is, how it was aligned, what it embeds to.
#[derive(Debug, Clone)]
pub struct FaceDescription {
    pub face: BoundingBox,
    /// Five alignment points derived from the landmark estimator.
    pub landmarks: [(f32, f32); 5],
    pub embedding: Embedding,
}
