//! 106-point facial landmark estimator (InsightFace `2d106det`) via ONNX Runtime.
//!
//! The detector's own keypoints are coarse; the estimator refines them from a
//! face-centered crop before the five alignment points are taken.

use crate::alignment::SimilarityTransform;
use crate::types::{BoundingBox, FaceImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 192;
const LANDMARK_POINTS: usize = 106;
/// Crop side relative to the larger face box dimension.
const LANDMARK_CROP_MARGIN: f32 = 1.5;

// Indices into the 106-point layout used for five-point alignment.
const LEFT_EYE: usize = 38;
const RIGHT_EYE: usize = 88;
const NOSE_TIP: usize = 86;
const MOUTH_LEFT: usize = 52;
const MOUTH_RIGHT: usize = 61;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Dense landmarks in image coordinates.
#[derive(Debug, Clone)]
pub struct FaceLandmarks {
    pub points: Vec<(f32, f32)>,
}

impl FaceLandmarks {
    /// Reduce to [left_eye, right_eye, nose, left_mouth, right_mouth].
    ///
    /// Left/right are image-left/image-right, whatever the markup order.
    pub fn five_point(&self) -> [(f32, f32); 5] {
        let at = |i: usize| self.points.get(i).copied().unwrap_or((0.0, 0.0));
        let ordered = |p: (f32, f32), q: (f32, f32)| if p.0 <= q.0 { (p, q) } else { (q, p) };

        let (left_eye, right_eye) = ordered(at(LEFT_EYE), at(RIGHT_EYE));
        let (mouth_left, mouth_right) = ordered(at(MOUTH_LEFT), at(MOUTH_RIGHT));
        [left_eye, right_eye, at(NOSE_TIP), mouth_left, mouth_right]
    }
}

pub struct LandmarkEstimator {
    session: Session,
}

impl LandmarkEstimator {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded 2d106det landmark model");

        Ok(Self { session })
    }

    /// Estimate landmarks for one detected face.
    pub fn estimate(
        &mut self,
        image: &FaceImage,
        face: &BoundingBox,
    ) -> Result<FaceLandmarks, LandmarkError> {
        let crop = crop_transform(face);
        let pixels = crop.warp(image, LANDMARK_INPUT_SIZE);
        let input = preprocess(&pixels);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        decode_points(raw, &crop)
    }
}

/// Square crop centered on the face box, scaled to the network input.
fn crop_transform(face: &BoundingBox) -> SimilarityTransform {
    let side = face.width.max(face.height).max(1.0) * LANDMARK_CROP_MARGIN;
    let scale = LANDMARK_INPUT_SIZE as f32 / side;
    SimilarityTransform::centered_crop(face.center(), scale, LANDMARK_INPUT_SIZE)
}

/// Grayscale crop → NCHW tensor; the model takes raw pixel values.
fn preprocess(pixels: &[u8]) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (i, &p) in pixels.iter().take(size * size).enumerate() {
        let (y, x) = (i / size, i % size);
        for c in 0..3 {
            tensor[[0, c, y, x]] = p as f32;
        }
    }
    tensor
}

/// Map network output ([-1, 1] crop space, x/y interleaved) back to the image.
fn decode_points(raw: &[f32], crop: &SimilarityTransform) -> Result<FaceLandmarks, LandmarkError> {
    if raw.len() != LANDMARK_POINTS * 2 {
        return Err(LandmarkError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            LANDMARK_POINTS * 2,
            raw.len()
        )));
    }
    let inverse = crop
        .inverse()
        .ok_or_else(|| LandmarkError::InferenceFailed("degenerate face crop".into()))?;

    let half = (LANDMARK_INPUT_SIZE / 2) as f32;
    let points = raw
        .chunks_exact(2)
        .map(|xy| inverse.apply(((xy[0] + 1.0) * half, (xy[1] + 1.0) * half)))
        .collect();

    Ok(FaceLandmarks { points })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_crop_transform_centers_face() {
        let f = face(100.0, 50.0, 80.0, 120.0);
        let t = crop_transform(&f);
        let (cx, cy) = t.apply(f.center());
        assert!((cx - 96.0).abs() < 1e-3);
        assert!((cy - 96.0).abs() < 1e-3);
        // Larger side (120) times margin fills the crop
        assert!((t.a - 192.0 / 180.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_points_center_maps_to_face_center() {
        let f = face(100.0, 50.0, 80.0, 120.0);
        let t = crop_transform(&f);
        let raw = vec![0.0f32; LANDMARK_POINTS * 2];
        let lms = decode_points(&raw, &t).unwrap();
        assert_eq!(lms.points.len(), LANDMARK_POINTS);
        let (x, y) = lms.points[0];
        assert!((x - 140.0).abs() < 1e-2, "x = {x}");
        assert!((y - 110.0).abs() < 1e-2, "y = {y}");
    }

    #[test]
    fn test_decode_points_corner() {
        // (-1, -1) is the crop's top-left corner: center minus half the crop side
        let f = face(0.0, 0.0, 100.0, 100.0);
        let t = crop_transform(&f);
        let mut raw = vec![0.0f32; LANDMARK_POINTS * 2];
        raw[0] = -1.0;
        raw[1] = -1.0;
        let lms = decode_points(&raw, &t).unwrap();
        let (x, y) = lms.points[0];
        assert!((x + 25.0).abs() < 1e-2, "x = {x}");
        assert!((y + 25.0).abs() < 1e-2, "y = {y}");
    }

    #[test]
    fn test_decode_points_rejects_wrong_length() {
        let t = crop_transform(&face(0.0, 0.0, 10.0, 10.0));
        assert!(matches!(
            decode_points(&[0.0; 10], &t),
            Err(LandmarkError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_five_point_orders_left_right() {
        let mut points = vec![(0.0f32, 0.0f32); LANDMARK_POINTS];
        points[LEFT_EYE] = (70.0, 40.0);
        points[RIGHT_EYE] = (30.0, 40.0);
        points[NOSE_TIP] = (50.0, 60.0);
        points[MOUTH_LEFT] = (35.0, 80.0);
        points[MOUTH_RIGHT] = (65.0, 80.0);
        let five = FaceLandmarks { points }.five_point();
        assert_eq!(five[0], (30.0, 40.0));
        assert_eq!(five[1], (70.0, 40.0));
        assert_eq!(five[2], (50.0, 60.0));
        assert_eq!(five[3], (35.0, 80.0));
        assert_eq!(five[4], (65.0, 80.0));
    }

    #[test]
    fn test_preprocess_keeps_raw_values() {
        let pixels = vec![200u8; LANDMARK_INPUT_SIZE * LANDMARK_INPUT_SIZE];
        let tensor = preprocess(&pixels);
        assert_eq!(tensor.shape(), &[1, 3, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE]);
        assert_eq!(tensor[[0, 2, 191, 191]], 200.0);
    }
}
