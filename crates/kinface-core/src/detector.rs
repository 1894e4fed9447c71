//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides with NMS post-processing. The
//! network input size is chosen per call so the same session serves both the
//! accurate enrollment configuration and the fast live-frame configuration.

use crate::types::{BoundingBox, FaceImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector input size {0} must be a multiple of 32 in 32..={max}", max = MAX_INPUT_SIZE)]
    InvalidInputSize(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Largest accepted network input side.
pub const MAX_INPUT_SIZE: usize = 1280;

/// Detector configuration for a single call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Square network input in pixels; the frame is letterboxed into it.
    pub input_size: usize,
    /// Minimum anchor score kept before NMS.
    pub score_threshold: f32,
}

impl DetectorOptions {
    /// Full-resolution pass used for reference photos.
    pub const ACCURATE: Self = Self {
        input_size: 640,
        score_threshold: 0.5,
    };

    /// Reduced-resolution pass used for live frames.
    pub const FAST: Self = Self {
        input_size: 320,
        score_threshold: 0.5,
    };

    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.input_size == 0 || self.input_size % 32 != 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(DetectorError::InvalidInputSize(self.input_size));
        }
        Ok(())
    }
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self::ACCURATE
    }
}

/// Scale and padding applied when fitting a frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, input_size: usize) -> Self {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (input_size as f32 - new_w) / 2.0,
            pad_y: (input_size as f32 - new_h) / 2.0,
        }
    }

    /// Map a point in network input space back to frame space.
    fn to_frame(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// Raw tensors for one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, returning bounding boxes sorted by confidence (highest first).
    pub fn detect(
        &mut self,
        image: &FaceImage,
        options: &DetectorOptions,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        options.validate()?;
        if image.is_empty() {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image, options.input_size);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let level = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(&level, options, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox a grayscale frame into a normalized NCHW tensor.
///
/// Bilinear resize; padding uses the mean so it normalizes to 0.0.
fn preprocess(image: &FaceImage, input_size: usize) -> (Array4<f32>, Letterbox) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let frame = image.data();
    let letterbox = Letterbox::fit(width, height, input_size);

    let new_w = ((width as f32 * letterbox.scale).round() as usize).clamp(1, input_size);
    let new_h = ((height as f32 * letterbox.scale).round() as usize).clamp(1, input_size);
    let off_x = letterbox.pad_x.floor() as usize;
    let off_y = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;

    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
    for y in 0..input_size {
        for x in 0..input_size {
            let inside = y >= off_y && y < off_y + new_h && x >= off_x && x < off_x + new_w;
            let pixel = if inside {
                let src_x = ((x - off_x) as f32 + 0.5) * inv_scale - 0.5;
                let src_y = ((y - off_y) as f32 + 0.5) * inv_scale - 0.5;
                bilinear(frame, width, height, src_x, src_y)
            } else {
                SCRFD_MEAN
            };

            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            // Grayscale → 3-channel
            for c in 0..3 {
                tensor[[0, c, y, x]] = normalized;
            }
        }
    }

    (tensor, letterbox)
}

/// Bilinear sample with edge clamping.
fn bilinear(frame: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> f32 {
    let x0 = (sx.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (sy.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (sx - sx.floor()).clamp(0.0, 1.0);
    let fy = (sy - sy.floor()).clamp(0.0, 1.0);

    let tl = frame[y0 * width + x0] as f32;
    let tr = frame[y0 * width + x1] as f32;
    let bl = frame[y1 * width + x0] as f32;
    let br = frame[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Map output tensor names to stride slots.
///
/// Named exports ("score_8", "bbox_16", "kps_32", ...) are matched by name;
/// anything else uses the standard positional layout
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0usize, 0usize, 0usize); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD: unrecognized output names, using positions");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Decode detections for a single stride level.
fn decode_stride(
    level: &StrideOutputs<'_>,
    options: &DetectorOptions,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let stride = level.stride;
    let step = stride as f32;
    let grid_w = options.input_size / stride;
    let grid_h = options.input_size / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = level.scores.get(idx).copied().unwrap_or(0.0);
        if score <= options.score_threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * step;
        let anchor_y = (cell / grid_w) as f32 * step;

        let Some(d) = level.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.to_frame((anchor_x - d[0] * step, anchor_y - d[1] * step));
        let (x2, y2) = letterbox.to_frame((anchor_x + d[2] * step, anchor_y + d[3] * step));

        let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_frame((anchor_x + k[i * 2] * step, anchor_y + k[i * 2 + 1] * step))
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by confidence, descending.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_options_validate() {
        assert!(DetectorOptions::ACCURATE.validate().is_ok());
        assert!(DetectorOptions::FAST.validate().is_ok());
        let bad = DetectorOptions { input_size: 300, score_threshold: 0.5 };
        assert!(matches!(bad.validate(), Err(DetectorError::InvalidInputSize(300))));
        let zero = DetectorOptions { input_size: 0, score_threshold: 0.5 };
        assert!(zero.validate().is_err());
        let largest = DetectorOptions { input_size: MAX_INPUT_SIZE, score_threshold: 0.5 };
        assert!(largest.validate().is_ok());
        let huge = DetectorOptions { input_size: 3_200_000, score_threshold: 0.5 };
        assert!(matches!(huge.validate(), Err(DetectorError::InvalidInputSize(3_200_000))));
    }

    #[test]
    fn test_fast_is_smaller_than_accurate() {
        assert!(DetectorOptions::FAST.input_size < DetectorOptions::ACCURATE.input_size);
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping_and_sorts() {
        let detections = vec![
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, 320);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert!((lb.pad_y - 40.0).abs() < 1e-6);

        let lb = Letterbox::fit(640, 480, 320);
        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let boxed = (orig_x * lb.scale + lb.pad_x, orig_y * lb.scale + lb.pad_y);
        let (rx, ry) = lb.to_frame(boxed);
        assert!((rx - orig_x).abs() < 0.1, "x: {rx}");
        assert!((ry - orig_y).abs() < 0.1, "y: {ry}");
    }

    #[test]
    fn test_preprocess_shape_follows_options() {
        let image = FaceImage::new(vec![128u8; 64 * 48], 64, 48).unwrap();
        let (tensor, _) = preprocess(&image, 320);
        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        let (tensor, _) = preprocess(&image, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
    }

    #[test]
    fn test_preprocess_padding_normalizes_to_zero() {
        // 64x32 into 64: rows above y=16 are padding
        let image = FaceImage::new(vec![255u8; 64 * 32], 64, 32).unwrap();
        let (tensor, lb) = preprocess(&image, 64);
        assert!((lb.pad_y - 16.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 0, 32, 32]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
    }

    #[test]
    fn test_bilinear_uniform() {
        let frame = vec![128u8; 10 * 10];
        for &(x, y) in &[(0.0, 0.0), (4.5, 3.25), (9.0, 9.0), (-1.0, 20.0)] {
            assert!((bilinear(&frame, 10, 10, x, y) - 128.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // input 64, stride 32 → 2x2 grid, 8 anchors. Fire anchor 3 (cell 1: x=32, y=0).
        let options = DetectorOptions { input_size: 64, score_threshold: 0.5 };
        let mut scores = vec![0.0f32; 8];
        scores[3] = 0.9;
        let bboxes = vec![1.0f32; 8 * 4];
        let kps = vec![0.0f32; 8 * 10];
        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let dets = decode_stride(&level, &options, &lb);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 0.0).abs() < 1e-6);
        assert!((d.y + 32.0).abs() < 1e-6);
        assert!((d.width - 64.0).abs() < 1e-6);
        let lms = d.landmarks.unwrap();
        assert_eq!(lms[0], (32.0, 0.0));
    }

    #[test]
    fn test_decode_stride_respects_threshold() {
        let options = DetectorOptions { input_size: 64, score_threshold: 0.95 };
        let scores = vec![0.9f32; 8];
        let bboxes = vec![1.0f32; 32];
        let kps = vec![0.0f32; 80];
        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&level, &options, &lb).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (448 + i).to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
