//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to the canonical 112×112 ArcFace position using the
//! five InsightFace reference landmarks, and provides the axis-aligned crop
//! warp used by the landmark estimator.

use crate::types::FaceImage;

/// ArcFace reference landmarks for a 112×112 output.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform mapping source coordinates to destination coordinates:
///
/// ```text
/// x' = a·x − b·y + tx
/// y' = b·x + a·y + ty
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Uniform scale about `center`, placing it at the middle of a square output.
    pub fn centered_crop(center: (f32, f32), scale: f32, out_size: usize) -> Self {
        let half = out_size as f32 / 2.0;
        Self {
            a: scale,
            b: 0.0,
            tx: half - center.0 * scale,
            ty: half - center.1 * scale,
        }
    }

    /// Closed-form least-squares estimate from `src` points onto `dst` points.
    ///
    /// Falls back to the identity when the source points are degenerate.
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Self {
        let n = src.len().min(dst.len());
        if n == 0 {
            return Self::IDENTITY;
        }
        let inv_n = 1.0 / n as f32;
        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx * inv_n, sy * inv_n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for i in 0..n {
            let (sx, sy) = (src[i].0 - msx, src[i].1 - msy);
            let (dx, dy) = (dst[i].0 - mdx, dst[i].1 - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if norm < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` when the scale is zero.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }

    /// Render a square `out_size` crop of `image` through this transform.
    ///
    /// Bilinear interpolation; samples outside the source read as 0.
    pub fn warp(&self, image: &FaceImage, out_size: usize) -> Vec<u8> {
        let Some(inv) = self.inverse() else {
            return vec![0u8; out_size * out_size];
        };

        let w = image.width() as i32;
        let h = image.height() as i32;
        let data = image.data();
        let sample = |x: i32, y: i32| -> f32 {
            if x >= 0 && x < w && y >= 0 && y < h {
                data[y as usize * w as usize + x as usize] as f32
            } else {
                0.0
            }
        };

        let mut output = vec![0u8; out_size * out_size];
        for oy in 0..out_size {
            for ox in 0..out_size {
                let (sx, sy) = inv.apply((ox as f32, oy as f32));
                let x0 = sx.floor() as i32;
                let y0 = sy.floor() as i32;
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1) * fx * fy;

                output[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
        output
    }
}

/// Align a detected face to a canonical 112×112 crop for ArcFace.
pub fn align_face(image: &FaceImage, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    SimilarityTransform::estimate(landmarks, &REFERENCE_LANDMARKS_112).warp(image, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() < tol, "{a} vs {b}");
    }

    #[test]
    fn test_identity_estimate() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = SimilarityTransform::estimate(&pts, &pts);
        assert_close(t.a, 1.0, 1e-4);
        assert_close(t.b, 0.0, 1e-4);
        assert_close(t.tx, 0.0, 1e-3);
        assert_close(t.ty, 0.0, 1e-3);
    }

    #[test]
    fn test_scaled_estimate() {
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert_close(t.a, 0.5, 1e-3);
        assert_close(t.b, 0.0, 1e-3);
    }

    #[test]
    fn test_rotation_recovered() {
        // 90° rotation about the origin plus a shift
        let src = REFERENCE_LANDMARKS_112;
        let dst = src.map(|(x, y)| (-y + 10.0, x - 5.0));
        let t = SimilarityTransform::estimate(&src, &dst);
        assert_close(t.a, 0.0, 1e-3);
        assert_close(t.b, 1.0, 1e-3);
        for (s, d) in src.iter().zip(dst.iter()) {
            let p = t.apply(*s);
            assert_close(p.0, d.0, 1e-2);
            assert_close(p.1, d.1, 1e-2);
        }
    }

    #[test]
    fn test_degenerate_points_fall_back_to_identity() {
        let src = [(5.0, 5.0); 5];
        let t = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert_eq!(t, SimilarityTransform::IDENTITY);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = SimilarityTransform { a: 0.8, b: 0.3, tx: 12.0, ty: -4.0 };
        let inv = t.inverse().unwrap();
        let p = (33.0, 71.0);
        let q = inv.apply(t.apply(p));
        assert_close(q.0, p.0, 1e-3);
        assert_close(q.1, p.1, 1e-3);
    }

    #[test]
    fn test_centered_crop_maps_center_to_middle() {
        let t = SimilarityTransform::centered_crop((150.0, 90.0), 0.64, 192);
        let (x, y) = t.apply((150.0, 90.0));
        assert_close(x, 96.0, 1e-4);
        assert_close(y, 96.0, 1e-4);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = FaceImage::new(vec![128u8; 640 * 480], 640, 480).unwrap();
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let (w, h) = (200usize, 200usize);
        let mut data = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch at the left eye survives bilinear interpolation
        let (lx, ly) = (src[0].0 as usize, src[0].1 as usize);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                data[y * w + x] = 255;
            }
        }
        let image = FaceImage::new(data, w as u32, h as u32).unwrap();
        let aligned = align_face(&image, &src);

        let rx = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let max_val = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned[y * ALIGNED_SIZE + x])
            .max()
            .unwrap_or(0);
        assert!(max_val > 100, "expected bright patch near ({rx}, {ry}), max={max_val}");
    }
}
