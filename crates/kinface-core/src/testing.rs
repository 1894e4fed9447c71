//! Deterministic stand-ins for the ONNX analyzer and the photo directory.
//!
//! A scripted "face" is an image filled with a non-zero identity value; the
//! analyzer turns it into a one-hot embedding for that identity. An all-zero
//! image contains no face.

use crate::detector::{DetectorError, DetectorOptions};
use crate::models::{ModelLoadError, ModelLoader};
use crate::pipeline::{AnalyzeError, FaceAnalyzer};
use crate::source::{ImageFetchError, ImageSource};
use crate::types::{BoundingBox, Embedding, FaceDescription, FaceImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub const SCRIPTED_DIM: usize = 16;
const SCRIPTED_SIZE: u32 = 4;

/// Image showing the face of identity `id` (must be non-zero).
pub fn face_image(id: u8) -> FaceImage {
    assert!(id != 0, "identity 0 is reserved for blank images");
    filled(id)
}

/// Image without any face.
pub fn blank_image() -> FaceImage {
    filled(0)
}

fn filled(value: u8) -> FaceImage {
    let n = (SCRIPTED_SIZE * SCRIPTED_SIZE) as usize;
    FaceImage::new(vec![value; n], SCRIPTED_SIZE, SCRIPTED_SIZE)
        .unwrap_or_else(|e| unreachable!("{e}"))
}

/// The embedding [`ScriptedAnalyzer`] produces for identity `id`.
pub fn face_embedding(id: u8) -> Embedding {
    let mut values = vec![0.0f32; SCRIPTED_DIM];
    values[id as usize % SCRIPTED_DIM] = 1.0;
    Embedding::new(values)
}

type OptionLog = Arc<Mutex<Vec<DetectorOptions>>>;

pub struct ScriptedAnalyzer {
    log: OptionLog,
    fail: bool,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            fail: false,
        }
    }

    /// Every call returns an inference error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn last_options(&self) -> Option<DetectorOptions> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }
}

impl Default for ScriptedAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn describe_single(
        &mut self,
        image: &FaceImage,
        options: &DetectorOptions,
    ) -> Result<Option<FaceDescription>, AnalyzeError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*options);

        if self.fail {
            return Err(DetectorError::InferenceFailed("scripted failure".into()).into());
        }

        let id = image.data().first().copied().unwrap_or(0);
        if id == 0 {
            return Ok(None);
        }

        let (w, h) = (image.width() as f32, image.height() as f32);
        let landmarks = [
            (0.3 * w, 0.4 * h),
            (0.7 * w, 0.4 * h),
            (0.5 * w, 0.6 * h),
            (0.35 * w, 0.8 * h),
            (0.65 * w, 0.8 * h),
        ];
        Ok(Some(FaceDescription {
            face: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: w,
                height: h,
                confidence: 0.9,
                landmarks: Some(landmarks),
            },
            landmarks,
            embedding: face_embedding(id),
        }))
    }
}

/// Loader handing out [`ScriptedAnalyzer`]s, or failing on demand.
#[derive(Clone, Default)]
pub struct ScriptedLoader {
    log: OptionLog,
    attempts: Arc<AtomicUsize>,
    fail: bool,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every load fails as if the detector model were missing.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Detector options seen by every analyzer this loader produced.
    pub fn options_seen(&self) -> Vec<DetectorOptions> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ModelLoader for ScriptedLoader {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ModelLoadError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectorError::ModelNotFound("scripted/det_10g.onnx".into()).into());
        }
        Ok(Box::new(ScriptedAnalyzer {
            log: Arc::clone(&self.log),
            fail: false,
        }))
    }
}

/// In-memory label → image map.
#[derive(Clone, Default)]
pub struct MemoryImageSource {
    images: HashMap<String, FaceImage>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: &str, image: FaceImage) -> Self {
        self.images.insert(label.to_lowercase(), image);
        self
    }
}

impl ImageSource for MemoryImageSource {
    fn fetch(&self, label: &str) -> Result<FaceImage, ImageFetchError> {
        let key = label.to_lowercase();
        self.images.get(&key).cloned().ok_or_else(|| ImageFetchError {
            label: label.to_string(),
            path: PathBuf::from(format!("memory://{key}")),
            reason: "no such image".into(),
        })
    }
}
