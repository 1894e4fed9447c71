//! Enrollment: turning labeled reference photos into a gallery of embeddings.

use crate::detector::DetectorOptions;
use crate::pipeline::{AnalyzeError, FaceAnalyzer};
use crate::source::{ImageFetchError, ImageSource};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All reference embeddings enrolled under one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledEmbedding {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

/// Label-unique, insertion-ordered set of enrolled identities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    entries: Vec<LabeledEmbedding>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an embedding under `label`, extending an existing entry if present.
    pub fn insert(&mut self, label: &str, embedding: Embedding) {
        match self.entries.iter_mut().find(|e| e.label == label) {
            Some(entry) => entry.embeddings.push(embedding),
            None => self.entries.push(LabeledEmbedding {
                label: label.to_string(),
                embeddings: vec![embedding],
            }),
        }
    }

    pub fn get(&self, label: &str) -> Option<&LabeledEmbedding> {
        self.entries.iter().find(|e| e.label == label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabeledEmbedding> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of reference embeddings across all labels.
    pub fn embedding_count(&self) -> usize {
        self.entries.iter().map(|e| e.embeddings.len()).sum()
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a LabeledEmbedding;
    type IntoIter = std::slice::Iter<'a, LabeledEmbedding>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoFaceDetected,
}

/// What happened to one label during enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LabelOutcome {
    Enrolled { confidence: f32 },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelReport {
    pub label: String,
    #[serde(flatten)]
    pub outcome: LabelOutcome,
}

/// The gallery plus a per-label account of how it was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReport {
    pub gallery: Gallery,
    pub outcomes: Vec<LabelReport>,
}

impl EnrollmentReport {
    pub fn enrolled(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, LabelOutcome::Enrolled { .. }))
            .map(|r| r.label.as_str())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, LabelOutcome::Skipped { .. }))
            .map(|r| r.label.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    ImageFetch(#[from] ImageFetchError),
    #[error("analysis of {label:?} failed: {source}")]
    Analyze {
        label: String,
        #[source]
        source: AnalyzeError,
    },
}

/// Build a gallery from one reference photo per label, in label order.
///
/// A photo without a detectable face is recorded as skipped and leaves the
/// label out of the gallery. A photo that cannot be fetched aborts the whole
/// batch; no partial gallery is returned.
pub fn build_gallery(
    analyzer: &mut dyn FaceAnalyzer,
    source: &dyn ImageSource,
    labels: &[String],
    options: &DetectorOptions,
) -> Result<EnrollmentReport, EnrollError> {
    let mut report = EnrollmentReport::default();

    for label in labels {
        let image = source.fetch(label)?;
        let description = analyzer
            .describe_single(&image, options)
            .map_err(|source| EnrollError::Analyze {
                label: label.clone(),
                source,
            })?;

        let outcome = match description {
            Some(face) => {
                let confidence = face.face.confidence;
                report.gallery.insert(label, face.embedding);
                tracing::debug!(label = %label, confidence, "label enrolled");
                LabelOutcome::Enrolled { confidence }
            }
            None => {
                tracing::debug!(label = %label, "no face in reference image, label skipped");
                LabelOutcome::Skipped {
                    reason: SkipReason::NoFaceDetected,
                }
            }
        };
        report.outcomes.push(LabelReport {
            label: label.clone(),
            outcome,
        });
    }

    tracing::info!(
        requested = labels.len(),
        enrolled = report.gallery.len(),
        skipped = report.skipped().count(),
        "gallery built"
    );

    Ok(report)
}
