//! Nearest-identity matching against an enrolled gallery.

use crate::gallery::Gallery;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Euclidean distance below which a match is accepted.
///
/// For unit-length ArcFace embeddings, d² = 2 − 2·cos, so 1.1 corresponds to
/// a cosine similarity of about 0.4.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 1.1;

pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLabel {
    Known(String),
    Unknown,
}

impl MatchLabel {
    pub fn as_known(&self) -> Option<&str> {
        match self {
            MatchLabel::Known(label) => Some(label),
            MatchLabel::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MatchLabel::Unknown)
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLabel::Known(label) => f.write_str(label),
            MatchLabel::Unknown => f.write_str(UNKNOWN_LABEL),
        }
    }
}

/// Best gallery match for one query embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Distance to the best label; `f32::INFINITY` when the gallery is empty.
    pub distance: f32,
}

impl MatchResult {
    pub fn into_label(self) -> Option<String> {
        match self.label {
            MatchLabel::Known(label) => Some(label),
            MatchLabel::Unknown => None,
        }
    }
}

/// Searchable gallery with an explicit acceptance threshold.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    gallery: Gallery,
    distance_threshold: f32,
}

impl FaceMatcher {
    pub fn new(gallery: Gallery, distance_threshold: f32) -> Self {
        Self {
            gallery,
            distance_threshold,
        }
    }

    pub fn with_default_threshold(gallery: Gallery) -> Self {
        Self::new(gallery, DEFAULT_DISTANCE_THRESHOLD)
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn distance_threshold(&self) -> f32 {
        self.distance_threshold
    }

    /// Find the closest label to `query`.
    ///
    /// A label's distance is the mean distance to its reference embeddings.
    /// Every entry is visited regardless of where the best one sits; on a tie
    /// the earlier label wins.
    ///
    /// References whose dimension differs from the query's are ignored, and
    /// a label with none left is never a candidate. An empty query matches
    /// nothing.
    pub fn find_best_match(&self, query: &Embedding) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_label: Option<&str> = None;

        let dim = query.values.len();
        if dim == 0 {
            tracing::debug!("empty query embedding");
            return MatchResult {
                label: MatchLabel::Unknown,
                distance: best_distance,
            };
        }

        for entry in &self.gallery {
            let (total, count) = entry
                .embeddings
                .iter()
                .filter(|reference| reference.values.len() == dim)
                .fold((0.0f32, 0usize), |(total, count), reference| {
                    (total + query.euclidean_distance(reference), count + 1)
                });
            if count == 0 {
                if !entry.embeddings.is_empty() {
                    tracing::debug!(
                        label = %entry.label,
                        dim,
                        "no reference of matching dimension"
                    );
                }
                continue;
            }
            let distance = total / count as f32;
            if distance < best_distance {
                best_distance = distance;
                best_label = Some(entry.label.as_str());
            }
        }

        let label = match best_label {
            Some(label) if best_distance < self.distance_threshold => {
                MatchLabel::Known(label.to_string())
            }
            _ => MatchLabel::Unknown,
        };

        MatchResult {
            label,
            distance: best_distance,
        }
    }
}
