use crate::engine::EngineStatus;
use kinface_core::{EnrollmentReport, FaceMatcher, Gallery};
use std::sync::Arc;

/// Everything a recognition call needs besides the frame.
///
/// Built once after enrollment and passed by reference to every call.
/// Re-enrollment produces a new context; existing clones keep the old gallery.
#[derive(Debug, Clone, Default)]
pub struct RecognitionContext {
    matcher: Option<Arc<FaceMatcher>>,
}

impl RecognitionContext {
    /// A context with no gallery. Every recognition through it yields no match.
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// An empty gallery gives an uninitialized context.
    pub fn new(gallery: Gallery, distance_threshold: f32) -> Self {
        if gallery.is_empty() {
            tracing::debug!("empty gallery, recognition context left uninitialized");
            return Self::uninitialized();
        }
        Self {
            matcher: Some(Arc::new(FaceMatcher::new(gallery, distance_threshold))),
        }
    }

    pub fn from_report(report: &EnrollmentReport, distance_threshold: f32) -> Self {
        Self::new(report.gallery.clone(), distance_threshold)
    }

    pub fn matcher(&self) -> Option<&Arc<FaceMatcher>> {
        self.matcher.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.matcher
            .as_deref()
            .map(|m| m.gallery().labels().collect())
            .unwrap_or_default()
    }
}

/// Where the recognition feature stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    ModelsLoaded,
    GalleryBuilt,
    Ready,
}

impl Lifecycle {
    pub fn of(status: &EngineStatus, ctx: &RecognitionContext) -> Self {
        match (status.models_loaded, status.gallery_built, ctx.is_ready()) {
            (false, _, _) => Lifecycle::Uninitialized,
            (true, _, true) => Lifecycle::Ready,
            (true, true, false) => Lifecycle::GalleryBuilt,
            (true, false, false) => Lifecycle::ModelsLoaded,
        }
    }

    pub fn is_ready(self) -> bool {
        self == Lifecycle::Ready
    }
}
