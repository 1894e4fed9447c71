use crate::context::RecognitionContext;
use kinface_core::{
    build_gallery, AnalyzeError, DetectorOptions, EnrollError, EnrollmentReport, FaceAnalyzer,
    FaceImage, FaceMatcher, ImageSource, MatchResult, ModelLoadError, ModelLoader,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("face models are not loaded")]
    ModelsNotLoaded,
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("frame analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Detector configurations for the two kinds of input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Reference photos: accuracy over speed.
    pub enroll_detector: DetectorOptions,
    /// Live frames: speed over accuracy.
    pub live_detector: DetectorOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            enroll_detector: DetectorOptions::ACCURATE,
            live_detector: DetectorOptions::FAST,
        }
    }
}

/// Outcome of running one live frame through detection and matching.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMatch {
    /// Models not loaded, or no gallery to match against.
    NotReady,
    NoFace,
    Matched(MatchResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatus {
    pub models_loaded: bool,
    /// At least one enrollment has completed since startup.
    pub gallery_built: bool,
    /// Labels in the most recently built gallery.
    pub enrolled_labels: usize,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    LoadModels {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Enroll {
        labels: Vec<String>,
        reply: oneshot::Sender<Result<EnrollmentReport, EngineError>>,
    },
    Recognize {
        frame: FaceImage,
        matcher: Option<Arc<FaceMatcher>>,
        reply: oneshot::Sender<Result<FrameMatch, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// The thread exits once every handle has been dropped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Load the detector, landmark and recognition models.
    ///
    /// On failure nothing is replaced; a previously loaded set stays in use.
    pub async fn load_models(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::LoadModels { reply }).await?
    }

    /// Build a gallery from the reference photo of each label.
    pub async fn enroll(&self, labels: Vec<String>) -> Result<EnrollmentReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll { labels, reply }).await?
    }

    /// Detect the most prominent face in a live frame and match it.
    pub async fn match_frame(
        &self,
        ctx: &RecognitionContext,
        frame: FaceImage,
    ) -> Result<FrameMatch, EngineError> {
        let matcher = ctx.matcher().cloned();
        self.request(|reply| EngineRequest::Recognize {
            frame,
            matcher,
            reply,
        })
        .await?
    }

    /// Label of the person in `frame`, or `None`.
    ///
    /// Never fails: an uninitialized engine, an empty context, a frame
    /// without a face, an unknown face and inference errors all give `None`.
    pub async fn recognize(&self, ctx: &RecognitionContext, frame: FaceImage) -> Option<String> {
        match self.match_frame(ctx, frame).await {
            Ok(FrameMatch::Matched(result)) => result.into_label(),
            Ok(FrameMatch::NoFace | FrameMatch::NotReady) => None,
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed");
                None
            }
        }
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// State owned by the engine thread.
struct Engine {
    loader: Box<dyn ModelLoader>,
    source: Box<dyn ImageSource>,
    options: EngineOptions,
    analyzer: Option<Box<dyn FaceAnalyzer>>,
    status: EngineStatus,
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::LoadModels { reply } => {
                let _ = reply.send(self.load_models());
            }
            EngineRequest::Enroll { labels, reply } => {
                let _ = reply.send(self.enroll(&labels));
            }
            EngineRequest::Recognize {
                frame,
                matcher,
                reply,
            } => {
                let _ = reply.send(self.recognize(&frame, matcher.as_deref()));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status);
            }
        }
    }

    fn load_models(&mut self) -> Result<(), EngineError> {
        let analyzer = self.loader.load()?;
        if self.analyzer.replace(analyzer).is_some() {
            tracing::info!("face models reloaded");
        }
        self.status.models_loaded = true;
        Ok(())
    }

    fn enroll(&mut self, labels: &[String]) -> Result<EnrollmentReport, EngineError> {
        let analyzer = self.analyzer.as_mut().ok_or(EngineError::ModelsNotLoaded)?;
        let report = build_gallery(
            analyzer.as_mut(),
            self.source.as_ref(),
            labels,
            &self.options.enroll_detector,
        )?;
        self.status.gallery_built = true;
        self.status.enrolled_labels = report.gallery.len();
        Ok(report)
    }

    fn recognize(
        &mut self,
        frame: &FaceImage,
        matcher: Option<&FaceMatcher>,
    ) -> Result<FrameMatch, EngineError> {
        let Some(analyzer) = self.analyzer.as_mut() else {
            return Ok(FrameMatch::NotReady);
        };

        let Some(face) = analyzer.describe_single(frame, &self.options.live_detector)? else {
            return Ok(FrameMatch::NoFace);
        };

        let Some(matcher) = matcher else {
            return Ok(FrameMatch::NotReady);
        };

        let result = matcher.find_best_match(&face.embedding);
        tracing::debug!(
            label = %result.label,
            distance = result.distance,
            confidence = face.face.confidence,
            "frame matched"
        );
        Ok(FrameMatch::Matched(result))
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models are not loaded yet; call [`EngineHandle::load_models`] first.
/// Until then every recognition returns [`FrameMatch::NotReady`].
pub fn spawn_engine(
    loader: impl ModelLoader,
    source: impl ImageSource + 'static,
    options: EngineOptions,
) -> Result<EngineHandle, EngineError> {
    let mut engine = Engine {
        loader: Box::new(loader),
        source: Box::new(source),
        options,
        analyzer: None,
        status: EngineStatus::default(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("kinface-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinface_core::testing::{
        blank_image, face_embedding, face_image, MemoryImageSource, ScriptedLoader,
    };
    use kinface_core::{Gallery, MatchLabel, ModelArtifact, DEFAULT_DISTANCE_THRESHOLD};

    fn family_source() -> MemoryImageSource {
        MemoryImageSource::new()
            .with("Akmal", face_image(1))
            .with("Opa", face_image(2))
            .with("Ukam", face_image(3))
    }

    fn family_labels() -> Vec<String> {
        ["Akmal", "Opa", "Ukam"].iter().map(|s| s.to_string()).collect()
    }

    fn start(loader: ScriptedLoader, source: MemoryImageSource) -> EngineHandle {
        spawn_engine(loader, source, EngineOptions::default()).unwrap()
    }

    fn ready_context(report: &EnrollmentReport) -> RecognitionContext {
        RecognitionContext::from_report(report, DEFAULT_DISTANCE_THRESHOLD)
    }

    #[tokio::test]
    async fn test_recognize_before_models_loaded_is_none() {
        let engine = start(ScriptedLoader::new(), family_source());
        let ctx = RecognitionContext::uninitialized();

        assert_eq!(engine.recognize(&ctx, face_image(1)).await, None);
        let outcome = engine.match_frame(&ctx, face_image(1)).await.unwrap();
        assert_eq!(outcome, FrameMatch::NotReady);
    }

    #[tokio::test]
    async fn test_recognize_before_enrollment_is_none() {
        let engine = start(ScriptedLoader::new(), family_source());
        engine.load_models().await.unwrap();
        let ctx = RecognitionContext::uninitialized();

        assert_eq!(engine.recognize(&ctx, face_image(1)).await, None);
        let outcome = engine.match_frame(&ctx, face_image(1)).await.unwrap();
        assert_eq!(outcome, FrameMatch::NotReady);
        // No face still wins over "not ready" once models are loaded
        let outcome = engine.match_frame(&ctx, blank_image()).await.unwrap();
        assert_eq!(outcome, FrameMatch::NoFace);
    }

    #[tokio::test]
    async fn test_enroll_requires_models() {
        let engine = start(ScriptedLoader::new(), family_source());
        let err = engine.enroll(family_labels()).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelsNotLoaded));
    }

    #[tokio::test]
    async fn test_model_load_failure_is_reported_and_retryable() {
        let loader = ScriptedLoader::failing();
        let engine = start(loader.clone(), family_source());

        for _ in 0..2 {
            match engine.load_models().await {
                Err(EngineError::ModelLoad(e)) => assert_eq!(e.artifact(), ModelArtifact::Detector),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(loader.attempts(), 2);
        assert!(!engine.status().await.unwrap().models_loaded);
    }

    #[tokio::test]
    async fn test_known_and_unknown_faces() {
        let engine = start(ScriptedLoader::new(), family_source());
        engine.load_models().await.unwrap();
        let report = engine.enroll(family_labels()).await.unwrap();
        let ctx = ready_context(&report);

        assert_eq!(engine.recognize(&ctx, face_image(1)).await.as_deref(), Some("Akmal"));
        assert_eq!(engine.recognize(&ctx, face_image(3)).await.as_deref(), Some("Ukam"));
        assert_eq!(engine.recognize(&ctx, face_image(7)).await, None);
        assert_eq!(engine.recognize(&ctx, blank_image()).await, None);

        match engine.match_frame(&ctx, face_image(7)).await.unwrap() {
            FrameMatch::Matched(result) => assert_eq!(result.label, MatchLabel::Unknown),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_frames_use_fast_detector() {
        let loader = ScriptedLoader::new();
        let engine = start(loader.clone(), family_source());
        engine.load_models().await.unwrap();
        let report = engine.enroll(vec!["Akmal".into()]).await.unwrap();
        engine.recognize(&ready_context(&report), face_image(1)).await;

        assert_eq!(
            loader.options_seen(),
            vec![DetectorOptions::ACCURATE, DetectorOptions::FAST]
        );
    }

    #[tokio::test]
    async fn test_status_tracks_lifecycle() {
        let source = family_source().with("Opa", blank_image());
        let engine = start(ScriptedLoader::new(), source);
        assert_eq!(engine.status().await.unwrap(), EngineStatus::default());

        engine.load_models().await.unwrap();
        let report = engine.enroll(family_labels()).await.unwrap();
        assert_eq!(report.skipped().collect::<Vec<_>>(), vec!["Opa"]);

        let status = engine.status().await.unwrap();
        assert!(status.models_loaded);
        assert!(status.gallery_built);
        assert_eq!(status.enrolled_labels, 2);
    }

    #[tokio::test]
    async fn test_explicit_context_is_independent_of_engine() {
        // The same engine answers differently for different contexts
        let engine = start(ScriptedLoader::new(), family_source());
        engine.load_models().await.unwrap();

        let mut only_opa = Gallery::new();
        only_opa.insert("Opa", face_embedding(2));
        let ctx = RecognitionContext::new(only_opa, DEFAULT_DISTANCE_THRESHOLD);

        assert_eq!(engine.recognize(&ctx, face_image(2)).await.as_deref(), Some("Opa"));
        assert_eq!(engine.recognize(&ctx, face_image(1)).await, None);
    }
}
