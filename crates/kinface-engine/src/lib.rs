//! kinface-engine — async face enrollment and recognition service.
//!
//! Inference runs on a dedicated OS thread that owns the ONNX sessions.
//! Callers talk to it through a cloneable [`EngineHandle`] and pass an
//! explicit [`RecognitionContext`] with every recognition request.

pub mod config;
pub mod context;
pub mod engine;

pub use config::{Config, ConfigError};
pub use context::{Lifecycle, RecognitionContext};
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineOptions, EngineStatus, FrameMatch};
