use crate::engine::EngineOptions;
use kinface_core::source::DEFAULT_EXTENSION;
use kinface_core::{DetectorOptions, DirectoryImageSource, ModelSet, DEFAULT_DISTANCE_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_LABELS: [&str; 3] = ["Akmal", "Opa", "Ukam"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime configuration.
///
/// Layered as defaults, then an optional TOML file, then `KINFACE_*`
/// environment variables. Command-line flags are applied on top by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding the three ONNX models.
    pub model_dir: PathBuf,
    /// Directory holding one reference photo per label.
    pub faces_dir: PathBuf,
    pub image_extension: String,
    /// Identities to enroll, in order.
    pub labels: Vec<String>,
    /// Euclidean distance below which a face is accepted as a match.
    pub distance_threshold: f32,
    pub enroll_input_size: usize,
    pub live_input_size: usize,
    pub score_threshold: f32,
    /// V4L2 device for `watch`.
    pub camera_device: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            faces_dir: PathBuf::from("faces"),
            image_extension: DEFAULT_EXTENSION.to_string(),
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            enroll_input_size: DetectorOptions::ACCURATE.input_size,
            live_input_size: DetectorOptions::FAST.input_size,
            score_threshold: DetectorOptions::ACCURATE.score_threshold,
            camera_device: "/dev/video0".to_string(),
        }
    }
}

/// On-disk shape; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    faces_dir: Option<PathBuf>,
    image_extension: Option<String>,
    labels: Option<Vec<String>>,
    distance_threshold: Option<f32>,
    enroll_input_size: Option<usize>,
    live_input_size: Option<usize>,
    score_threshold: Option<f32>,
    camera_device: Option<String>,
}

impl Config {
    /// Load defaults, the optional TOML file at `path`, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        }
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let FileConfig {
            model_dir,
            faces_dir,
            image_extension,
            labels,
            distance_threshold,
            enroll_input_size,
            live_input_size,
            score_threshold,
            camera_device,
        } = toml::from_str(text)?;

        if let Some(v) = model_dir {
            self.model_dir = v;
        }
        if let Some(v) = faces_dir {
            self.faces_dir = v;
        }
        if let Some(v) = image_extension {
            self.image_extension = v;
        }
        if let Some(v) = labels {
            self.labels = v;
        }
        if let Some(v) = distance_threshold {
            self.distance_threshold = v;
        }
        if let Some(v) = enroll_input_size {
            self.enroll_input_size = v;
        }
        if let Some(v) = live_input_size {
            self.live_input_size = v;
        }
        if let Some(v) = score_threshold {
            self.score_threshold = v;
        }
        if let Some(v) = camera_device {
            self.camera_device = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("KINFACE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KINFACE_FACES_DIR") {
            self.faces_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KINFACE_IMAGE_EXTENSION") {
            self.image_extension = v;
        }
        if let Some(v) = get("KINFACE_LABELS") {
            self.labels = parse_labels(&v);
        }
        if let Some(v) = get("KINFACE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(&get, "KINFACE_DISTANCE_THRESHOLD", &mut self.distance_threshold);
        env_parse(&get, "KINFACE_ENROLL_INPUT_SIZE", &mut self.enroll_input_size);
        env_parse(&get, "KINFACE_LIVE_INPUT_SIZE", &mut self.live_input_size);
        env_parse(&get, "KINFACE_SCORE_THRESHOLD", &mut self.score_threshold);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let options = self.engine_options();
        for (key, detector) in [
            ("enroll_input_size", options.enroll_detector),
            ("live_input_size", options.live_detector),
        ] {
            detector.validate().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })?;
        }
        if !(self.distance_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "distance_threshold",
                reason: format!("must be positive, got {}", self.distance_threshold),
            });
        }
        if !(0.0..1.0).contains(&self.score_threshold) {
            return Err(ConfigError::Invalid {
                key: "score_threshold",
                reason: format!("must be in [0, 1), got {}", self.score_threshold),
            });
        }
        Ok(())
    }

    pub fn model_set(&self) -> ModelSet {
        ModelSet::in_dir(&self.model_dir)
    }

    pub fn image_source(&self) -> DirectoryImageSource {
        DirectoryImageSource::new(&self.faces_dir).with_extension(&self.image_extension)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            enroll_detector: DetectorOptions {
                input_size: self.enroll_input_size,
                score_threshold: self.score_threshold,
            },
            live_detector: DetectorOptions {
                input_size: self.live_input_size,
                score_threshold: self.score_threshold,
            },
        }
    }
}

/// Comma-separated labels; blanks are dropped.
pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = get(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable setting"),
    }
}
