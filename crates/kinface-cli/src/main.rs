use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kinface_core::{EnrollmentReport, FaceImage, LabelOutcome};
use kinface_engine::config::parse_labels;
use kinface_engine::{spawn_engine, Config, EngineHandle, FrameMatch, RecognitionContext};
use kinface_hw::{Camera, CameraError, Frame};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kinface", about = "Family face enrollment and recognition")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags applied on top of the config file and environment.
#[derive(Args)]
struct Overrides {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding det_10g.onnx, 2d106det.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    models: Option<PathBuf>,
    /// Directory holding one reference photo per label
    #[arg(long, global = true)]
    faces: Option<PathBuf>,
    /// Euclidean distance below which a face is accepted
    #[arg(long, global = true)]
    threshold: Option<f32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the gallery from the reference photos and report each label
    Enroll {
        /// Comma-separated labels (e.g. "Akmal,Opa,Ukam")
        #[arg(short, long)]
        labels: Option<String>,
        /// Print the per-label outcomes as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll, then recognize the face in each image file
    Recognize {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Enroll, then recognize faces on a live camera feed
    Watch {
        /// V4L2 device path
        #[arg(short, long)]
        device: Option<String>,
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<usize>,
    },
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll { labels, json } => {
            let mut config = load_config(&cli.overrides)?;
            if let Some(raw) = labels {
                config.labels = parse_labels(&raw);
            }
            let engine = start_engine(&config).await?;
            let report = engine.enroll(config.labels.clone()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.outcomes)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Recognize { images } => {
            let config = load_config(&cli.overrides)?;
            let (engine, ctx) = enroll_context(&config).await?;
            for path in images {
                let decoded = image::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let frame = FaceImage::from_dynamic(&decoded);
                match engine.match_frame(&ctx, frame).await? {
                    FrameMatch::Matched(result) => println!(
                        "{}: {} (distance {:.3})",
                        path.display(),
                        result.label,
                        result.distance
                    ),
                    FrameMatch::NoFace => println!("{}: no face", path.display()),
                    FrameMatch::NotReady => println!("{}: no gallery", path.display()),
                }
            }
        }
        Commands::Watch { device, frames } => {
            let mut config = load_config(&cli.overrides)?;
            if let Some(device) = device {
                config.camera_device = device;
            }
            let (engine, ctx) = enroll_context(&config).await?;
            watch(&engine, &ctx, &config.camera_device, frames).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({})", dev.path, dev.name, dev.driver);
            }
        }
    }

    Ok(())
}

fn load_config(overrides: &Overrides) -> Result<Config> {
    let mut config = Config::load(overrides.config.as_deref())?;
    if let Some(dir) = &overrides.models {
        config.model_dir = dir.clone();
    }
    if let Some(dir) = &overrides.faces {
        config.faces_dir = dir.clone();
    }
    if let Some(threshold) = overrides.threshold {
        config.distance_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

async fn start_engine(config: &Config) -> Result<EngineHandle> {
    let models = config.model_set();
    let engine = spawn_engine(
        models.clone(),
        config.image_source(),
        config.engine_options(),
    )?;
    if let Err(e) = engine.load_models().await {
        let missing: Vec<String> = models
            .missing()
            .into_iter()
            .map(|(artifact, path)| format!("{artifact} ({})", path.display()))
            .collect();
        if !missing.is_empty() {
            return Err(e).with_context(|| format!("missing models: {}", missing.join(", ")));
        }
        return Err(e).with_context(|| {
            format!("failed to load models from {}", config.model_dir.display())
        });
    }
    Ok(engine)
}

async fn enroll_context(config: &Config) -> Result<(EngineHandle, RecognitionContext)> {
    let engine = start_engine(config).await?;
    let report = engine.enroll(config.labels.clone()).await?;
    for label in report.skipped() {
        tracing::warn!(label, "no face in reference photo, label not enrolled");
    }
    let ctx = RecognitionContext::from_report(&report, config.distance_threshold);
    if !ctx.is_ready() {
        tracing::warn!("gallery is empty, every face will be unrecognized");
    }
    Ok((engine, ctx))
}

fn print_report(report: &EnrollmentReport) {
    for entry in &report.outcomes {
        match &entry.outcome {
            LabelOutcome::Enrolled { confidence } => {
                println!("{:<12} enrolled (confidence {confidence:.2})", entry.label)
            }
            LabelOutcome::Skipped { .. } => println!("{:<12} skipped: no face", entry.label),
        }
    }
    println!(
        "{} of {} labels enrolled",
        report.gallery.len(),
        report.outcomes.len()
    );
}

/// Capture on a dedicated thread and feed lit frames to the engine.
async fn watch(
    engine: &EngineHandle,
    ctx: &RecognitionContext,
    device: &str,
    limit: Option<usize>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Result<Frame, CameraError>>(2);
    let device = device.to_string();
    std::thread::Builder::new()
        .name("kinface-capture".into())
        .spawn(move || capture_loop(&device, tx))
        .context("failed to spawn capture thread")?;

    let mut seen = 0usize;
    let mut current: Option<String> = None;
    loop {
        let next = tokio::select! {
            frame = rx.recv() => frame,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(frame) = next else {
            break;
        };
        let frame = frame?;
        let image = FaceImage::new(frame.data, frame.width, frame.height)?;

        let label = engine.recognize(ctx, image).await;
        if label != current {
            match &label {
                Some(name) => tracing::info!(seq = frame.sequence, label = %name, "recognized"),
                None => tracing::info!(seq = frame.sequence, "no match"),
            }
            current = label;
        }

        seen += 1;
        if limit.is_some_and(|n| seen >= n) {
            break;
        }
    }
    Ok(())
}

fn capture_loop(device: &str, tx: mpsc::Sender<Result<Frame, CameraError>>) {
    let camera = match Camera::open(device) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };
    let mut stream = match camera.stream() {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };
    loop {
        let frame = match stream.next_frame() {
            Ok(frame) if frame.is_dark => continue,
            other => other,
        };
        let failed = frame.is_err();
        if tx.blocking_send(frame).is_err() || failed {
            return;
        }
    }
}
