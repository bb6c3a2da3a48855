//! framegated - drop-on-busy frame classification daemon
//!
//! This daemon:
//! 1. Builds a classifier backend from configuration (stub by default)
//! 2. Feeds frames from the synthetic source into the pipeline at the
//!    configured rate
//! 3. Logs each classification result as it is delivered to the sink
//! 4. Logs pipeline health (admitted/dropped/classified) on an interval
//!
//! Dropped frames are normal operation here, not errors: whenever the
//! classifier is still busy when the next frame lands, that frame is gone.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use framegate::{
    Classifier, FramePipeline, FramegateConfig, ResultSink, StubClassifier, SyntheticYuvSource,
};

#[derive(Parser, Debug)]
#[command(name = "framegated", about = "drop-on-busy frame classification daemon")]
struct Args {
    /// Path to a JSON config file (equivalent to setting FRAMEGATE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after delivering this many frames (default: run until ctrl-c).
    #[arg(long, env = "FRAMEGATE_FRAMES")]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize logging (simple stderr)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("FRAMEGATE_CONFIG", path);
    }
    let cfg = FramegateConfig::load()?;

    let classifier = build_classifier(&cfg)?;
    let sink: Box<dyn ResultSink> = Box::new(|json: &str| log::info!("result: {}", json));
    let pipeline = FramePipeline::new(classifier, sink)?;

    let mut source = SyntheticYuvSource::new(
        cfg.source.width,
        cfg.source.height,
        cfg.source.rotation_degrees,
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("failed to install ctrl-c handler")?;
    }

    let frame_interval = Duration::from_millis(1000 / cfg.source.target_fps as u64);
    let mut last_health_log = Instant::now();
    let mut delivered = 0u64;

    log::info!(
        "framegated running: {}x{} rot={} at {} fps, backend={}",
        cfg.source.width,
        cfg.source.height,
        cfg.source.rotation_degrees,
        cfg.source.target_fps,
        cfg.classifier.backend
    );

    while running.load(Ordering::SeqCst) {
        if let Some(max) = args.frames {
            if delivered >= max {
                break;
            }
        }

        let frame = source.next_frame();
        delivered += 1;
        if let Err(e) = pipeline.on_frame(&frame.view()) {
            log::warn!("frame rejected: {:#}", e);
        }

        if last_health_log.elapsed() >= Duration::from_secs(cfg.health_log_secs) {
            log_health(&pipeline, &source);
            last_health_log = Instant::now();
        }

        std::thread::sleep(frame_interval);
    }

    log_health(&pipeline, &source);
    log::info!("framegated stopping");
    // Dropping the pipeline joins the inference worker.
    Ok(())
}

fn log_health(pipeline: &FramePipeline, source: &SyntheticYuvSource) {
    let stats = pipeline.stats();
    let src = source.stats();
    log::info!(
        "pipeline health: state={:?} seen={} admitted={} dropped={} classified={} failures={} geometries={} source_frames={}",
        pipeline.state(),
        stats.frames_seen,
        stats.frames_admitted,
        stats.frames_dropped,
        stats.classifications,
        stats.classifier_failures,
        pipeline.cached_geometries(),
        src.frames_generated
    );
}

fn build_classifier(cfg: &FramegateConfig) -> Result<Box<dyn Classifier>> {
    match cfg.classifier.backend.as_str() {
        "stub" => Ok(Box::new(StubClassifier::new())),
        "tract" => build_tract_classifier(cfg),
        other => Err(anyhow!("unknown classifier backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract_classifier(cfg: &FramegateConfig) -> Result<Box<dyn Classifier>> {
    let model_path = cfg
        .classifier
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires classifier.model_path"))?;
    let labels_path = cfg
        .classifier
        .labels_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires classifier.labels_path"))?;
    let classifier =
        framegate::TractClassifier::new(model_path, labels_path, framegate::INPUT_SIZE)?
            .with_top_k(cfg.classifier.top_k);
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_classifier(_cfg: &FramegateConfig) -> Result<Box<dyn Classifier>> {
    Err(anyhow!(
        "tract backend requested but framegate was built without the backend-tract feature"
    ))
}
