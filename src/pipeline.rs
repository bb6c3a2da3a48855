//! The frame admission -> conversion -> classification pipeline.
//!
//! `FramePipeline` is the single entry point a video source pushes frames
//! into. Per frame:
//!
//! 1. Try to claim the pipeline (IDLE -> PRE_PROCESS). Losing the claim
//!    drops the frame immediately — the classifier is slower than the
//!    camera by assumption, and a stale skipped frame beats unbounded
//!    latency growth.
//! 2. Convert inline on the delivering context: YUV planes -> ARGB -> the
//!    shared square crop, through the memoized geometry entry.
//! 3. Hand a task to the inference worker, which moves PRE_PROCESS ->
//!    PROCESS, runs the classifier, delivers the serialized result to the
//!    sink, and releases PROCESS -> IDLE whether the classifier succeeded
//!    or not.
//!
//! The admission state machine is the only synchronization between the
//! delivery and inference contexts; the mutexes below exist to satisfy
//! `Sync` for arbitrary caller threads and are uncontended by construction.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::admission::{AdmissionController, PipelineState};
use crate::classify::{to_result_json, Classifier, Recognition, ResultSink};
use crate::convert::{convert_frame, YuvFrameView};
use crate::dispatch::ClassificationDispatcher;
use crate::geometry::{FrameKey, GeometryCache, INPUT_SIZE};

/// Counters snapshot for health logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_seen: u64,
    pub frames_admitted: u64,
    pub frames_dropped: u64,
    pub classifications: u64,
    pub classifier_failures: u64,
}

struct PipelineShared {
    admission: AdmissionController,
    /// The one classifier input, overwritten in place by each admitted frame.
    cropped: Mutex<RgbImage>,
    classifier: Mutex<Box<dyn Classifier>>,
    sink: Box<dyn ResultSink>,
    classifications: AtomicU64,
    classifier_failures: AtomicU64,
}

pub struct FramePipeline {
    shared: Arc<PipelineShared>,
    dispatcher: ClassificationDispatcher,
    cache: GeometryCache,
}

impl FramePipeline {
    pub fn new(mut classifier: Box<dyn Classifier>, sink: Box<dyn ResultSink>) -> Result<Self> {
        classifier.warm_up().context("classifier warm-up failed")?;
        log::info!("classifier '{}' ready", classifier.name());

        Ok(Self {
            shared: Arc::new(PipelineShared {
                admission: AdmissionController::new(),
                cropped: Mutex::new(RgbImage::new(INPUT_SIZE, INPUT_SIZE)),
                classifier: Mutex::new(classifier),
                sink,
                classifications: AtomicU64::new(0),
                classifier_failures: AtomicU64::new(0),
            }),
            dispatcher: ClassificationDispatcher::new()?,
            cache: GeometryCache::new(),
        })
    }

    /// Frame delivery entry point. Returns `Ok(true)` when the frame was
    /// admitted and handed to the inference worker, `Ok(false)` when it was
    /// dropped because the pipeline is busy, and `Err` for a malformed frame
    /// (which is dropped with the pipeline released back to idle).
    pub fn on_frame(&self, frame: &YuvFrameView<'_>) -> Result<bool> {
        if !self.shared.admission.try_admit() {
            return Ok(false);
        }

        if let Err(e) = self.convert_admitted(frame) {
            self.release_claim(PipelineState::PreProcess);
            return Err(e.context("frame dropped"));
        }

        let shared = Arc::clone(&self.shared);
        if let Err(e) = self.dispatcher.submit(move || shared.run_classification()) {
            self.release_claim(PipelineState::PreProcess);
            return Err(e.context("frame dropped"));
        }
        Ok(true)
    }

    fn convert_admitted(&self, frame: &YuvFrameView<'_>) -> Result<()> {
        let key = FrameKey::new(frame.width, frame.height, frame.rotation_degrees)?;
        self.cache.with_entry(key, |entry| {
            let mut cropped = self
                .shared
                .cropped
                .lock()
                .map_err(|_| anyhow!("cropped image lock poisoned"))?;
            convert_frame(frame, entry, &mut cropped)
        })
    }

    fn release_claim(&self, from: PipelineState) {
        if !self.shared.admission.transition(from, PipelineState::Idle) {
            log::error!(
                "state anomaly: failed to release {:?} after error (state is {:?})",
                from,
                self.shared.admission.current()
            );
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.admission.current()
    }

    pub fn stats(&self) -> PipelineStats {
        let admission = self.shared.admission.stats();
        PipelineStats {
            frames_seen: admission.frames_seen,
            frames_admitted: admission.frames_admitted,
            frames_dropped: admission.frames_dropped,
            classifications: self.shared.classifications.load(Ordering::Relaxed),
            classifier_failures: self.shared.classifier_failures.load(Ordering::Relaxed),
        }
    }

    /// Number of distinct geometries observed so far.
    pub fn cached_geometries(&self) -> usize {
        self.cache.len()
    }
}

impl PipelineShared {
    /// Task body executed on the inference worker.
    fn run_classification(&self) {
        if !self
            .admission
            .transition(PipelineState::PreProcess, PipelineState::Process)
        {
            // Defensive check, not an expected path: the state was altered
            // externally. Abort without resetting so the inconsistency stays
            // visible instead of being masked.
            log::error!(
                "state anomaly: expected PRE_PROCESS before classification, found {:?}; aborting",
                self.admission.current()
            );
            return;
        }

        let started = Instant::now();
        let outcome = self.classify_cropped();
        let elapsed_ms = started.elapsed().as_millis();

        match outcome {
            Ok(results) => {
                self.classifications.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "classified frame: top={} n={} time={}ms",
                    results
                        .first()
                        .map(|r| r.title.as_str())
                        .unwrap_or("<none>"),
                    results.len(),
                    elapsed_ms
                );
                match to_result_json(&results) {
                    Ok(json) => self.sink.on_result(&json),
                    Err(e) => log::warn!("result serialization failed: {}", e),
                }
            }
            Err(e) => {
                // No sink delivery on failure; the state release below still
                // happens so the pipeline cannot wedge.
                self.classifier_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("classifier failed after {}ms: {}", elapsed_ms, e);
            }
        }

        if !self
            .admission
            .transition(PipelineState::Process, PipelineState::Idle)
        {
            log::error!(
                "state anomaly: failed to release pipeline after classification, state is {:?}",
                self.admission.current()
            );
        }
    }

    fn classify_cropped(&self) -> Result<Vec<Recognition>> {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            let cropped = self
                .cropped
                .lock()
                .map_err(|_| anyhow!("cropped image lock poisoned"))?;
            let mut classifier = self
                .classifier
                .lock()
                .map_err(|_| anyhow!("classifier lock poisoned"))?;
            classifier.classify(&cropped)
        }));
        match attempt {
            Ok(result) => result,
            Err(_) => Err(anyhow!("classifier panicked")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A sink that ignores everything; richer pipeline behavior is covered by
    // the integration tests in tests/pipeline_flow.rs.
    fn null_sink() -> Box<dyn ResultSink> {
        Box::new(|_: &str| {})
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn classify(&mut self, _image: &RgbImage) -> Result<Vec<Recognition>> {
            Err(anyhow!("synthetic failure"))
        }
    }

    fn gray_frame() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (vec![128u8; 64], vec![128u8; 16], vec![128u8; 16])
    }

    fn gray_view(planes: &(Vec<u8>, Vec<u8>, Vec<u8>)) -> YuvFrameView<'_> {
        YuvFrameView {
            y: &planes.0,
            u: &planes.1,
            v: &planes.2,
            width: 8,
            height: 8,
            stride_y: 8,
            stride_u: 4,
            stride_v: 4,
            rotation_degrees: 0,
        }
    }

    #[test]
    fn malformed_frame_releases_admission() {
        let pipeline =
            FramePipeline::new(Box::new(crate::classify::StubClassifier::new()), null_sink())
                .unwrap();

        let planes = gray_frame();
        let mut bad = gray_view(&planes);
        bad.rotation_degrees = 45;

        assert!(pipeline.on_frame(&bad).is_err());
        assert_eq!(pipeline.state(), PipelineState::Idle);

        // The pipeline is still usable afterwards.
        let good = gray_view(&planes);
        assert!(pipeline.on_frame(&good).unwrap());
    }

    #[test]
    fn failed_classification_still_releases() {
        let pipeline = FramePipeline::new(Box::new(FailingClassifier), null_sink()).unwrap();
        let planes = gray_frame();
        assert!(pipeline.on_frame(&gray_view(&planes)).unwrap());

        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        while Instant::now() < deadline && pipeline.stats().classifier_failures == 0 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(pipeline.stats().classifier_failures, 1);

        // Admission recovers once the worker releases the state.
        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        let mut readmitted = false;
        while Instant::now() < deadline {
            if pipeline.on_frame(&gray_view(&planes)).unwrap() {
                readmitted = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(readmitted);
    }
}
