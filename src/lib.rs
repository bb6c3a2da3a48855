//! framegate
//!
//! A small kernel that sits between a live video source and an expensive
//! synchronous image classifier. Frames arrive at camera rate; the
//! classifier is slower. Rather than queue (and let latency grow without
//! bound), framegate admits at most one frame at a time and drops the rest.
//!
//! # Architecture
//!
//! - `admission`: the three-state admission machine (IDLE / PRE_PROCESS /
//!   PROCESS) that serializes everything via atomic compare-and-set
//! - `geometry`: per-(resolution, rotation) cache of scratch buffers and the
//!   affine crop transform onto the fixed square classifier input
//! - `convert`: planar YUV 4:2:0 -> ARGB -> cropped RGB resampling
//! - `dispatch`: the dedicated serial inference worker thread
//! - `classify`: the classifier seam, result types, and backends
//! - `pipeline`: glue — the `on_frame` entry point a source pushes into
//! - `source`: deterministic synthetic frame source for demos and tests
//! - `config`: daemon configuration (JSON file + environment overrides)
//!
//! A dropped frame produces a debug log line and a counter bump, nothing
//! else; there is no notification, retry, or queueing by design.

pub mod admission;
pub mod classify;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod geometry;
pub mod pipeline;
pub mod source;

pub use admission::{AdmissionController, AdmissionStats, PipelineState};
#[cfg(feature = "backend-tract")]
pub use classify::TractClassifier;
pub use classify::{Classifier, Recognition, ResultSink, StubClassifier};
pub use config::FramegateConfig;
pub use convert::YuvFrameView;
pub use dispatch::ClassificationDispatcher;
pub use geometry::{Affine, FrameKey, GeometryCache, Rotation, INPUT_SIZE};
pub use pipeline::{FramePipeline, PipelineStats};
pub use source::{SourceStats, SyntheticYuvSource, YuvFrame};
