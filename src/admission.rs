//! Admission control for the single-slot classification pipeline.
//!
//! One process-wide state variable decides the fate of every incoming frame:
//!
//! ```text
//! IDLE --(frame arrives)--> PRE_PROCESS --(worker picks up)--> PROCESS --> IDLE
//! ```
//!
//! A frame that fails the IDLE -> PRE_PROCESS claim is dropped on the spot —
//! no queue, no retry. The two-phase busy split keeps the cheap inline
//! conversion and the expensive background classification independently
//! observable. All transitions are lock-free compare-and-set; a failed CAS on
//! the two background transitions is an anomaly that is logged and left
//! alone rather than forced.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Pipeline occupancy state. Lives for the process lifetime.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle = 0,
    PreProcess = 1,
    Process = 2,
}

impl PipelineState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => PipelineState::Idle,
            1 => PipelineState::PreProcess,
            _ => PipelineState::Process,
        }
    }
}

/// Snapshot of the admission counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    pub frames_seen: u64,
    pub frames_admitted: u64,
    pub frames_dropped: u64,
}

/// The concurrency core: decides per frame whether the pipeline is claimed
/// or the frame is dropped.
pub struct AdmissionController {
    state: AtomicU8,
    frames_seen: AtomicU64,
    frames_admitted: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Idle as u8),
            frames_seen: AtomicU64::new(0),
            frames_admitted: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> PipelineState {
        PipelineState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Atomically move `from` -> `to`. Returns false (and changes nothing)
    /// when the current state is not `from`.
    pub fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Admission attempt for one incoming frame. On success the caller owns
    /// the pipeline through conversion and hand-off; on failure the frame is
    /// dropped and only the counters remember it.
    pub fn try_admit(&self) -> bool {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
        if self.transition(PipelineState::Idle, PipelineState::PreProcess) {
            self.frames_admitted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("frame dropped: pipeline {:?}", self.current());
            false
        }
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_admitted: self.frames_admitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}
