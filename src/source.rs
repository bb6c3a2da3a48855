//! Synthetic frame source for demos and tests.
//!
//! The real video source is an external collaborator that pushes frames into
//! `FramePipeline::on_frame`. This module provides a deterministic stand-in:
//! an owned planar YUV 4:2:0 frame type plus a generator that produces a
//! slowly evolving gradient scene, so the daemon and the tests run without
//! any capture hardware.

use crate::convert::YuvFrameView;

/// Owned planar YUV 4:2:0 frame.
pub struct YuvFrame {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    width: u32,
    height: u32,
    stride_y: usize,
    stride_u: usize,
    stride_v: usize,
    rotation_degrees: u32,
}

impl YuvFrame {
    /// Frame with every sample fixed: Y=`luma`, U=`cb`, V=`cr`.
    pub fn solid(width: u32, height: u32, luma: u8, cb: u8, cr: u8, rotation_degrees: u32) -> Self {
        let chroma_w = width.div_ceil(2) as usize;
        let chroma_h = height.div_ceil(2) as usize;
        Self {
            y: vec![luma; width as usize * height as usize],
            u: vec![cb; chroma_w * chroma_h],
            v: vec![cr; chroma_w * chroma_h],
            width,
            height,
            stride_y: width as usize,
            stride_u: chroma_w,
            stride_v: chroma_w,
            rotation_degrees,
        }
    }

    pub fn view(&self) -> YuvFrameView<'_> {
        YuvFrameView {
            y: &self.y,
            u: &self.u,
            v: &self.v,
            width: self.width,
            height: self.height,
            stride_y: self.stride_y,
            stride_u: self.stride_u,
            stride_v: self.stride_v,
            rotation_degrees: self.rotation_degrees,
        }
    }
}

/// Statistics for a synthetic source.
#[derive(Clone, Copy, Debug)]
pub struct SourceStats {
    pub frames_generated: u64,
    pub width: u32,
    pub height: u32,
}

/// Deterministic gradient-scene generator.
pub struct SyntheticYuvSource {
    width: u32,
    height: u32,
    rotation_degrees: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticYuvSource {
    pub fn new(width: u32, height: u32, rotation_degrees: u32) -> Self {
        log::info!(
            "synthetic source: {}x{} rot={} (no capture hardware)",
            width,
            height,
            rotation_degrees
        );
        Self {
            width,
            height,
            rotation_degrees,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn next_frame(&mut self) -> YuvFrame {
        self.frame_count += 1;
        // Shift the scene every 50 frames so consecutive frames differ.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let chroma_w = self.width.div_ceil(2) as usize;
        let chroma_h = self.height.div_ceil(2) as usize;
        let phase = self.frame_count + self.scene_state as u64;

        let mut y = vec![0u8; width * height];
        for row in 0..height {
            for col in 0..width {
                y[row * width + col] = ((row + col) as u64).wrapping_add(phase) as u8;
            }
        }
        let mut u = vec![0u8; chroma_w * chroma_h];
        let mut v = vec![0u8; chroma_w * chroma_h];
        for row in 0..chroma_h {
            for col in 0..chroma_w {
                let index = row * chroma_w + col;
                u[index] = 128u8.wrapping_add((col as u64 + phase / 4) as u8);
                v[index] = 128u8.wrapping_add((row as u64 + phase / 8) as u8);
            }
        }

        YuvFrame {
            y,
            u,
            v,
            width: self.width,
            height: self.height,
            stride_y: width,
            stride_u: chroma_w,
            stride_v: chroma_w,
            rotation_degrees: self.rotation_degrees,
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_generated: self.frame_count,
            width: self.width,
            height: self.height,
        }
    }
}
