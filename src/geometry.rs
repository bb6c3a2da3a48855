//! Per-geometry resources for the crop pipeline.
//!
//! Every distinct (width, height, rotation) a camera delivers needs the same
//! three things on every frame: an ARGB scratch buffer, a reusable source
//! bitmap, and the affine transform that maps the raw frame onto the fixed
//! square classifier input. `GeometryCache` computes them once per key and
//! hands the same entry back for every later frame of that geometry.
//!
//! Cache entries are never evicted. In practice a device exposes one or two
//! resolution/rotation pairs over its lifetime, so the map stays tiny.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Edge length of the square image handed to the classifier.
pub const INPUT_SIZE: u32 = 224;

/// Frame rotation, restricted to the four right angles cameras report.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(anyhow!(
                "unsupported rotation {} (expected 0, 90, 180 or 270)",
                other
            )),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// True when the rotation swaps the horizontal and vertical extents.
    pub fn transposed(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    // Exact (cos, sin) pairs keep transform coefficients reproducible
    // bit-for-bit across calls.
    fn unit_vectors(self) -> (f32, f32) {
        match self {
            Rotation::Deg0 => (1.0, 0.0),
            Rotation::Deg90 => (0.0, 1.0),
            Rotation::Deg180 => (-1.0, 0.0),
            Rotation::Deg270 => (0.0, -1.0),
        }
    }
}

/// Value-typed cache key identifying one frame geometry.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct FrameKey {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

impl FrameKey {
    pub fn new(width: u32, height: u32, rotation_degrees: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        Ok(Self {
            width,
            height,
            rotation: Rotation::from_degrees(rotation_degrees)?,
        })
    }
}

/// 2x3 affine transform, row-major: maps (x, y) to
/// (m[0]*x + m[1]*y + m[2], m[3]*x + m[4]*y + m[5]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    m: [f32; 6],
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self {
            m: [1.0, 0.0, tx, 0.0, 1.0, ty],
        }
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self {
            m: [sx, 0.0, 0.0, 0.0, sy, 0.0],
        }
    }

    pub fn rotation(rotation: Rotation) -> Self {
        let (cos, sin) = rotation.unit_vectors();
        Self {
            m: [cos, -sin, 0.0, sin, cos, 0.0],
        }
    }

    /// Compose: apply `self` first, then `after`.
    pub fn then(&self, after: &Affine) -> Affine {
        let a = &after.m;
        let b = &self.m;
        Affine {
            m: [
                a[0] * b[0] + a[1] * b[3],
                a[0] * b[1] + a[1] * b[4],
                a[0] * b[2] + a[1] * b[5] + a[2],
                a[3] * b[0] + a[4] * b[3],
                a[3] * b[1] + a[4] * b[4],
                a[3] * b[2] + a[4] * b[5] + a[5],
            ],
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.m[0] * x + self.m[1] * y + self.m[2],
            self.m[3] * x + self.m[4] * y + self.m[5],
        )
    }

    pub fn inverse(&self) -> Result<Affine> {
        let [a, b, c, d, e, f] = self.m;
        let det = a * e - b * d;
        if det.abs() < f32::EPSILON {
            return Err(anyhow!("affine transform is not invertible"));
        }
        Ok(Affine {
            m: [
                e / det,
                -b / det,
                (b * f - e * c) / det,
                -d / det,
                a / det,
                (d * c - a * f) / det,
            ],
        })
    }

    pub fn coefficients(&self) -> [f32; 6] {
        self.m
    }
}

/// Transform mapping a `width`x`height` source frame onto the square
/// `INPUT_SIZE` crop: rotate about the source center, cover-scale so the
/// rotated extents fully span the target, then center on the target.
/// Aspect ratio is maintained; overflow is clipped, nothing is padded.
fn crop_transform(width: u32, height: u32, rotation: Rotation) -> Affine {
    let w = width as f32;
    let h = height as f32;
    let s = INPUT_SIZE as f32;
    let (rotated_w, rotated_h) = if rotation.transposed() { (h, w) } else { (w, h) };
    let scale = (s / rotated_w).max(s / rotated_h);

    Affine::translation(-w / 2.0, -h / 2.0)
        .then(&Affine::rotation(rotation))
        .then(&Affine::scaling(scale, scale))
        .then(&Affine::translation(s / 2.0, s / 2.0))
}

/// Reusable per-geometry resources.
///
/// The scratch buffer and source bitmap are overwritten by every frame of
/// this geometry; the transforms never change after construction.
pub struct GeometryEntry {
    pub key: FrameKey,
    /// Interleaved ARGB8888 words, one per source pixel.
    pub argb_scratch: Vec<u32>,
    /// RGB copy of the full frame, input to the crop resample.
    pub source_bitmap: RgbImage,
    /// Source frame coordinates -> crop coordinates.
    pub crop_transform: Affine,
    /// Crop coordinates -> source frame coordinates, for inverse sampling.
    pub crop_inverse: Affine,
}

impl GeometryEntry {
    fn new(key: FrameKey) -> Result<Self> {
        let pixels = (key.width as usize)
            .checked_mul(key.height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let crop_transform = crop_transform(key.width, key.height, key.rotation);
        let crop_inverse = crop_transform.inverse()?;
        Ok(Self {
            key,
            argb_scratch: vec![0u32; pixels],
            source_bitmap: RgbImage::new(key.width, key.height),
            crop_transform,
            crop_inverse,
        })
    }
}

/// Lazily populated map of geometry entries.
///
/// Lookups after first population are idempotent: the same key always yields
/// the same buffers and the same transform coefficients. Admission already
/// serializes callers, but insertion is additionally guarded by the map's own
/// lock so two first-seen resolutions can never race on population.
pub struct GeometryCache {
    entries: Mutex<HashMap<FrameKey, GeometryEntry>>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` against the entry for `key`, creating the entry on first use.
    pub fn with_entry<T>(
        &self,
        key: FrameKey,
        f: impl FnOnce(&mut GeometryEntry) -> Result<T>,
    ) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("geometry cache lock poisoned"))?;
        let entry = match entries.entry(key) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                log::debug!(
                    "geometry cache: new entry {}x{} rot={}",
                    key.width,
                    key.height,
                    key.rotation.degrees()
                );
                slot.insert(GeometryEntry::new(key)?)
            }
        };
        f(entry)
    }

    /// Crop transform for `key`, if the entry exists.
    pub fn transform(&self, key: FrameKey) -> Option<Affine> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&key).map(|entry| entry.crop_transform))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GeometryCache {
    fn default() -> Self {
        Self::new()
    }
}
