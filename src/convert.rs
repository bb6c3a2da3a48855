//! Pixel-format conversion and crop resampling.
//!
//! Turns one planar YUV 4:2:0 frame into the fixed-size RGB crop the
//! classifier consumes:
//!
//! 1. Expand the Y/U/V planes into interleaved ARGB words (BT.601 integer
//!    coefficients) in the entry's scratch buffer.
//! 2. Load the words into the entry's RGB source bitmap.
//! 3. Resample the bitmap through the entry's crop transform into the shared
//!    square crop (nearest-neighbor, inverse-mapped at pixel centers).
//!
//! Plane lengths and strides are validated before any pixel work; a frame
//! whose planes do not cover its declared geometry is rejected as malformed.
//! All three steps mutate buffers in place, so the caller must hold the
//! pipeline's admission claim before converting.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::geometry::{Affine, GeometryEntry};

/// Borrowed view of one planar YUV 4:2:0 frame.
///
/// Chroma planes are subsampled at half resolution in both dimensions; each
/// plane carries its own row stride.
#[derive(Clone, Copy, Debug)]
pub struct YuvFrameView<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride_y: usize,
    pub stride_u: usize,
    pub stride_v: usize,
    pub rotation_degrees: u32,
}

impl YuvFrameView<'_> {
    /// Check plane lengths and strides against the declared geometry.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("malformed frame: zero dimension"));
        }
        let width = self.width as usize;
        let height = self.height as usize;
        let chroma_w = width.div_ceil(2);
        let chroma_h = height.div_ceil(2);

        if self.stride_y < width {
            return Err(anyhow!(
                "malformed frame: Y stride {} < width {}",
                self.stride_y,
                width
            ));
        }
        if self.stride_u < chroma_w || self.stride_v < chroma_w {
            return Err(anyhow!(
                "malformed frame: chroma stride below {} samples per row",
                chroma_w
            ));
        }

        let need_y = (height - 1) * self.stride_y + width;
        if self.y.len() < need_y {
            return Err(anyhow!(
                "malformed frame: Y plane holds {} bytes, needs {}",
                self.y.len(),
                need_y
            ));
        }
        let need_u = (chroma_h - 1) * self.stride_u + chroma_w;
        if self.u.len() < need_u {
            return Err(anyhow!(
                "malformed frame: U plane holds {} bytes, needs {}",
                self.u.len(),
                need_u
            ));
        }
        let need_v = (chroma_h - 1) * self.stride_v + chroma_w;
        if self.v.len() < need_v {
            return Err(anyhow!(
                "malformed frame: V plane holds {} bytes, needs {}",
                self.v.len(),
                need_v
            ));
        }
        Ok(())
    }
}

/// Convert `frame` through `entry` into `cropped`.
///
/// `cropped` is the single shared classifier input; it is overwritten whole.
pub fn convert_frame(
    frame: &YuvFrameView<'_>,
    entry: &mut GeometryEntry,
    cropped: &mut RgbImage,
) -> Result<()> {
    frame.validate()?;
    if frame.width != entry.key.width || frame.height != entry.key.height {
        return Err(anyhow!(
            "geometry entry is {}x{} but frame is {}x{}",
            entry.key.width,
            entry.key.height,
            frame.width,
            frame.height
        ));
    }

    yuv420_to_argb(frame, &mut entry.argb_scratch);
    load_argb(&entry.argb_scratch, &mut entry.source_bitmap);
    resample_crop(&entry.source_bitmap, &entry.crop_inverse, cropped);
    Ok(())
}

// 18-bit fixed-point channel ceiling used by the integer conversion.
const MAX_CHANNEL_VALUE: i32 = 262143;

fn yuv_to_argb_word(y: u8, u: u8, v: u8) -> u32 {
    let luma = (y as i32 - 16).max(0) * 1192;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = (luma + 1634 * v).clamp(0, MAX_CHANNEL_VALUE);
    let g = (luma - 833 * v - 400 * u).clamp(0, MAX_CHANNEL_VALUE);
    let b = (luma + 2066 * u).clamp(0, MAX_CHANNEL_VALUE);

    0xff00_0000u32
        | (((r as u32) << 6) & 0x00ff_0000)
        | (((g as u32) >> 2) & 0x0000_ff00)
        | (((b as u32) >> 10) & 0x0000_00ff)
}

fn yuv420_to_argb(frame: &YuvFrameView<'_>, out: &mut [u32]) {
    let width = frame.width as usize;
    let height = frame.height as usize;

    let mut out_index = 0;
    for row in 0..height {
        let y_row = row * frame.stride_y;
        let u_row = (row / 2) * frame.stride_u;
        let v_row = (row / 2) * frame.stride_v;
        for col in 0..width {
            let y = frame.y[y_row + col];
            let u = frame.u[u_row + col / 2];
            let v = frame.v[v_row + col / 2];
            out[out_index] = yuv_to_argb_word(y, u, v);
            out_index += 1;
        }
    }
}

fn load_argb(argb: &[u32], bitmap: &mut RgbImage) {
    for (pixel, word) in bitmap.pixels_mut().zip(argb.iter()) {
        *pixel = Rgb([
            ((word >> 16) & 0xff) as u8,
            ((word >> 8) & 0xff) as u8,
            (word & 0xff) as u8,
        ]);
    }
}

/// Inverse-map every crop pixel center into the source bitmap and take the
/// nearest source pixel. Targets outside the source (possible only for
/// degenerate geometries) stay black.
fn resample_crop(source: &RgbImage, crop_inverse: &Affine, cropped: &mut RgbImage) {
    let src_w = source.width() as i64;
    let src_h = source.height() as i64;
    for (x, y, pixel) in cropped.enumerate_pixels_mut() {
        let (sx, sy) = crop_inverse.apply(x as f32 + 0.5, y as f32 + 0.5);
        let sx = sx.floor() as i64;
        let sy = sy.floor() as i64;
        *pixel = if sx >= 0 && sx < src_w && sy >= 0 && sy < src_h {
            *source.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{FrameKey, GeometryCache, INPUT_SIZE};

    fn solid_planes(width: u32, height: u32, y: u8, u: u8, v: u8) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let luma = vec![y; (width * height) as usize];
        let chroma_len = (width.div_ceil(2) * height.div_ceil(2)) as usize;
        (luma, vec![u; chroma_len], vec![v; chroma_len])
    }

    fn view<'a>(
        planes: &'a (Vec<u8>, Vec<u8>, Vec<u8>),
        width: u32,
        height: u32,
        rotation: u32,
    ) -> YuvFrameView<'a> {
        YuvFrameView {
            y: &planes.0,
            u: &planes.1,
            v: &planes.2,
            width,
            height,
            stride_y: width as usize,
            stride_u: width.div_ceil(2) as usize,
            stride_v: width.div_ceil(2) as usize,
            rotation_degrees: rotation,
        }
    }

    fn convert(frame: &YuvFrameView<'_>) -> Result<RgbImage> {
        let cache = GeometryCache::new();
        let key = FrameKey::new(frame.width, frame.height, frame.rotation_degrees)?;
        let mut cropped = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
        cache.with_entry(key, |entry| convert_frame(frame, entry, &mut cropped))?;
        Ok(cropped)
    }

    #[test]
    fn mid_gray_yuv_converts_to_uniform_gray() {
        let planes = solid_planes(8, 8, 128, 128, 128);
        let cropped = convert(&view(&planes, 8, 8, 0)).unwrap();

        assert_eq!(cropped.width(), INPUT_SIZE);
        assert_eq!(cropped.height(), INPUT_SIZE);
        // BT.601 range expansion puts Y=128 at 130 on all three channels.
        let first = *cropped.get_pixel(0, 0);
        assert_eq!(first, Rgb([130, 130, 130]));
        assert!(cropped.pixels().all(|p| *p == first));
    }

    #[test]
    fn conversion_is_deterministic() {
        let width = 16u32;
        let height = 12u32;
        let luma: Vec<u8> = (0..width * height).map(|i| (i * 7 % 256) as u8).collect();
        let chroma_len = (width / 2 * height / 2) as usize;
        let u: Vec<u8> = (0..chroma_len).map(|i| (i * 3 % 256) as u8).collect();
        let v: Vec<u8> = (0..chroma_len).map(|i| (i * 5 % 256) as u8).collect();
        let planes = (luma, u, v);

        let a = convert(&view(&planes, width, height, 90)).unwrap();
        let b = convert(&view(&planes, width, height, 90)).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn row_padding_beyond_stride_is_ignored() {
        let width = 4u32;
        let height = 4u32;
        let stride_y = 8usize;
        // 100 in the addressed columns, garbage in the padding.
        let mut luma = vec![0xEEu8; (height as usize - 1) * stride_y + width as usize];
        for row in 0..height as usize {
            for col in 0..width as usize {
                luma[row * stride_y + col] = 100;
            }
        }
        let chroma = vec![128u8; 4];
        let frame = YuvFrameView {
            y: &luma,
            u: &chroma,
            v: &chroma,
            width,
            height,
            stride_y,
            stride_u: 2,
            stride_v: 2,
            rotation_degrees: 0,
        };

        let cache = GeometryCache::new();
        let key = FrameKey::new(width, height, 0).unwrap();
        let mut cropped = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
        cache
            .with_entry(key, |entry| convert_frame(&frame, entry, &mut cropped))
            .unwrap();

        let first = *cropped.get_pixel(0, 0);
        assert!(cropped.pixels().all(|p| *p == first));
    }

    #[test]
    fn short_luma_plane_is_malformed() {
        let planes = solid_planes(8, 8, 128, 128, 128);
        let mut frame = view(&planes, 8, 8, 0);
        frame.y = &planes.0[..planes.0.len() - 1];
        assert!(frame.validate().is_err());
    }

    #[test]
    fn undersized_chroma_stride_is_malformed() {
        let planes = solid_planes(8, 8, 128, 128, 128);
        let mut frame = view(&planes, 8, 8, 0);
        frame.stride_u = 3;
        assert!(frame.validate().is_err());
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let planes = solid_planes(8, 8, 128, 128, 128);
        let frame = view(&planes, 8, 8, 0);

        let cache = GeometryCache::new();
        let other_key = FrameKey::new(16, 16, 0).unwrap();
        let mut cropped = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
        let result =
            cache.with_entry(other_key, |entry| convert_frame(&frame, entry, &mut cropped));
        assert!(result.is_err());
    }
}
