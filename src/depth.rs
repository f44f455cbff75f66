// depth.rs - raw provider depth/normal buffers -> RGBA textures
//
// Both textures are rebuilt from scratch for every panorama; nothing here keeps
// state between loads.

use image::{Rgba, RgbaImage};
use serde::Deserialize;

/// Provider depth units that map to full white.
pub const DEPTH_RANGE: f32 = 50.0;

/// Width x height RGBA8, row-major, origin top-left.
pub type DecodedTexture = RgbaImage;

/// Per-pixel depth and normal data as delivered by the depth source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDepthBuffer {
    pub width: u32,
    pub height: u32,
    /// `width * height` depth values.
    pub depth_map: Vec<f32>,
    /// `3 * width * height` normal components in [-1, 1].
    pub normal_map: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextureError {
    #[error("depth buffer dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    #[error("depth map has {actual} values, expected {expected}")]
    DepthLength { actual: usize, expected: usize },

    #[error("normal map has {actual} values, expected {expected}")]
    NormalLength { actual: usize, expected: usize },
}

impl RawDepthBuffer {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn validate(&self) -> Result<(), TextureError> {
        if self.width == 0 || self.height == 0 {
            return Err(TextureError::ZeroDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let n = self.pixel_count();
        if self.depth_map.len() != n {
            return Err(TextureError::DepthLength {
                actual: self.depth_map.len(),
                expected: n,
            });
        }
        if self.normal_map.len() != 3 * n {
            return Err(TextureError::NormalLength {
                actual: self.normal_map.len(),
                expected: 3 * n,
            });
        }
        Ok(())
    }
}

/// The decoded pair for one panorama.
#[derive(Debug, Clone)]
pub struct DepthTextures {
    pub depth: DecodedTexture,
    pub normal: DecodedTexture,
}

/// Float -> byte the way a clamped canvas buffer stores it:
/// round half to even, saturate to 0..=255, NaN -> 0.
pub fn to_channel(v: f32) -> u8 {
    v.round_ties_even() as u8
}

fn normal_channel(v: f32) -> u8 {
    to_channel((v + 1.0) / 2.0 * 255.0)
}

/// Grayscale depth: `d / 50 * 255` in R, G and B, alpha 255.
pub fn decode_depth(buffers: &RawDepthBuffer) -> Result<DecodedTexture, TextureError> {
    buffers.validate()?;

    let mut image = RgbaImage::new(buffers.width, buffers.height);
    for (px, &d) in image.pixels_mut().zip(&buffers.depth_map) {
        let c = to_channel(d / DEPTH_RANGE * 255.0);
        *px = Rgba([c, c, c, 255]);
    }
    Ok(image)
}

/// Normal buffer remapped from [-1, 1] to bytes, mirrored horizontally.
///
/// The write column is `width - x` with no `- 1`: input column 0 lands one
/// past the end of its row, i.e. on column 0 of the next row in the flat
/// buffer. The last row's column-0 write falls off the end and is dropped,
/// and flat pixel 0 is never written (stays transparent black).
///
/// Column x reads input pixel x itself, not pixel x + 1, so the last column
/// of a row never reads past the buffer.
pub fn decode_normals(buffers: &RawDepthBuffer) -> Result<DecodedTexture, TextureError> {
    buffers.validate()?;

    let w = buffers.width as usize;
    let h = buffers.height as usize;
    let mut image = RgbaImage::new(buffers.width, buffers.height);
    let data: &mut [u8] = &mut image;

    for y in 0..h {
        for x in 0..w {
            let src = 3 * (y * w + x);
            let dst = (y * w + (w - x)) * 4;
            let Some(texel) = data.get_mut(dst..dst + 4) else {
                continue;
            };
            let n = &buffers.normal_map[src..src + 3];
            texel[0] = normal_channel(n[0]);
            texel[1] = normal_channel(n[1]);
            texel[2] = normal_channel(n[2]);
            texel[3] = 255;
        }
    }
    Ok(image)
}

pub fn build_textures(buffers: &RawDepthBuffer) -> Result<DepthTextures, TextureError> {
    Ok(DepthTextures {
        depth: decode_depth(buffers)?,
        normal: decode_normals(buffers)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(width: u32, height: u32, depth: f32, normal: [f32; 3]) -> RawDepthBuffer {
        let n = (width * height) as usize;
        RawDepthBuffer {
            width,
            height,
            depth_map: vec![depth; n],
            normal_map: normal.iter().copied().cycle().take(3 * n).collect(),
        }
    }

    #[test]
    fn depth_is_gray_with_opaque_alpha() {
        let mut b = buffer(7, 3, 0.0, [0.0, 0.0, 1.0]);
        for (i, d) in b.depth_map.iter_mut().enumerate() {
            *d = i as f32 * 2.3;
        }
        let tex = decode_depth(&b).unwrap();

        assert_eq!(tex.as_raw().len(), 4 * 21);
        for px in tex.pixels() {
            assert_eq!(px[3], 255);
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    #[test]
    fn depth_scale_and_saturation() {
        let mut b = buffer(4, 1, 0.0, [0.0; 3]);
        b.depth_map = vec![0.0, 25.0, 50.0, 80.0];
        let tex = decode_depth(&b).unwrap();

        // 25 / 50 * 255 = 127.5 -> 128 (ties to even)
        assert_eq!(tex.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(tex.get_pixel(1, 0).0, [128, 128, 128, 255]);
        assert_eq!(tex.get_pixel(2, 0).0, [255, 255, 255, 255]);
        assert_eq!(tex.get_pixel(3, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn normal_boundary_values() {
        assert_eq!(normal_channel(-1.0), 0);
        assert_eq!(normal_channel(0.0), 128);
        assert_eq!(normal_channel(1.0), 255);
        assert_eq!(to_channel(f32::NAN), 0);
        assert_eq!(to_channel(300.0), 255);
        assert_eq!(to_channel(-4.0), 0);
    }

    #[test]
    fn normal_write_is_mirrored() {
        let b = buffer(4, 2, 0.0, [1.0, 0.0, -1.0]);
        let tex = decode_normals(&b).unwrap();

        // x = 1..3 of row 0 land on columns 3..1
        for col in 1..4 {
            assert_eq!(tex.get_pixel(col, 0).0, [255, 128, 0, 255]);
        }
        // flat pixel 0 is never a write target
        assert_eq!(tex.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn each_column_reads_its_own_input_pixel() {
        let mut b = buffer(4, 1, 0.0, [0.0; 3]);
        for x in 0..4 {
            b.normal_map[3 * x] = -1.0 + 0.5 * x as f32;
        }
        let tex = decode_normals(&b).unwrap();

        // x = 1, 2, 3 land on columns 3, 2, 1 with their own values
        assert_eq!(tex.get_pixel(3, 0)[0], 64);
        assert_eq!(tex.get_pixel(2, 0)[0], 128);
        assert_eq!(tex.get_pixel(1, 0)[0], 191);
        assert_eq!(tex.get_pixel(1, 0)[3], 255);
        // x = 0 falls off the end of a single-row image
        assert_eq!(tex.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn first_column_lands_at_column_width() {
        let (w, h) = (5u32, 3u32);
        let mut b = buffer(w, h, 0.0, [0.0, 0.0, 0.0]);
        // mark input column 0 of every row
        for y in 0..h as usize {
            let i = 3 * (y * w as usize);
            b.normal_map[i..i + 3].copy_from_slice(&[1.0, 1.0, 1.0]);
        }
        let tex = decode_normals(&b).unwrap();
        let data = tex.as_raw();

        // column `width` of row y is flat pixel (y + 1) * w
        for y in 0..(h as usize - 1) {
            let p = ((y + 1) * w as usize) * 4;
            assert_eq!(&data[p..p + 4], &[255u8; 4]);
        }
        // every other written pixel is the neutral normal
        let marked = data
            .chunks_exact(4)
            .filter(|px| **px == [255u8; 4])
            .count();
        assert_eq!(marked, h as usize - 1);
    }

    #[test]
    fn rejects_mismatched_buffers() {
        let mut b = buffer(2, 2, 1.0, [0.0; 3]);
        b.normal_map.pop();
        assert_eq!(
            build_textures(&b).unwrap_err(),
            TextureError::NormalLength {
                actual: 11,
                expected: 12
            }
        );

        let empty = buffer(0, 4, 1.0, [0.0; 3]);
        assert!(matches!(
            decode_depth(&empty),
            Err(TextureError::ZeroDimensions { .. })
        ));
    }
}
