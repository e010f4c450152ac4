//! RGBA to planar YUV 4:2:0 conversion
//!
//! Full-range (JFIF) BT.601 in 16-bit fixed point with the libjpeg
//! coefficients. Chroma is computed from the sum of each 2x2 block, with edge
//! pixels replicated when a dimension is odd. Every step is integer
//! arithmetic, so output is bit-exact across platforms.

use crate::{Error, Result};
use image::RgbaImage;

const Y_R: i32 = 19595;
const Y_G: i32 = 38470;
const Y_B: i32 = 7471;
const CB_R: i32 = -11059;
const CB_G: i32 = -21709;
const CB_B: i32 = 32768;
const CR_R: i32 = 32768;
const CR_G: i32 = -27439;
const CR_B: i32 = -5329;

/// Planar YUV 4:2:0 frame with tightly packed planes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YuvFrame {
    pub width: u32,
    pub height: u32,
    /// Luma, `width * height` bytes
    pub y: Vec<u8>,
    /// Cb, `chroma_width * chroma_height` bytes
    pub u: Vec<u8>,
    /// Cr, `chroma_width * chroma_height` bytes
    pub v: Vec<u8>,
    /// Presentation timestamp in the encoder time base
    pub pts: i64,
}

impl YuvFrame {
    /// Allocate a zeroed frame
    pub fn new(width: u32, height: u32) -> Self {
        let (cw, ch) = chroma_size(width, height);
        Self {
            width,
            height,
            y: vec![0; width as usize * height as usize],
            u: vec![0; cw * ch],
            v: vec![0; cw * ch],
            pts: 0,
        }
    }

    /// Width of the chroma planes
    pub fn chroma_width(&self) -> usize {
        chroma_size(self.width, self.height).0
    }

    /// Height of the chroma planes
    pub fn chroma_height(&self) -> usize {
        chroma_size(self.width, self.height).1
    }
}

fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// Converts frames of one fixed resolution
#[derive(Debug, Clone)]
pub struct PixelConverter {
    width: u32,
    height: u32,
}

impl PixelConverter {
    /// Create a converter for `width` x `height` frames
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidConfig(format!(
                "cannot convert {}x{} frames",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    /// Allocate a destination frame matching this converter
    pub fn alloc_frame(&self) -> YuvFrame {
        YuvFrame::new(self.width, self.height)
    }

    /// Convert `src` into `dst`, leaving `dst.pts` untouched.
    ///
    /// Frames with a different resolution are rejected before any pixel is
    /// read or written.
    pub fn convert(&self, src: &RgbaImage, dst: &mut YuvFrame) -> Result<()> {
        if src.width() != self.width || src.height() != self.height {
            return Err(Error::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: src.width(),
                actual_height: src.height(),
            });
        }
        if dst.width != self.width || dst.height != self.height {
            *dst = YuvFrame {
                pts: dst.pts,
                ..self.alloc_frame()
            };
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let data = src.as_raw();
        let rgb = |x: usize, y: usize| -> (i32, i32, i32) {
            let idx = (y * width + x) * 4;
            (data[idx] as i32, data[idx + 1] as i32, data[idx + 2] as i32)
        };

        // Y plane
        for y in 0..height {
            for x in 0..width {
                let (r, g, b) = rgb(x, y);
                let luma = (Y_R * r + Y_G * g + Y_B * b + (1 << 15)) >> 16;
                dst.y[y * width + x] = luma.clamp(0, 255) as u8;
            }
        }

        // U and V planes (subsampled 2x2)
        let uv_width = dst.chroma_width();
        let uv_height = dst.chroma_height();

        for cy in 0..uv_height {
            for cx in 0..uv_width {
                let mut rs = 0;
                let mut gs = 0;
                let mut bs = 0;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let sx = (cx * 2 + dx).min(width - 1);
                        let sy = (cy * 2 + dy).min(height - 1);
                        let (r, g, b) = rgb(sx, sy);
                        rs += r;
                        gs += g;
                        bs += b;
                    }
                }

                let cb = ((CB_R * rs + CB_G * gs + CB_B * bs + (1 << 17)) >> 18) + 128;
                let cr = ((CR_R * rs + CR_G * gs + CR_B * bs + (1 << 17)) >> 18) + 128;
                dst.u[cy * uv_width + cx] = cb.clamp(0, 255) as u8;
                dst.v[cy * uv_width + cx] = cr.clamp(0, 255) as u8;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, r: u8, g: u8, b: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]))
    }

    fn convert_solid(r: u8, g: u8, b: u8) -> YuvFrame {
        let conv = PixelConverter::new(4, 4).unwrap();
        let mut dst = conv.alloc_frame();
        conv.convert(&solid(4, 4, r, g, b), &mut dst).unwrap();
        dst
    }

    fn assert_uniform(frame: &YuvFrame, y: u8, u: u8, v: u8) {
        assert!(frame.y.iter().all(|&s| s == y), "luma {:?} != {}", frame.y, y);
        assert!(frame.u.iter().all(|&s| s == u), "cb {:?} != {}", frame.u, u);
        assert!(frame.v.iter().all(|&s| s == v), "cr {:?} != {}", frame.v, v);
    }

    #[test]
    fn test_solid_colors_full_range() {
        assert_uniform(&convert_solid(0, 0, 0), 0, 128, 128);
        assert_uniform(&convert_solid(255, 255, 255), 255, 128, 128);
        assert_uniform(&convert_solid(255, 0, 0), 76, 85, 255);
        assert_uniform(&convert_solid(0, 255, 0), 150, 44, 21);
        assert_uniform(&convert_solid(0, 0, 255), 29, 255, 107);
        assert_uniform(&convert_solid(128, 128, 128), 128, 128, 128);
    }

    #[test]
    fn test_alpha_is_ignored() {
        let conv = PixelConverter::new(2, 2).unwrap();
        let mut opaque = conv.alloc_frame();
        let mut clear = conv.alloc_frame();
        conv.convert(&RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])), &mut opaque)
            .unwrap();
        conv.convert(&RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 0])), &mut clear)
            .unwrap();
        assert_eq!(opaque, clear);
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let img = RgbaImage::from_fn(6, 4, |x, y| {
            Rgba([(x * 40) as u8, (y * 60) as u8, ((x + y) * 20) as u8, 255])
        });
        let conv = PixelConverter::new(6, 4).unwrap();
        let mut a = conv.alloc_frame();
        let mut b = conv.alloc_frame();
        conv.convert(&img, &mut a).unwrap();
        conv.convert(&img, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_chroma_averages_block() {
        // Left column black, right column white: each 2x2 block averages to
        // mid-gray, which has neutral chroma.
        let img = RgbaImage::from_fn(2, 2, |x, _| {
            if x == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let conv = PixelConverter::new(2, 2).unwrap();
        let mut dst = conv.alloc_frame();
        conv.convert(&img, &mut dst).unwrap();
        assert_eq!(dst.y, vec![0, 255, 0, 255]);
        assert_eq!(dst.u, vec![128]);
        assert_eq!(dst.v, vec![128]);
    }

    #[test]
    fn test_odd_dimensions_replicate_edges() {
        let conv = PixelConverter::new(3, 3).unwrap();
        let mut dst = conv.alloc_frame();
        assert_eq!(dst.chroma_width(), 2);
        assert_eq!(dst.chroma_height(), 2);
        conv.convert(&solid(3, 3, 0, 0, 255), &mut dst).unwrap();
        assert_uniform(&dst, 29, 255, 107);
    }

    #[test]
    fn test_dimension_mismatch_rejected_before_writing() {
        let conv = PixelConverter::new(4, 4).unwrap();
        let mut dst = conv.alloc_frame();
        dst.y.fill(7);
        let err = conv.convert(&solid(4, 2, 255, 0, 0), &mut dst).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                actual_width: 4,
                actual_height: 2,
                ..
            }
        ));
        assert!(dst.y.iter().all(|&s| s == 7));
    }

    #[test]
    fn test_zero_resolution_rejected() {
        assert!(PixelConverter::new(0, 4).is_err());
    }
}
