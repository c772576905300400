//! Emulated drawing surface: a fixed-size RGBA raster plus the drawing
//! primitives mode scripts call. Pixel coordinates, RGB/RGBA colors, stroke
//! width 0 means filled. Alpha composites with straight source-over; exact
//! anti-aliasing is not part of the contract, only visual equivalence to
//! the reference renderer.

mod font;
mod raster;

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;

pub use font::{GLYPH_HEIGHT, GLYPH_WIDTH};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);
}

impl From<[u8; 3]> for Rgba {
    fn from(c: [u8; 3]) -> Self {
        Self::rgb(c[0], c[1], c[2])
    }
}

#[derive(Clone, Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Surface {
    /// Opaque black surface, the on-screen default.
    pub fn new(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; (width * height * 4) as usize];
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Fully transparent surface for offscreen compositing.
    pub fn new_alpha(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgba> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let i = self.index(x, y);
        Some(Rgba::rgba(
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ))
    }

    /// Replace every pixel, alpha included.
    pub fn fill(&mut self, color: Rgba) {
        for px in self.data.chunks_exact_mut(4) {
            px[0] = color.r;
            px[1] = color.g;
            px[2] = color.b;
            px[3] = color.a;
        }
    }

    /// Snapshot and restore support for atomic mode switches.
    pub fn pixels_snapshot(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn restore_pixels(&mut self, snapshot: Vec<u8>) {
        if snapshot.len() == self.data.len() {
            self.data = snapshot;
        }
    }

    pub(crate) fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    pub(crate) fn index(&self, x: i32, y: i32) -> usize {
        ((y as u32 * self.width + x as u32) * 4) as usize
    }

    /// Bounds-checked source-over plot.
    pub fn plot(&mut self, x: i32, y: i32, color: Rgba) {
        if !self.in_bounds(x, y) {
            return;
        }
        let i = self.index(x, y);
        blend_over(&mut self.data[i..i + 4], color);
    }

    /// Source-over composite of `src` with its top-left corner at (x, y).
    pub fn blit(&mut self, src: &Surface, x: i32, y: i32) {
        for sy in 0..src.height as i32 {
            let dy = y + sy;
            if dy < 0 || dy as u32 >= self.height {
                continue;
            }
            for sx in 0..src.width as i32 {
                let dx = x + sx;
                if dx < 0 || dx as u32 >= self.width {
                    continue;
                }
                let si = src.index(sx, sy);
                let color = Rgba::rgba(
                    src.data[si],
                    src.data[si + 1],
                    src.data[si + 2],
                    src.data[si + 3],
                );
                if color.a > 0 {
                    let di = self.index(dx, dy);
                    blend_over(&mut self.data[di..di + 4], color);
                }
            }
        }
    }

    /// Encode the raster as the `data:image/jpeg;base64,` payload carried
    /// by frame events. JPEG is an order of magnitude faster than PNG at
    /// this resolution.
    pub fn encode_jpeg_data_uri(
        &self,
        quality: u8,
    ) -> Result<String, image::ImageError> {
        let rgb: Vec<u8> = self
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();

        let mut jpeg = Vec::new();
        let mut encoder =
            JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), quality);
        encoder.encode(
            &rgb,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )?;

        Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(&jpeg)))
    }
}

/// Straight-alpha source-over into a 4-byte RGBA pixel.
fn blend_over(dst: &mut [u8], src: Rgba) {
    if src.a == 255 {
        dst[0] = src.r;
        dst[1] = src.g;
        dst[2] = src.b;
        dst[3] = 255;
        return;
    }
    if src.a == 0 {
        return;
    }

    let sa = src.a as u16;
    let inv = 255 - sa;
    dst[0] = ((src.r as u16 * sa + dst[0] as u16 * inv) / 255) as u8;
    dst[1] = ((src.g as u16 * sa + dst[1] as u16 * inv) / 255) as u8;
    dst[2] = ((src.b as u16 * sa + dst[2] as u16 * inv) / 255) as u8;
    dst[3] = (sa + (dst[3] as u16 * inv) / 255).min(255) as u8;
}
