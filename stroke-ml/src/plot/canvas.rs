//! An RGB raster with just enough drawing for box-and-arrow diagrams.

use crate::error::MlError;
use crate::plot::font::{self, GLYPH_HEIGHT, GLYPH_WIDTH};

pub type Rgb = [u8; 3];

pub const WHITE: Rgb = [255, 255, 255];
pub const BLACK: Rgb = [0, 0, 0];

#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: usize, height: usize, background: Rgb) -> Self {
        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            pixels.extend_from_slice(&background);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    /// Out-of-bounds writes are clipped.
    pub fn set(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let i = (y as usize * self.width + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&color);
    }

    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: Rgb) {
        for yy in y..y + h {
            for xx in x..x + w {
                self.set(xx as i64, yy as i64, color);
            }
        }
    }

    pub fn stroke_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: Rgb) {
        if w == 0 || h == 0 {
            return;
        }
        let (x0, y0) = (x as i64, y as i64);
        let (x1, y1) = ((x + w - 1) as i64, (y + h - 1) as i64);
        self.line(x0, y0, x1, y0, color);
        self.line(x0, y1, x1, y1, color);
        self.line(x0, y0, x0, y1, color);
        self.line(x1, y0, x1, y1, color);
    }

    /// Bresenham.
    pub fn line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y) = (x0, y0);
        let mut err = dx + dy;
        loop {
            self.set(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Line ending in a small arrowhead at (`x1`, `y1`).
    pub fn arrow(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        self.line(x0, y0, x1, y1, color);
        let (dx, dy) = ((x1 - x0) as f64, (y1 - y0) as f64);
        let len = dx.hypot(dy);
        if len < 1.0 {
            return;
        }
        let (ux, uy) = (dx / len, dy / len);
        let size = 7.0;
        for side in [-1.0, 1.0] {
            let hx = x1 as f64 - size * ux + side * size * 0.5 * uy;
            let hy = y1 as f64 - size * uy - side * size * 0.5 * ux;
            self.line(hx.round() as i64, hy.round() as i64, x1, y1, color);
        }
    }

    /// Pixel width of `text` at `scale`.
    pub fn text_width(text: &str, scale: usize) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars * (GLYPH_WIDTH + 1) - 1) * scale
    }

    pub fn text_height(scale: usize) -> usize {
        GLYPH_HEIGHT * scale
    }

    pub fn draw_text(&mut self, x: usize, y: usize, text: &str, scale: usize, color: Rgb) {
        for (i, c) in text.chars().enumerate() {
            let glyph = font::glyph(c);
            let origin = x + i * (GLYPH_WIDTH + 1) * scale;
            for row in 0..GLYPH_HEIGHT {
                for col in 0..GLYPH_WIDTH {
                    if font::is_set(&glyph, col, row) {
                        self.fill_rect(origin + col * scale, y + row * scale, scale, scale, color);
                    }
                }
            }
        }
    }

    /// Encode as an 8-bit RGB PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, MlError> {
        let width = u32::try_from(self.width)
            .map_err(|_| MlError::model("diagram too wide to encode"))?;
        let height = u32::try_from(self.height)
            .map_err(|_| MlError::model("diagram too tall to encode"))?;
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, width, height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(bytes)
    }
}
