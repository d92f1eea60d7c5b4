/*
 *  matrix/canvas.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Frame canvas: HDR staging image and tile references composited
 *  into the bitplane framebuffer right before the vsync swap
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::convert::Infallible;
use std::sync::Arc;

use embedded_graphics::draw_target::DrawTarget;
use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
use embedded_graphics::Pixel;

use crate::matrix::framebuffer::{DitherMode, Framebuffer};

/// Tiles on the wire are fixed 16x16 pixel squares.
pub const TILE_SIZE: usize = 16;

/// One ingested tile: 256 RGB triples in row-major order, each channel
/// a 16-bit HDR value.
pub type TileData = [u16; TILE_SIZE * TILE_SIZE * 3];

/// Producer-side canvas around one bitplane framebuffer.
///
/// Drawing lands in a full-screen HDR staging image; received tiles
/// are tracked as references. [`FrameCanvas::prepare_dump`] composites
/// both into the bitplanes, which is the only expensive step and runs
/// on the producer thread, never the refresh thread.
pub struct FrameCanvas {
    fb: Framebuffer,
    /// Staging image, three u16 channels per pixel. Doubles as the
    /// fallback for frames with missing tiles.
    fallback: Vec<u16>,
    tiles: Option<Vec<Option<Arc<TileData>>>>,
    tiles_x: usize,
    tiles_y: usize,
}

impl FrameCanvas {
    pub fn new(fb: Framebuffer) -> FrameCanvas {
        let (w, h) = (fb.width(), fb.height());
        FrameCanvas {
            fb,
            fallback: vec![0; w * h * 3],
            tiles: None,
            tiles_x: w.div_ceil(TILE_SIZE),
            tiles_y: h.div_ceil(TILE_SIZE),
        }
    }

    pub fn width(&self) -> usize {
        self.fb.width()
    }

    pub fn height(&self) -> usize {
        self.fb.height()
    }

    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    pub fn framebuffer_mut(&mut self) -> &mut Framebuffer {
        &mut self.fb
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.fb.set_brightness(brightness);
    }

    pub fn set_luminance_correct(&mut self, on: bool) {
        self.fb.set_luminance_correct(on);
    }

    pub fn set_pwm_bits(&mut self, bits: usize) -> bool {
        self.fb.set_pwm_bits(bits)
    }

    pub fn set_dither_mode(&mut self, mode: DitherMode) {
        self.fb.set_dither_mode(mode);
    }

    /// Stage one pixel through the color pipeline (brightness,
    /// CIE/direct mapping, inversion).
    pub fn set_pixel(&mut self, x: usize, y: usize, r: u8, g: u8, b: u8) {
        let (red, green, blue) = self.fb.map_colors(r, g, b);
        self.set_pixel_hdr(x, y, red, green, blue);
    }

    /// Stage one pixel as raw HDR channel values.
    pub fn set_pixel_hdr(&mut self, x: usize, y: usize, red: u16, green: u16, blue: u16) {
        if x >= self.fb.width() || y >= self.fb.height() {
            return;
        }
        let idx = (y * self.fb.width() + x) * 3;
        self.fallback[idx] = red;
        self.fallback[idx + 1] = green;
        self.fallback[idx + 2] = blue;
    }

    pub fn fill(&mut self, r: u8, g: u8, b: u8) {
        let (red, green, blue) = self.fb.map_colors(r, g, b);
        for px in self.fallback.chunks_exact_mut(3) {
            px[0] = red;
            px[1] = green;
            px[2] = blue;
        }
    }

    /// Install the tile references of one assembled frame, or `None`
    /// to composite purely from the staging image.
    pub fn set_tile_refs(&mut self, tiles: Option<Vec<Option<Arc<TileData>>>>) {
        if let Some(ref t) = tiles {
            debug_assert_eq!(t.len(), self.tiles_x * self.tiles_y);
        }
        self.tiles = tiles;
    }

    /// Composite staged pixels and tiles into the bitplane buffer.
    /// Present tiles win over the staging image at their location;
    /// holes fall back to staged pixels.
    pub fn prepare_dump(&mut self) {
        let fb = &mut self.fb;
        let width = fb.width();
        match &self.tiles {
            Some(tiles) => {
                for ty in 0..self.tiles_y {
                    for tx in 0..self.tiles_x {
                        match &tiles[ty * self.tiles_x + tx] {
                            Some(tile) => {
                                for y in 0..TILE_SIZE {
                                    for x in 0..TILE_SIZE {
                                        let off = (y * TILE_SIZE + x) * 3;
                                        fb.set_pixel_hdr(
                                            tx * TILE_SIZE + x,
                                            ty * TILE_SIZE + y,
                                            tile[off],
                                            tile[off + 1],
                                            tile[off + 2],
                                        );
                                    }
                                }
                            }
                            None => {
                                for y in 0..TILE_SIZE {
                                    let py = ty * TILE_SIZE + y;
                                    if py >= fb.height() {
                                        break;
                                    }
                                    for x in 0..TILE_SIZE {
                                        let px = tx * TILE_SIZE + x;
                                        if px >= width {
                                            break;
                                        }
                                        let off = (py * width + px) * 3;
                                        fb.set_pixel_hdr(
                                            px,
                                            py,
                                            self.fallback[off],
                                            self.fallback[off + 1],
                                            self.fallback[off + 2],
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
            None => {
                for y in 0..fb.height() {
                    for x in 0..width {
                        let off = (y * width + x) * 3;
                        fb.set_pixel_hdr(
                            x,
                            y,
                            self.fallback[off],
                            self.fallback[off + 1],
                            self.fallback[off + 2],
                        );
                    }
                }
            }
        }
    }
}

impl OriginDimensions for FrameCanvas {
    fn size(&self) -> Size {
        Size::new(self.fb.width() as u32, self.fb.height() as u32)
    }
}

impl DrawTarget for FrameCanvas {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as usize, point.y as usize, color.r(), color.g(), color.b());
            }
        }
        Ok(())
    }
}
