/*
 *  matrix/designator.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Per-pixel GPIO designators: the precomputed scatter targets that
 *  make SetPixel a constant-time write into the bitplane buffer
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

use crate::matrix::error::MatrixError;
use crate::matrix::framebuffer::BIT_PLANES;
use crate::matrix::gpio::GpioBits;
use crate::matrix::mapping::{ChainPins, HardwareMapping};
use crate::matrix::multiplex::MultiplexMapper;

/// Where one logical pixel lives in the bitplane buffer.
///
/// `gpio_word` is the word offset of the pixel's plane-0 entry;
/// `mask` is the complement of the three color bits, preserving
/// neighbouring pixels sharing the same word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDesignator {
    pub gpio_word: i32,
    pub r_bit: GpioBits,
    pub g_bit: GpioBits,
    pub b_bit: GpioBits,
    pub mask: GpioBits,
}

impl Default for PixelDesignator {
    fn default() -> Self {
        // Not-used marker; SetPixel skips these.
        PixelDesignator { gpio_word: -1, r_bit: 0, g_bit: 0, b_bit: 0, mask: !0 }
    }
}

/// Geometry the designator construction needs. All values are in the
/// electrical matrix domain, after any multiplex stretching.
#[derive(Debug, Clone, Copy)]
pub struct MatrixGeometry {
    /// Chained panel width, i.e. total columns shifted per row.
    pub columns: usize,
    /// Rows of one parallel chain.
    pub rows: usize,
    /// Number of parallel chains in use.
    pub parallel: usize,
    /// Scan pairs per chain: `rows / sub_panels`.
    pub double_rows: usize,
}

impl MatrixGeometry {
    pub fn height(&self) -> usize {
        self.rows * self.parallel
    }
}

/// Dense designator table shared read-only by both canvases of a
/// matrix. Built once at matrix construction and never mutated.
#[derive(Debug, Clone)]
pub struct PixelDesignatorMap {
    width: usize,
    height: usize,
    buffer: Vec<PixelDesignator>,
}

impl PixelDesignatorMap {
    /// Build the designators for a plain (non-multiplexed) matrix:
    /// each pixel points at its double-row/column word and carries the
    /// color bits of its chain half, permuted by `led_sequence`.
    pub fn new(
        geometry: MatrixGeometry,
        mapping: &HardwareMapping,
        led_sequence: &str,
    ) -> Result<PixelDesignatorMap, MatrixError> {
        let width = geometry.columns;
        let height = geometry.height();
        let mut buffer = Vec::with_capacity(width * height);

        for y in 0..height {
            let chain = y / geometry.rows;
            let upper = (y % geometry.rows) < geometry.double_rows;
            let pins = &mapping.chains[chain];
            let (dr, dg, db) = half_pins(pins, upper);

            let r_bit = gpio_from_led_sequence(led_sequence, 'R', dr, dg, db)?;
            let g_bit = gpio_from_led_sequence(led_sequence, 'G', dr, dg, db)?;
            let b_bit = gpio_from_led_sequence(led_sequence, 'B', dr, dg, db)?;

            for x in 0..width {
                let gpio_word =
                    ((y % geometry.double_rows) * geometry.columns * BIT_PLANES + x) as i32;
                buffer.push(PixelDesignator {
                    gpio_word,
                    r_bit,
                    g_bit,
                    b_bit,
                    mask: !(r_bit | g_bit | b_bit),
                });
            }
        }

        Ok(PixelDesignatorMap { width, height, buffer })
    }

    /// Compose a multiplex mapper on top: the result is indexed by
    /// visible coordinates and holds the designator of the matrix
    /// pixel each visible pixel is wired to.
    pub fn composed(&self, mapper: &MultiplexMapper) -> PixelDesignatorMap {
        let (vis_w, vis_h) = mapper.get_size_mapping(self.width, self.height);
        let mut buffer = vec![PixelDesignator::default(); vis_w * vis_h];
        for vy in 0..vis_h {
            for vx in 0..vis_w {
                let (mx, my) = mapper.map_visible_to_matrix(self.width, self.height, vx, vy);
                if let Some(d) = self.get(mx, my) {
                    buffer[vy * vis_w + vx] = *d;
                }
            }
        }
        PixelDesignatorMap { width: vis_w, height: vis_h, buffer }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&PixelDesignator> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(&self.buffer[y * self.width + x])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

fn half_pins(pins: &ChainPins, upper: bool) -> (GpioBits, GpioBits, GpioBits) {
    if upper {
        (pins.r1, pins.g1, pins.b1)
    } else {
        (pins.r2, pins.g2, pins.b2)
    }
}

/// Strange LED orderings such as "RBG" or "GRB" are resolved here: the
/// position of `channel` within the sequence decides which physical
/// line carries it.
fn gpio_from_led_sequence(
    sequence: &str,
    channel: char,
    default_r: GpioBits,
    default_g: GpioBits,
    default_b: GpioBits,
) -> Result<GpioBits, MatrixError> {
    let pos = sequence
        .chars()
        .position(|c| c.eq_ignore_ascii_case(&channel))
        .ok_or_else(|| MatrixError::LedSequenceMissingChannel {
            sequence: sequence.to_string(),
            channel,
        })?;
    match pos {
        0 => Ok(default_r),
        1 => Ok(default_g),
        _ => Ok(default_b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> MatrixGeometry {
        MatrixGeometry { columns: 32, rows: 32, parallel: 1, double_rows: 16 }
    }

    fn mapping() -> HardwareMapping {
        HardwareMapping::by_name("regular").unwrap()
    }

    #[test]
    fn mask_complements_exactly_the_channel_bits() {
        let map = PixelDesignatorMap::new(geometry(), &mapping(), "RGB").unwrap();
        for y in 0..map.height() {
            for x in 0..map.width() {
                let d = map.get(x, y).unwrap();
                let rgb = d.r_bit | d.g_bit | d.b_bit;
                assert_eq!(d.mask | rgb, !0);
                assert_eq!(d.mask & rgb, 0);
            }
        }
    }

    #[test]
    fn upper_and_lower_half_use_their_own_bus() {
        let map = PixelDesignatorMap::new(geometry(), &mapping(), "RGB").unwrap();
        let h = mapping();
        let top = map.get(0, 0).unwrap();
        let bottom = map.get(0, 16).unwrap();
        assert_eq!(top.r_bit, h.chains[0].r1);
        assert_eq!(bottom.r_bit, h.chains[0].r2);
        // Scan pair shares the word.
        assert_eq!(top.gpio_word, bottom.gpio_word);
    }

    #[test]
    fn led_sequence_reroutes_channels() {
        let map = PixelDesignatorMap::new(geometry(), &mapping(), "GRB").unwrap();
        let h = mapping();
        let d = map.get(0, 0).unwrap();
        // 'R' sits at position 1 of "GRB", so red rides the line that
        // plain RGB wiring would use for green.
        assert_eq!(d.r_bit, h.chains[0].g1);
        assert_eq!(d.g_bit, h.chains[0].r1);
        assert_eq!(d.b_bit, h.chains[0].b1);
    }

    #[test]
    fn led_sequence_without_required_letter_fails() {
        let err = PixelDesignatorMap::new(geometry(), &mapping(), "RG").unwrap_err();
        assert!(matches!(err, MatrixError::LedSequenceMissingChannel { channel: 'B', .. }));
    }

    #[test]
    fn out_of_bounds_lookup_is_none() {
        let map = PixelDesignatorMap::new(geometry(), &mapping(), "rgb").unwrap();
        assert!(map.get(32, 0).is_none());
        assert!(map.get(0, 32).is_none());
        assert!(map.get(31, 31).is_some());
    }

    #[test]
    fn parallel_chains_pick_their_own_color_lines() {
        let geo = MatrixGeometry { columns: 32, rows: 16, parallel: 3, double_rows: 8 };
        let map = PixelDesignatorMap::new(geo, &mapping(), "RGB").unwrap();
        let h = mapping();
        assert_eq!(map.get(0, 0).unwrap().r_bit, h.chains[0].r1);
        assert_eq!(map.get(0, 16).unwrap().r_bit, h.chains[1].r1);
        assert_eq!(map.get(0, 40).unwrap().r_bit, h.chains[2].r2);
    }
}
