/*
 *  matrix/framebuffer.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  The workhorse: bitplane framebuffer in a format friendly to being
 *  clocked out of the GPIO bank, plus the BCM refresh inner loop
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

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::matrix::designator::MatrixGeometry;
use crate::matrix::gpio::{GpioBank, GpioBits};
use crate::matrix::pulser::PinPulser;
use crate::matrix::row_address::RowAddressSetter;
use crate::matrix::MatrixShared;
use std::sync::Arc;

/// Maximum usable bitplanes. Eleven is the sweet spot between color
/// richness and refresh rate on the boards this runs on.
pub const BIT_PLANES: usize = 11;

/// A HUB75 panel drives two rows per address: upper and lower half.
pub const SUB_PANELS: usize = 2;

/// Whether double-rows are scanned in order or interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Progressive,
    Interlaced,
}

/// Source of the temporal dither noise added before quantizing the
/// 16-bit staging value down to the bitplanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherMode {
    /// Fresh noise per write, from the framebuffer's own PRNG.
    #[default]
    Random,
    /// 8x8 Bayer matrix keyed on the pixel position.
    Bayer,
    /// Constant mid-step offset; fully deterministic.
    Static,
}

/// Bayer 8x8 ordered-dither pattern, values 0..63.
const BAYER_8X8: [[u16; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// CIE1931 luminance correction, precomputed for every brightness
/// step and 8-bit input. Output is in the 16-bit staging domain.
#[derive(Debug, Clone)]
pub struct CieTable {
    table: Vec<u16>, // 100 brightness steps x 256 inputs
}

impl CieTable {
    pub fn new() -> CieTable {
        let mut table = Vec::with_capacity(100 * 256);
        for b in 1..=100u16 {
            for c in 0..256u16 {
                table.push(luminance_cie1931(c as u8, b as u8));
            }
        }
        CieTable { table }
    }

    #[inline]
    pub fn lookup(&self, brightness: u8, c: u8) -> u16 {
        self.table[(brightness as usize - 1) * 256 + c as usize]
    }
}

impl Default for CieTable {
    fn default() -> Self {
        CieTable::new()
    }
}

fn luminance_cie1931(c: u8, brightness: u8) -> u16 {
    let out_factor = 32.0 * f32::from((1u16 << BIT_PLANES) - 1);
    let v = f32::from(c) * f32::from(brightness) / 255.0;
    let lum = if v <= 8.0 { v / 902.3 } else { ((v + 16.0) / 116.0).powi(3) };
    (out_factor * lum) as u16
}

/// Direct (non-corrected) mapping: brightness scale, then widen the
/// 8-bit value to the 16-bit staging domain.
#[inline]
fn direct_map_color(brightness: u8, c: u8) -> u16 {
    let c = u16::from(c) * u16::from(brightness) / 100;
    (c << 8) | c
}

/// Bitplane-organized framebuffer of one canvas.
///
/// A single GPIO word at `(double_row, plane, column)` carries the
/// color bits of every parallel chain and both scan halves, so one
/// write clocks out `2 * parallel * chain_length` pixels worth of
/// state for that plane.
pub struct Framebuffer {
    shared: Arc<MatrixShared>,
    columns: usize,
    parallel: usize,
    double_rows: usize,
    scan_mode: ScanMode,
    inverse_color: bool,
    pwm_bits: usize,
    do_luminance_correct: bool,
    brightness: u8,
    dither: DitherMode,
    rng: SmallRng,
    bitplane: Vec<GpioBits>,
}

impl Framebuffer {
    pub fn new(
        shared: &Arc<MatrixShared>,
        geometry: MatrixGeometry,
        scan_mode: ScanMode,
        inverse_color: bool,
    ) -> Framebuffer {
        debug_assert!(geometry.rows >= 8 && geometry.rows <= 64 && geometry.rows % 2 == 0);
        debug_assert!(geometry.parallel >= 1 && geometry.parallel <= 3);
        Framebuffer {
            shared: Arc::clone(shared),
            columns: geometry.columns,
            parallel: geometry.parallel,
            double_rows: geometry.double_rows,
            scan_mode,
            inverse_color,
            pwm_bits: BIT_PLANES,
            do_luminance_correct: true,
            brightness: 100,
            dither: DitherMode::default(),
            rng: SmallRng::from_entropy(),
            bitplane: vec![0; geometry.double_rows * geometry.columns * BIT_PLANES],
        }
    }

    /// Visible width, after any multiplex composition.
    pub fn width(&self) -> usize {
        self.shared.designators().width()
    }

    /// Visible height, after any multiplex composition.
    pub fn height(&self) -> usize {
        self.shared.designators().height()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn double_rows(&self) -> usize {
        self.double_rows
    }

    /// Reduce (or restore) the clocked color depth at runtime.
    pub fn set_pwm_bits(&mut self, value: usize) -> bool {
        if value < 1 || value > BIT_PLANES {
            return false;
        }
        self.pwm_bits = value;
        true
    }

    pub fn pwm_bits(&self) -> usize {
        self.pwm_bits
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness.clamp(1, 100);
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn set_luminance_correct(&mut self, on: bool) {
        self.do_luminance_correct = on;
    }

    pub fn set_dither_mode(&mut self, mode: DitherMode) {
        self.dither = mode;
    }

    #[inline]
    fn value_index(&self, double_row: usize, column: usize, bit: usize) -> usize {
        double_row * self.columns * BIT_PLANES + bit * self.columns + column
    }

    /// One word of the bitplane buffer; the refresh engine's view.
    /// Mostly useful to tooling and tests.
    pub fn plane_word(&self, double_row: usize, plane: usize, column: usize) -> GpioBits {
        self.bitplane[self.value_index(double_row, column, plane)]
    }

    /// 8-bit RGB through the active color pipeline into the 16-bit
    /// staging domain, honoring brightness and inversion.
    pub fn map_colors(&self, r: u8, g: u8, b: u8) -> (u16, u16, u16) {
        let (mut red, mut green, mut blue) = if self.do_luminance_correct {
            let cie = self.shared.cie();
            (
                cie.lookup(self.brightness, r),
                cie.lookup(self.brightness, g),
                cie.lookup(self.brightness, b),
            )
        } else {
            (
                direct_map_color(self.brightness, r),
                direct_map_color(self.brightness, g),
                direct_map_color(self.brightness, b),
            )
        };
        if self.inverse_color {
            red = !red;
            green = !green;
            blue = !blue;
        }
        (red, green, blue)
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, r: u8, g: u8, b: u8) {
        let (red, green, blue) = self.map_colors(r, g, b);
        self.set_pixel_hdr(x, y, red, green, blue);
    }

    /// Write one pixel from the 16-bit staging domain into the
    /// bitplanes. Out-of-range and not-wired pixels are ignored.
    pub fn set_pixel_hdr(&mut self, x: usize, y: usize, red: u16, green: u16, blue: u16) {
        let noise = match self.dither {
            DitherMode::Random => self.rng.gen_range(0..32),
            DitherMode::Bayer => BAYER_8X8[x & 7][y & 7] / 2,
            DitherMode::Static => 16,
        };
        let quantize = |c: u16| -> u16 { (u32::from(c) + u32::from(noise)).min(0xffff) as u16 >> 5 };
        let red = quantize(red);
        let green = quantize(green);
        let blue = quantize(blue);

        let Some(&designator) = self.shared.designators().get(x, y) else {
            return;
        };
        if designator.gpio_word < 0 {
            return; // not-wired pixel
        }
        let pos = designator.gpio_word as usize;
        let r_bits = designator.r_bit;
        let g_bits = designator.g_bit;
        let b_bits = designator.b_bit;
        let keep = designator.mask;

        let min_bit_plane = BIT_PLANES - self.pwm_bits;
        let mut idx = pos + self.columns * min_bit_plane;
        for plane in min_bit_plane..BIT_PLANES {
            let mask = 1u16 << plane;
            let mut color_bits = 0;
            if red & mask != 0 {
                color_bits |= r_bits;
            }
            if green & mask != 0 {
                color_bits |= g_bits;
            }
            if blue & mask != 0 {
                color_bits |= b_bits;
            }
            let word = &mut self.bitplane[idx];
            *word = (*word & keep) | color_bits;
            idx += self.columns;
        }
    }

    /// Flood the whole matrix, plane-wise on the raw word buffer.
    /// No dithering here; every word of a plane gets the same bits.
    pub fn fill(&mut self, r: u8, g: u8, b: u8) {
        let (red, green, blue) = self.map_colors(r, g, b);
        let (red, green, blue) = (red >> 5, green >> 5, blue >> 5);

        // Union of the routed channel bits over the whole designator
        // map. Multiplex mappers may route the scan half by x as well
        // as y (Absen does), so no single column sees every half.
        let shared = Arc::clone(&self.shared);
        let designators = shared.designators();
        let (mut r_all, mut g_all, mut b_all) = (0, 0, 0);
        for y in 0..designators.height() {
            for x in 0..designators.width() {
                if let Some(d) = designators.get(x, y) {
                    r_all |= d.r_bit;
                    g_all |= d.g_bit;
                    b_all |= d.b_bit;
                }
            }
        }

        for plane in BIT_PLANES - self.pwm_bits..BIT_PLANES {
            let mask = 1u16 << plane;
            let mut plane_bits: GpioBits = 0;
            if red & mask != 0 {
                plane_bits |= r_all;
            }
            if green & mask != 0 {
                plane_bits |= g_all;
            }
            if blue & mask != 0 {
                plane_bits |= b_all;
            }
            for row in 0..self.double_rows {
                let base = self.value_index(row, 0, plane);
                self.bitplane[base..base + self.columns].fill(plane_bits);
            }
        }
    }

    pub fn clear(&mut self) {
        if self.inverse_color {
            self.fill(0, 0, 0);
        } else {
            self.bitplane.fill(0);
        }
    }

    /// Copy the raw word buffer from a same-geometry framebuffer.
    pub fn copy_from(&mut self, other: &Framebuffer) {
        assert_eq!(self.bitplane.len(), other.bitplane.len(), "framebuffer geometry differs");
        self.bitplane.copy_from_slice(&other.bitplane);
    }

    /// Opaque dump of the word buffer. Only portable between builds
    /// with identical geometry and word size.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bitplane.len() * std::mem::size_of::<GpioBits>());
        for word in &self.bitplane {
            out.extend_from_slice(&word.to_ne_bytes());
        }
        out
    }

    /// Restore a [`Self::serialize`] dump. Returns false on any size
    /// mismatch, leaving the buffer untouched.
    pub fn deserialize(&mut self, data: &[u8]) -> bool {
        const WORD: usize = std::mem::size_of::<GpioBits>();
        if data.len() != self.bitplane.len() * WORD {
            return false;
        }
        for (word, chunk) in self.bitplane.iter_mut().zip(data.chunks_exact(WORD)) {
            *word = GpioBits::from_ne_bytes(chunk.try_into().unwrap());
        }
        true
    }

    /// Serialize the buffer to the panels: row by row, plane by plane,
    /// with the output-enable pulse of the previous plane overlapping
    /// the next shift-in.
    ///
    /// Pure read of the bitplane buffer; the back canvas takes all
    /// mutation while this runs on the active one.
    pub fn dump_to_matrix<G: GpioBank + ?Sized>(
        &self,
        io: &mut G,
        pulser: &mut PinPulser,
        row_setter: &mut RowAddressSetter,
        pwm_low_bit: usize,
    ) {
        let h = self.shared.mapping();
        let mut color_clk_mask: GpioBits = h.clock;
        for chain in h.chains.iter().take(self.parallel) {
            color_clk_mask |= chain.all();
        }

        // Depending on dithering, not every invocation shows the
        // lowest bits.
        let start_bit = pwm_low_bit.max(BIT_PLANES - self.pwm_bits);

        let half = self.double_rows / 2;
        for row_loop in 0..self.double_rows {
            let d_row = match self.scan_mode {
                ScanMode::Progressive => row_loop,
                ScanMode::Interlaced => {
                    if row_loop < half {
                        row_loop * 2
                    } else {
                        (row_loop - half) * 2 + 1
                    }
                }
            };

            // Rows can't be switched quickly without ghosting, so the
            // full PWM cycle of one row finishes before moving on.
            for plane in start_bit..BIT_PLANES {
                let row_base = self.value_index(d_row, 0, plane);
                for col in 0..self.columns {
                    // Write color bits with the clock low, then raise
                    // the clock: rising edge shifts the column in.
                    let out = self.bitplane[row_base + col];
                    io.write_masked_bits(out, color_clk_mask);
                    io.set_bits(h.clock);
                }
                io.clear_bits(color_clk_mask);

                // The previous plane must have gone dark before we
                // strobe new data or touch the address lines.
                pulser.wait_pulse_finished(io);

                row_setter.set_row_address(io, d_row);

                io.set_bits(h.strobe);
                io.clear_bits(h.strobe);

                // Light up for this plane's BCM share.
                pulser.send_pulse(io, plane);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::designator::MatrixGeometry;
    use crate::matrix::gpio::SimGpio;
    use crate::matrix::mapping::HardwareMapping;
    use crate::matrix::multiplex::MultiplexMapper;
    use crate::matrix::row_address::{RowAddressSetter, RowAddressType};
    use crate::matrix::MatrixShared;

    fn shared_32x32() -> Arc<MatrixShared> {
        let mapping = HardwareMapping::by_name("regular").unwrap();
        let geometry = MatrixGeometry { columns: 32, rows: 32, parallel: 1, double_rows: 16 };
        MatrixShared::new(mapping, geometry, "RGB", None).unwrap()
    }

    fn test_framebuffer() -> Framebuffer {
        let shared = shared_32x32();
        let geometry = MatrixGeometry { columns: 32, rows: 32, parallel: 1, double_rows: 16 };
        let mut fb = Framebuffer::new(&shared, geometry, ScanMode::Progressive, false);
        fb.set_luminance_correct(false);
        fb.set_dither_mode(DitherMode::Static);
        fb
    }

    /// Undo the bitplane encoding for one channel of one pixel.
    fn read_back_channel(fb: &Framebuffer, x: usize, y: usize, channel_bit: GpioBits) -> u16 {
        let d = *fb.shared.designators().get(x, y).unwrap();
        let mut value = 0u16;
        for plane in 0..BIT_PLANES {
            let word = fb.bitplane[d.gpio_word as usize + plane * fb.columns()];
            if word & channel_bit != 0 {
                value |= 1 << plane;
            }
        }
        value
    }

    #[test]
    fn direct_mode_roundtrips_at_full_depth() {
        let mut fb = test_framebuffer();
        for &c in &[0u8, 1, 17, 90, 128, 200, 255] {
            fb.set_pixel(3, 5, c, c, c);
            let d = *fb.shared.designators().get(3, 5).unwrap();
            let expected = (u32::from(c) * 257 + 16).min(0xffff) as u16 >> 5;
            assert_eq!(read_back_channel(&fb, 3, 5, d.r_bit), expected);
            // Recover the 8-bit input from the plane value.
            let recovered = ((u32::from(expected) << 5) + 128) / 257;
            assert_eq!(recovered as u8, c);
        }
    }

    #[test]
    fn reduced_pwm_bits_truncate_the_low_planes() {
        let mut fb = test_framebuffer();
        fb.set_pwm_bits(8);
        fb.set_pixel(0, 0, 200, 0, 0);
        let d = *fb.shared.designators().get(0, 0).unwrap();
        let full = (200u32 * 257 + 16) as u16 >> 5;
        assert_eq!(read_back_channel(&fb, 0, 0, d.r_bit), full & !0b111);
    }

    #[test]
    fn set_pixel_only_touches_its_designated_words() {
        let mut fb = test_framebuffer();
        let before = fb.bitplane.clone();
        fb.set_pixel(5, 7, 255, 128, 3);

        let d = *fb.shared.designators().get(5, 7).unwrap();
        let expected: Vec<usize> =
            (0..BIT_PLANES).map(|p| d.gpio_word as usize + p * fb.columns()).collect();
        for (idx, (was, is)) in before.iter().zip(fb.bitplane.iter()).enumerate() {
            if expected.contains(&idx) {
                continue;
            }
            assert_eq!(was, is, "word {} changed outside the designator", idx);
        }
    }

    #[test]
    fn fill_floods_every_word_and_clear_undoes_it() {
        let mut fb = test_framebuffer();
        fb.fill(255, 255, 255);
        let d = *fb.shared.designators().get(0, 0).unwrap();
        let rgb = d.r_bit | d.g_bit | d.b_bit;
        for row in 0..fb.double_rows() {
            for plane in 0..BIT_PLANES {
                for col in 0..fb.columns() {
                    assert_eq!(fb.plane_word(row, plane, col) & rgb, rgb);
                }
            }
        }
        fb.clear();
        assert!(fb.bitplane.iter().all(|&w| w == 0));
    }

    #[test]
    fn fill_covers_both_scan_halves_under_absen_multiplexing() {
        // Absen routes the scan half by x: column 0 only ever touches
        // the upper bus, so the flood must union bits map-wide.
        let mapping = HardwareMapping::by_name("regular").unwrap();
        let mapper = MultiplexMapper::from_index(7, 64, 16).unwrap();
        let geometry = MatrixGeometry { columns: 64, rows: 16, parallel: 1, double_rows: 8 };
        let shared = MatrixShared::new(mapping.clone(), geometry, "RGB", Some(&mapper)).unwrap();
        let mut fb = Framebuffer::new(&shared, geometry, ScanMode::Progressive, false);
        fb.set_luminance_correct(false);

        fb.fill(255, 255, 255);

        let upper = mapping.chains[0].r1 | mapping.chains[0].g1 | mapping.chains[0].b1;
        let lower = mapping.chains[0].r2 | mapping.chains[0].g2 | mapping.chains[0].b2;
        let word = fb.plane_word(0, BIT_PLANES - 1, 0);
        assert_eq!(word & upper, upper);
        assert_eq!(word & lower, lower, "lower-half bus missing from the flood");
    }

    #[test]
    fn out_of_range_pixels_are_ignored() {
        let mut fb = test_framebuffer();
        let before = fb.bitplane.clone();
        fb.set_pixel(500, 2, 255, 255, 255);
        fb.set_pixel(2, 500, 255, 255, 255);
        assert_eq!(before, fb.bitplane);
    }

    #[test]
    fn deserialize_is_the_inverse_of_serialize() {
        let mut fb = test_framebuffer();
        fb.set_pixel(1, 2, 10, 200, 30);
        fb.set_pixel(31, 31, 255, 0, 255);
        let dump = fb.serialize();

        let mut restored = test_framebuffer();
        assert!(restored.deserialize(&dump));
        assert_eq!(restored.serialize(), dump);
    }

    #[test]
    fn deserialize_rejects_size_mismatch() {
        let mut fb = test_framebuffer();
        assert!(!fb.deserialize(&[0u8; 17]));
    }

    #[test]
    fn copy_from_detaches_after_the_copy() {
        let mut a = test_framebuffer();
        let mut b = test_framebuffer();
        a.set_pixel(4, 4, 90, 90, 90);
        b.copy_from(&a);
        assert_eq!(b.serialize(), a.serialize());

        a.set_pixel(8, 8, 255, 255, 255);
        assert_ne!(b.serialize(), a.serialize());
    }

    #[test]
    fn dump_to_matrix_reads_but_never_writes_the_buffer() {
        let mapping = HardwareMapping::by_name("regular").unwrap();
        let mut fb = test_framebuffer();
        fb.set_pixel(0, 0, 255, 255, 255);
        let before = fb.serialize();

        let mut io = SimGpio::new();
        let mut pulser = PinPulser::new(mapping.output_enable, &[100; BIT_PLANES]);
        let mut setter = RowAddressSetter::new(RowAddressType::Direct, 16, &mapping).unwrap();
        io.init_outputs(mapping.used_bits(1) | setter.need_bits());

        fb.dump_to_matrix(&mut io, &mut pulser, &mut setter, 0);
        pulser.wait_pulse_finished(&mut io);
        assert_eq!(fb.serialize(), before);
    }

    #[test]
    fn cie_table_is_monotonic_and_tops_out_in_staging_range() {
        let cie = CieTable::new();
        let mut last = 0;
        for c in 0..=255u8 {
            let v = cie.lookup(100, c);
            assert!(v >= last);
            last = v;
        }
        assert_eq!(cie.lookup(100, 255), 32 * ((1 << BIT_PLANES) - 1));
        assert!(cie.lookup(1, 255) < cie.lookup(100, 255));
    }
}
