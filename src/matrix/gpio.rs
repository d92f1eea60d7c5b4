/*
 *  matrix/gpio.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  GPIO bank abstraction: memory-mapped hardware bank and a recording
 *  simulator for tests and off-target runs
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

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::ptr;

use log::debug;

use crate::matrix::error::MatrixError;

/// Width of one GPIO register bank. All color, clock, strobe and
/// address lines live in the first bank on the boards we target.
pub type GpioBits = u32;

/// Highest pin number the matrix may claim on the 40-pin header.
const MAX_USABLE_PIN: u32 = 27;

/// Register-poke surface of a GPIO bank.
///
/// The refresh engine only ever needs these three writes; everything
/// timing-related sits above this trait in [`crate::matrix::pulser`].
pub trait GpioBank {
    /// Claim `mask` as outputs. Returns the subset the bank actually
    /// supports; callers treat any shortfall as fatal.
    fn init_outputs(&mut self, mask: GpioBits) -> GpioBits;

    /// Drive all bits in `mask` high.
    fn set_bits(&mut self, mask: GpioBits);

    /// Drive all bits in `mask` low.
    fn clear_bits(&mut self, mask: GpioBits);

    /// Set the bits of `mask` to the corresponding bits of `value`,
    /// leaving bits outside `mask` untouched.
    fn write_masked_bits(&mut self, value: GpioBits, mask: GpioBits) {
        self.clear_bits(mask & !value);
        self.set_bits(mask & value);
    }
}

// BCM283x/BCM2711 GPIO register offsets, in 32-bit words from the
// start of the gpiomem window.
const GPFSEL_BASE: usize = 0; // function select, 10 pins per word
const GPSET0: usize = 0x1c / 4;
const GPCLR0: usize = 0x28 / 4;

const GPIO_MAP_LEN: usize = 4096;

/// Memory-mapped `/dev/gpiomem` bank.
///
/// `slowdown` repeats every register poke; Pis newer than the original
/// model push edges faster than panel shift registers can take.
pub struct MemGpio {
    base: *mut u32,
    slowdown: u32,
    output_bits: GpioBits,
}

// The mapping is owned by this struct alone; the raw pointer never
// leaves it.
unsafe impl Send for MemGpio {}

impl MemGpio {
    pub fn open(slowdown: u32) -> Result<Self, MatrixError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/gpiomem")
            .map_err(|e| MatrixError::GpioInit(format!("/dev/gpiomem: {}", e)))?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                GPIO_MAP_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MatrixError::GpioInit(format!(
                "mmap /dev/gpiomem: {}",
                std::io::Error::last_os_error()
            )));
        }
        debug!("mapped /dev/gpiomem, slowdown {}", slowdown);

        Ok(MemGpio {
            base: base as *mut u32,
            slowdown,
            output_bits: 0,
        })
    }

    #[inline]
    fn poke(&mut self, word: usize, value: u32) {
        // The repeated write is the slowdown: each poke stretches the
        // edge the panel sees.
        for _ in 0..=self.slowdown {
            unsafe { ptr::write_volatile(self.base.add(word), value) };
        }
    }
}

impl GpioBank for MemGpio {
    fn init_outputs(&mut self, mask: GpioBits) -> GpioBits {
        let usable = mask & ((1u32 << (MAX_USABLE_PIN + 1)) - 1);
        for pin in 0..=MAX_USABLE_PIN {
            if usable & (1 << pin) == 0 {
                continue;
            }
            let fsel = GPFSEL_BASE + (pin / 10) as usize;
            let shift = (pin % 10) * 3;
            unsafe {
                let cur = ptr::read_volatile(self.base.add(fsel));
                let out = (cur & !(0b111 << shift)) | (0b001 << shift);
                ptr::write_volatile(self.base.add(fsel), out);
            }
        }
        self.output_bits |= usable;
        usable
    }

    fn set_bits(&mut self, mask: GpioBits) {
        self.poke(GPSET0, mask & self.output_bits);
    }

    fn clear_bits(&mut self, mask: GpioBits) {
        self.poke(GPCLR0, mask & self.output_bits);
    }
}

impl Drop for MemGpio {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, GPIO_MAP_LEN);
        }
    }
}

/// One recorded register write, for assertions in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioOp {
    Set(GpioBits),
    Clear(GpioBits),
    WriteMasked { value: GpioBits, mask: GpioBits },
}

/// Simulated GPIO bank.
///
/// Tracks pin levels and records every write so tests can assert on
/// ordering and count. Also what the daemon runs against when started
/// with `--led-no-hardware`.
#[derive(Debug, Default)]
pub struct SimGpio {
    pub levels: GpioBits,
    pub output_bits: GpioBits,
    pub ops: Vec<GpioOp>,
    pub write_count: usize,
    record: bool,
}

impl SimGpio {
    pub fn new() -> Self {
        SimGpio { record: false, ..Default::default() }
    }

    /// Like `new`, but keeps the full op log. Test-sized workloads only.
    pub fn recording() -> Self {
        SimGpio { record: true, ..Default::default() }
    }

    pub fn reset_log(&mut self) {
        self.ops.clear();
        self.write_count = 0;
    }
}

impl GpioBank for SimGpio {
    fn init_outputs(&mut self, mask: GpioBits) -> GpioBits {
        self.output_bits |= mask;
        mask
    }

    fn set_bits(&mut self, mask: GpioBits) {
        self.levels |= mask & self.output_bits;
        self.write_count += 1;
        if self.record {
            self.ops.push(GpioOp::Set(mask));
        }
    }

    fn clear_bits(&mut self, mask: GpioBits) {
        self.levels &= !(mask & self.output_bits);
        self.write_count += 1;
        if self.record {
            self.ops.push(GpioOp::Clear(mask));
        }
    }

    fn write_masked_bits(&mut self, value: GpioBits, mask: GpioBits) {
        let m = mask & self.output_bits;
        self.levels = (self.levels & !m) | (value & m);
        self.write_count += 1;
        if self.record {
            self.ops.push(GpioOp::WriteMasked { value, mask });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_write_preserves_unmasked_bits() {
        let mut io = SimGpio::new();
        io.init_outputs(0xff);
        io.set_bits(0b1010_0000);
        io.write_masked_bits(0b0000_0101, 0b0000_1111);
        assert_eq!(io.levels, 0b1010_0101);
    }

    #[test]
    fn uninitialized_pins_stay_low() {
        let mut io = SimGpio::new();
        io.init_outputs(0b0011);
        io.set_bits(0b1111);
        assert_eq!(io.levels, 0b0011);
    }

    #[test]
    fn recorder_keeps_op_order() {
        let mut io = SimGpio::recording();
        io.init_outputs(0xf);
        io.set_bits(0x1);
        io.clear_bits(0x1);
        assert_eq!(io.ops, vec![GpioOp::Set(0x1), GpioOp::Clear(0x1)]);
    }
}
