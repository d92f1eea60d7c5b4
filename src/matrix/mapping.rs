/*
 *  matrix/mapping.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Named GPIO bit layouts for the supported adapter boards
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
use crate::matrix::gpio::GpioBits;

const fn pin(n: u32) -> GpioBits {
    1 << n
}

/// The six color lines of one parallel chain: upper scan half
/// (r1,g1,b1) and lower scan half (r2,g2,b2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainPins {
    pub r1: GpioBits,
    pub g1: GpioBits,
    pub b1: GpioBits,
    pub r2: GpioBits,
    pub g2: GpioBits,
    pub b2: GpioBits,
}

impl ChainPins {
    pub const fn all(&self) -> GpioBits {
        self.r1 | self.g1 | self.b1 | self.r2 | self.g2 | self.b2
    }

    const fn unwired() -> Self {
        ChainPins { r1: 0, g1: 0, b1: 0, r2: 0, g2: 0, b2: 0 }
    }
}

/// Immutable record of where each panel signal sits in the GPIO bank.
/// Chosen once at startup; every constructor borrows it from there on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareMapping {
    pub name: &'static str,
    pub output_enable: GpioBits,
    pub clock: GpioBits,
    pub strobe: GpioBits,
    /// Row address lines, A (LSB) through E (MSB).
    pub a: GpioBits,
    pub b: GpioBits,
    pub c: GpioBits,
    pub d: GpioBits,
    pub e: GpioBits,
    /// Up to three parallel chains; unwired chains are all zero.
    pub chains: [ChainPins; 3],
    pub max_parallel_chains: usize,
}

impl HardwareMapping {
    /// Look up a mapping by name, case-insensitive. An empty name
    /// selects "regular". Resolves `max_parallel_chains` if the table
    /// entry leaves it to auto-detection.
    pub fn by_name(name: &str) -> Result<HardwareMapping, MatrixError> {
        let wanted = if name.is_empty() { "regular" } else { name };
        let mut mapping = MAPPINGS
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| MatrixError::UnknownHardwareMapping {
                name: wanted.to_string(),
                available: Self::names(),
            })?;

        if mapping.max_parallel_chains == 0 {
            mapping.max_parallel_chains = mapping
                .chains
                .iter()
                .take_while(|chain| chain.all() != 0)
                .count();
        }
        Ok(mapping)
    }

    pub fn names() -> Vec<&'static str> {
        MAPPINGS.iter().map(|m| m.name).collect()
    }

    /// Union of all bits the matrix will drive for `parallel` chains
    /// (row address lines excluded; the row setter declares those).
    pub fn used_bits(&self, parallel: usize) -> GpioBits {
        let mut bits = self.output_enable | self.clock | self.strobe;
        for chain in self.chains.iter().take(parallel) {
            bits |= chain.all();
        }
        bits
    }
}

/// The classic wiring on the 40-pin header. Three parallel chains.
const REGULAR: HardwareMapping = HardwareMapping {
    name: "regular",
    output_enable: pin(18),
    clock: pin(17),
    strobe: pin(4),
    a: pin(22),
    b: pin(23),
    c: pin(24),
    d: pin(25),
    e: pin(15),
    chains: [
        ChainPins { r1: pin(11), g1: pin(27), b1: pin(7), r2: pin(8), g2: pin(9), b2: pin(10) },
        ChainPins { r1: pin(12), g1: pin(5), b1: pin(6), r2: pin(19), g2: pin(13), b2: pin(20) },
        ChainPins { r1: pin(14), g1: pin(2), b1: pin(3), r2: pin(26), g2: pin(16), b2: pin(21) },
    ],
    max_parallel_chains: 0, // auto
};

const ADAFRUIT_HAT: HardwareMapping = HardwareMapping {
    name: "adafruit-hat",
    output_enable: pin(4),
    clock: pin(17),
    strobe: pin(21),
    a: pin(22),
    b: pin(26),
    c: pin(27),
    d: pin(20),
    e: pin(24),
    chains: [
        ChainPins { r1: pin(5), g1: pin(13), b1: pin(6), r2: pin(12), g2: pin(16), b2: pin(23) },
        ChainPins::unwired(),
        ChainPins::unwired(),
    ],
    max_parallel_chains: 0,
};

/// The hat reworked with output-enable on GPIO18, freeing the PWM pin.
const ADAFRUIT_HAT_PWM: HardwareMapping = HardwareMapping {
    name: "adafruit-hat-pwm",
    output_enable: pin(18),
    clock: pin(17),
    strobe: pin(21),
    a: pin(22),
    b: pin(26),
    c: pin(27),
    d: pin(20),
    e: pin(24),
    chains: [
        ChainPins { r1: pin(5), g1: pin(13), b1: pin(6), r2: pin(12), g2: pin(16), b2: pin(23) },
        ChainPins::unwired(),
        ChainPins::unwired(),
    ],
    max_parallel_chains: 0,
};

const MAPPINGS: [HardwareMapping; 3] = [REGULAR, ADAFRUIT_HAT, ADAFRUIT_HAT_PWM];
