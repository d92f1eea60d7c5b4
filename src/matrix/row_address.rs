/*
 *  matrix/row_address.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Row-address selection: the three addressing schemes panels use
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
use crate::matrix::gpio::{GpioBank, GpioBits};
use crate::matrix::mapping::HardwareMapping;

/// Which addressing scheme the panel's row drivers speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAddressType {
    /// Binary address on lines A..E, A the LSB.
    Direct,
    /// Serial chain: A is the clock, B the data.
    ShiftRegister,
    /// 1:4 panels with one low-active line per row, A..D.
    DirectAbcd,
}

impl RowAddressType {
    pub fn from_index(index: u8) -> Result<Self, MatrixError> {
        match index {
            0 => Ok(RowAddressType::Direct),
            1 => Ok(RowAddressType::ShiftRegister),
            2 => Ok(RowAddressType::DirectAbcd),
            other => Err(MatrixError::UnknownRowAddressType(other)),
        }
    }
}

/// Drives the row-address lines. A closed set of schemes, so a tagged
/// union; every variant caches the last row and no-ops on repeat.
pub enum RowAddressSetter {
    Direct {
        row_mask: GpioBits,
        // Lookup keeps the bit-fiddle out of the per-row hot path.
        row_lookup: [GpioBits; 32],
        last_row: Option<usize>,
    },
    ShiftRegister {
        double_rows: usize,
        row_mask: GpioBits,
        clock: GpioBits,
        data: GpioBits,
        last_row: Option<usize>,
    },
    DirectAbcd {
        row_mask: GpioBits,
        row_lines: [GpioBits; 4],
        last_row: Option<usize>,
    },
}

impl RowAddressSetter {
    pub fn new(
        kind: RowAddressType,
        double_rows: usize,
        h: &HardwareMapping,
    ) -> Result<Self, MatrixError> {
        match kind {
            RowAddressType::Direct => {
                if double_rows > 32 {
                    return Err(MatrixError::TooManyDoubleRows(double_rows));
                }
                let mut row_mask = h.a;
                if double_rows >= 4 {
                    row_mask |= h.b;
                }
                if double_rows >= 8 {
                    row_mask |= h.c;
                }
                if double_rows >= 16 {
                    row_mask |= h.d;
                }
                if double_rows >= 32 {
                    row_mask |= h.e;
                }
                let mut row_lookup = [0; 32];
                for (row, entry) in row_lookup.iter_mut().enumerate().take(double_rows) {
                    let mut addr = 0;
                    if row & 0x01 != 0 {
                        addr |= h.a;
                    }
                    if row & 0x02 != 0 {
                        addr |= h.b;
                    }
                    if row & 0x04 != 0 {
                        addr |= h.c;
                    }
                    if row & 0x08 != 0 {
                        addr |= h.d;
                    }
                    if row & 0x10 != 0 {
                        addr |= h.e;
                    }
                    *entry = addr;
                }
                Ok(RowAddressSetter::Direct { row_mask, row_lookup, last_row: None })
            }
            RowAddressType::ShiftRegister => Ok(RowAddressSetter::ShiftRegister {
                double_rows,
                row_mask: h.a | h.b,
                clock: h.a,
                data: h.b,
                last_row: None,
            }),
            RowAddressType::DirectAbcd => Ok(RowAddressSetter::DirectAbcd {
                row_mask: h.a | h.b | h.c | h.d,
                row_lines: [
                    h.b | h.c | h.d, // row 0: A low
                    h.a | h.c | h.d, // row 1: B low
                    h.a | h.b | h.d, // row 2: C low
                    h.a | h.b | h.c, // row 3: D low
                ],
                last_row: None,
            }),
        }
    }

    /// All GPIO bits this setter will ever touch.
    pub fn need_bits(&self) -> GpioBits {
        match self {
            RowAddressSetter::Direct { row_mask, .. }
            | RowAddressSetter::ShiftRegister { row_mask, .. }
            | RowAddressSetter::DirectAbcd { row_mask, .. } => *row_mask,
        }
    }

    /// Select `row`. Must only be called in the dark window between
    /// strobe and the next output-enable pulse.
    pub fn set_row_address<G: GpioBank + ?Sized>(&mut self, io: &mut G, row: usize) {
        match self {
            RowAddressSetter::Direct { row_mask, row_lookup, last_row } => {
                if *last_row == Some(row) {
                    return;
                }
                io.write_masked_bits(row_lookup[row], *row_mask);
                *last_row = Some(row);
            }
            RowAddressSetter::ShiftRegister { double_rows, clock, data, last_row, .. } => {
                if *last_row == Some(row) {
                    return;
                }
                // One low bit travels the register; its position picks
                // the row. One trailing clock to settle.
                for activate in 0..*double_rows {
                    io.clear_bits(*clock);
                    if activate == *double_rows - 1 - row {
                        io.clear_bits(*data);
                    } else {
                        io.set_bits(*data);
                    }
                    io.set_bits(*clock);
                }
                io.clear_bits(*clock);
                io.set_bits(*clock);
                *last_row = Some(row);
            }
            RowAddressSetter::DirectAbcd { row_mask, row_lines, last_row } => {
                if *last_row == Some(row) {
                    return;
                }
                io.write_masked_bits(row_lines[row % 4], *row_mask);
                *last_row = Some(row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gpio::SimGpio;

    fn mapping() -> HardwareMapping {
        HardwareMapping::by_name("regular").unwrap()
    }

    #[test]
    fn direct_encodes_row_in_binary() {
        let h = mapping();
        let mut setter = RowAddressSetter::new(RowAddressType::Direct, 16, &h).unwrap();
        let mut io = SimGpio::new();
        io.init_outputs(setter.need_bits());

        setter.set_row_address(&mut io, 5);
        assert_eq!(io.levels, h.a | h.c);

        setter.set_row_address(&mut io, 10);
        assert_eq!(io.levels, h.b | h.d);
    }

    #[test]
    fn direct_rejects_more_than_32_double_rows() {
        let h = mapping();
        assert!(matches!(
            RowAddressSetter::new(RowAddressType::Direct, 33, &h),
            Err(MatrixError::TooManyDoubleRows(33))
        ));
    }

    #[test]
    fn repeat_row_performs_zero_writes() {
        let h = mapping();
        let mut setter = RowAddressSetter::new(RowAddressType::Direct, 16, &h).unwrap();
        let mut io = SimGpio::new();
        io.init_outputs(setter.need_bits());

        setter.set_row_address(&mut io, 3);
        let writes = io.write_count;
        setter.set_row_address(&mut io, 3);
        assert_eq!(io.write_count, writes);
    }

    #[test]
    fn abcd_holds_exactly_one_line_low() {
        let h = mapping();
        let mut setter = RowAddressSetter::new(RowAddressType::DirectAbcd, 4, &h).unwrap();
        let mut io = SimGpio::new();
        io.init_outputs(setter.need_bits());

        setter.set_row_address(&mut io, 0);
        assert_eq!(io.levels, h.b | h.c | h.d);
        setter.set_row_address(&mut io, 2);
        assert_eq!(io.levels, h.a | h.b | h.d);
    }

    #[test]
    fn shift_register_clocks_double_rows_plus_settle() {
        let h = mapping();
        let double_rows = 8;
        let mut setter =
            RowAddressSetter::new(RowAddressType::ShiftRegister, double_rows, &h).unwrap();
        let mut io = SimGpio::recording();
        io.init_outputs(setter.need_bits());

        setter.set_row_address(&mut io, 2);
        // Per tick: clock low, data write, clock high; plus the final
        // settle cycle.
        assert_eq!(io.ops.len(), double_rows * 3 + 2);
    }
}
