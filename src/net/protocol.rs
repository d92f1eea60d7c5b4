/*
 *  net/protocol.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Wire format of the tile stream
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

use crate::matrix::canvas::TILE_SIZE;

pub const DEFAULT_PORT: u16 = 9998;

/// Fixed 8-byte header in front of every datagram.
pub const HEADER_LEN: usize = 8;

/// Payload of a tile packet: 16x16 RGB triples, u16 little-endian.
pub const TILE_BYTES: usize = TILE_SIZE * TILE_SIZE * 3 * 2;

/// In-flight frame ring. Must exceed the worst network reordering
/// expected, in frames; sixteen is generous.
pub const MAX_IN_FLIGHT_FRAMES: usize = 16;

/// Header layout, little-endian:
///
/// | offset | field    |                              |
/// |--------|----------|------------------------------|
/// | 0      | type u8  | 1 = tile, 2 = flip           |
/// | 1      | frame u8 | low 4 bits used (mod-16 ring)|
/// | 2..4   | xpos u16 | tile origin x (tile only)    |
/// | 4..6   | ypos u16 | tile origin y (tile only)    |
/// | 6..8   | reserved |                              |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Tile { frame: usize, xpos: u16, ypos: u16 },
    Flip { frame: usize },
}

impl Packet {
    /// Parse a datagram header. `None` for anything malformed; the
    /// receiver drops those and keeps going.
    pub fn parse(data: &[u8]) -> Option<Packet> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let frame = (data[1] & 0x0f) as usize;
        match data[0] {
            1 => Some(Packet::Tile {
                frame,
                xpos: u16::from_le_bytes([data[2], data[3]]),
                ypos: u16::from_le_bytes([data[4], data[5]]),
            }),
            2 => Some(Packet::Flip { frame }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_header_parses_little_endian_positions() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = 1;
        buf[1] = 0x25; // frame 0x25 -> ring slot 5
        buf[2..4].copy_from_slice(&48u16.to_le_bytes());
        buf[4..6].copy_from_slice(&16u16.to_le_bytes());
        assert_eq!(Packet::parse(&buf), Some(Packet::Tile { frame: 5, xpos: 48, ypos: 16 }));
    }

    #[test]
    fn flip_header_ignores_positions() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = 2;
        buf[1] = 3;
        buf[2] = 0xff;
        assert_eq!(Packet::parse(&buf), Some(Packet::Flip { frame: 3 }));
    }

    #[test]
    fn short_or_unknown_packets_are_dropped() {
        assert_eq!(Packet::parse(&[1, 2, 3]), None);
        let buf = [9u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(Packet::parse(&buf), None);
    }

    #[test]
    fn tile_payload_size_is_1536_bytes() {
        assert_eq!(TILE_BYTES, 1536);
    }
}
