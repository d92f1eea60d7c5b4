/*
 *  matrix/multiplex.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Multiplex mappers: per-panel wiring permutations between the
 *  user-visible pixel grid and the electrically scanned one
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

/// Within-panel permutation. Each variant is one known wiring scheme;
/// the surrounding [`MultiplexMapper`] handles chains and parallel
/// panels so a pattern only ever sees one panel's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanelPattern {
    Stripe,
    Checkered,
    Spiral,
    /// Tile-based zig-zag; the offsets distinguish the named variants.
    ZStripe { even_vblock_offset: usize, odd_vblock_offset: usize },
    Coreman,
    Absen,
}

/// Coordinate permutation for one panel type, with the panel geometry
/// fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct MultiplexMapper {
    name: &'static str,
    pattern: PanelPattern,
    stretch_factor: usize,
    /// Original (visible) panel dimensions, before stretching.
    panel_cols: usize,
    panel_rows: usize,
}

struct Registration {
    name: &'static str,
    pattern: PanelPattern,
    stretch_factor: usize,
}

/// Selection order matches the `multiplexing` configuration value,
/// starting at 1 (0 means no multiplexing).
const REGISTERED: [Registration; 7] = [
    Registration { name: "Stripe", pattern: PanelPattern::Stripe, stretch_factor: 2 },
    Registration { name: "Checkered", pattern: PanelPattern::Checkered, stretch_factor: 2 },
    Registration { name: "Spiral", pattern: PanelPattern::Spiral, stretch_factor: 2 },
    Registration {
        name: "ZStripe",
        pattern: PanelPattern::ZStripe { even_vblock_offset: 0, odd_vblock_offset: 8 },
        stretch_factor: 2,
    },
    Registration {
        name: "ZnMirrorZStripe",
        pattern: PanelPattern::ZStripe { even_vblock_offset: 4, odd_vblock_offset: 4 },
        stretch_factor: 2,
    },
    Registration { name: "Coreman", pattern: PanelPattern::Coreman, stretch_factor: 2 },
    Registration { name: "Absen", pattern: PanelPattern::Absen, stretch_factor: 1 },
];

pub fn registered_names() -> Vec<&'static str> {
    REGISTERED.iter().map(|r| r.name).collect()
}

impl MultiplexMapper {
    /// `index` is 1-based into the registered list; panel dimensions
    /// are the visible ones of a single panel.
    pub fn from_index(
        index: usize,
        panel_cols: usize,
        panel_rows: usize,
    ) -> Result<MultiplexMapper, MatrixError> {
        let reg = index
            .checked_sub(1)
            .and_then(|i| REGISTERED.get(i))
            .ok_or(MatrixError::UnknownMultiplexMapper { index, count: REGISTERED.len() })?;
        Ok(MultiplexMapper {
            name: reg.name,
            pattern: reg.pattern,
            stretch_factor: reg.stretch_factor,
            panel_cols,
            panel_rows,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rewrite the per-panel geometry into the one the framebuffer
    /// has to allocate: multiplexing trades rows for columns.
    pub fn edit_cols_rows(&self, cols: &mut usize, rows: &mut usize) {
        *cols *= self.stretch_factor;
        *rows /= self.stretch_factor;
    }

    /// Inverse of [`Self::edit_cols_rows`] at full-matrix scale: the
    /// dimensions the user draws against.
    pub fn get_size_mapping(&self, matrix_width: usize, matrix_height: usize) -> (usize, usize) {
        (matrix_width / self.stretch_factor, matrix_height * self.stretch_factor)
    }

    /// Translate a visible pixel to its electrical matrix position.
    /// Decomposes into (chained panel, parallel panel, within-panel)
    /// and re-composes around the single-panel permutation.
    pub fn map_visible_to_matrix(
        &self,
        _matrix_width: usize,
        _matrix_height: usize,
        visible_x: usize,
        visible_y: usize,
    ) -> (usize, usize) {
        let chained_panel = visible_x / self.panel_cols;
        let parallel_panel = visible_y / self.panel_rows;

        let within_x = visible_x % self.panel_cols;
        let within_y = visible_y % self.panel_rows;

        let (new_x, new_y) = self.map_single_panel(within_x, within_y);
        (
            chained_panel * self.stretch_factor * self.panel_cols + new_x,
            parallel_panel * self.panel_rows / self.stretch_factor + new_y,
        )
    }

    fn map_single_panel(&self, x: usize, y: usize) -> (usize, usize) {
        let cols = self.panel_cols;
        let rows = self.panel_rows;
        match self.pattern {
            PanelPattern::Stripe => {
                let is_top_stripe = (y % (rows / 2)) < rows / 4;
                let mx = if is_top_stripe { x + cols } else { x };
                let my = (y / (rows / 2)) * (rows / 4) + y % (rows / 4);
                (mx, my)
            }
            PanelPattern::Checkered => {
                let is_top_check = (y % (rows / 2)) < rows / 4;
                let is_left_check = x < cols / 2;
                let mx = match (is_top_check, is_left_check) {
                    (true, true) => x + cols / 2,
                    (true, false) => x + cols,
                    (false, true) => x,
                    (false, false) => x + cols / 2,
                };
                let my = (y / (rows / 2)) * (rows / 4) + y % (rows / 4);
                (mx, my)
            }
            PanelPattern::Spiral => {
                let is_top_stripe = (y % (rows / 2)) < rows / 4;
                let panel_quarter = cols / 4;
                let quarter = x / panel_quarter;
                let offset = x % panel_quarter;
                let mx = 2 * quarter * panel_quarter
                    + if is_top_stripe {
                        panel_quarter - 1 - offset
                    } else {
                        panel_quarter + offset
                    };
                let my = (y / (rows / 2)) * (rows / 4) + y % (rows / 4);
                (mx, my)
            }
            PanelPattern::ZStripe { even_vblock_offset, odd_vblock_offset } => {
                const TILE_WIDTH: usize = 8;
                const TILE_HEIGHT: usize = 4;

                let vert_block_is_odd = (y / TILE_HEIGHT) % 2;
                let even_shift = (1 - vert_block_is_odd) * even_vblock_offset;
                let odd_shift = vert_block_is_odd * odd_vblock_offset;

                let mx = x + ((x + even_shift) / TILE_WIDTH) * TILE_WIDTH + odd_shift;
                let my = (y % TILE_HEIGHT) + TILE_HEIGHT * (y / (TILE_HEIGHT * 2));
                (mx, my)
            }
            PanelPattern::Coreman => {
                let is_left_check = x < cols / 2;
                if y <= 7 || (16..=23).contains(&y) {
                    let mx = (x / (cols / 2)) * cols + (x % (cols / 2));
                    let my = if y & (rows / 4) == 0 {
                        (y / (rows / 2)) * (rows / 4) + (y % (rows / 4))
                    } else {
                        y
                    };
                    (mx, my)
                } else {
                    let mx = if is_left_check { x + cols / 2 } else { x + cols };
                    let my = (y / (rows / 2)) * (rows / 4) + y % (rows / 4);
                    (mx, my)
                }
            }
            PanelPattern::Absen => {
                // The wiring repeats per 64x16 block. Within a block,
                // every 4-column group folds onto an 8-wide strip whose
                // base alternates direction, and the 16 rows interleave
                // in groups of four across the two strip halves.
                let bx = x % 64;
                let by = y % 16;

                let group = (bx % 32) / 4;
                let strip_base = 8 * group + (if group % 2 == 1 { 7 } else { 3 });
                let first = strip_base - (bx % 4);
                let second = if group % 2 == 0 { first + 4 } else { first - 4 };

                let (mx_local, my_local) = match by {
                    0..=3 => (first, by),
                    4..=7 => (second, by - 4),
                    8..=11 => (first, by - 4),
                    _ => (second, by - 8),
                };
                let my_local = my_local + 8 * (bx / 32);

                (mx_local + x - bx, my_local + y - by)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_halves_rows_and_doubles_columns() {
        let m = MultiplexMapper::from_index(1, 32, 16).unwrap();
        let (mut cols, mut rows) = (32, 16);
        m.edit_cols_rows(&mut cols, &mut rows);
        assert_eq!((cols, rows), (64, 8));
        assert_eq!(m.get_size_mapping(64, 8), (32, 16));
    }

    #[test]
    fn index_zero_and_out_of_range_are_rejected() {
        assert!(MultiplexMapper::from_index(0, 32, 16).is_err());
        assert!(MultiplexMapper::from_index(REGISTERED.len() + 1, 32, 16).is_err());
    }

    #[test]
    fn every_mapper_stays_within_matrix_bounds() {
        let (panel_cols, panel_rows) = (64, 32);
        let (chain, parallel) = (2, 2);
        for index in 1..=REGISTERED.len() {
            let m = MultiplexMapper::from_index(index, panel_cols, panel_rows).unwrap();
            let (mut cols, mut rows) = (panel_cols, panel_rows);
            m.edit_cols_rows(&mut cols, &mut rows);
            let matrix_w = cols * chain;
            let matrix_h = rows * parallel;
            let (vis_w, vis_h) = m.get_size_mapping(matrix_w, matrix_h);
            for vy in 0..vis_h {
                for vx in 0..vis_w {
                    let (mx, my) = m.map_visible_to_matrix(matrix_w, matrix_h, vx, vy);
                    assert!(
                        mx < matrix_w && my < matrix_h,
                        "{}: ({},{}) mapped out of bounds to ({},{})",
                        m.name(),
                        vx,
                        vy,
                        mx,
                        my
                    );
                }
            }
        }
    }

    #[test]
    fn every_mapper_is_a_permutation() {
        for index in 1..=REGISTERED.len() {
            let m = MultiplexMapper::from_index(index, 64, 32).unwrap();
            let (mut cols, mut rows) = (64, 32);
            m.edit_cols_rows(&mut cols, &mut rows);
            let (vis_w, vis_h) = m.get_size_mapping(cols, rows);
            let mut seen = vec![false; cols * rows];
            for vy in 0..vis_h {
                for vx in 0..vis_w {
                    let (mx, my) = m.map_visible_to_matrix(cols, rows, vx, vy);
                    let idx = my * cols + mx;
                    assert!(!seen[idx], "{}: ({},{}) double-mapped", m.name(), vx, vy);
                    seen[idx] = true;
                }
            }
            assert!(seen.iter().all(|&s| s), "{}: not surjective", m.name());
        }
    }

    #[test]
    fn stripe_matches_known_wiring() {
        let m = MultiplexMapper::from_index(1, 32, 16).unwrap();
        // Top stripe moves to the right neighbour columns.
        assert_eq!(m.map_visible_to_matrix(64, 8, 0, 0), (32, 0));
        assert_eq!(m.map_visible_to_matrix(64, 8, 0, 4), (0, 0));
        assert_eq!(m.map_visible_to_matrix(64, 8, 5, 11), (37, 7));
    }

    #[test]
    fn absen_matches_panel_lookup_table() {
        let m = MultiplexMapper::from_index(7, 64, 16).unwrap();
        // Spot values taken from the vendor's wiring chart.
        assert_eq!(m.map_single_panel(0, 0), (3, 0));
        assert_eq!(m.map_single_panel(0, 4), (7, 0));
        assert_eq!(m.map_single_panel(0, 8), (3, 4));
        assert_eq!(m.map_single_panel(0, 15), (7, 7));
        assert_eq!(m.map_single_panel(3, 0), (0, 0));
        assert_eq!(m.map_single_panel(4, 0), (15, 0));
        assert_eq!(m.map_single_panel(7, 7), (8, 3));
        assert_eq!(m.map_single_panel(8, 0), (19, 0));
        assert_eq!(m.map_single_panel(8, 4), (23, 0));
        assert_eq!(m.map_single_panel(12, 0), (31, 0));
        assert_eq!(m.map_single_panel(13, 5), (26, 1));
        assert_eq!(m.map_single_panel(16, 0), (35, 0));
        assert_eq!(m.map_single_panel(31, 15), (56, 7));
        assert_eq!(m.map_single_panel(32, 0), (3, 8));
        assert_eq!(m.map_single_panel(36, 8), (15, 12));
        assert_eq!(m.map_single_panel(63, 15), (56, 15));
    }

    #[test]
    fn zstripe_variants_differ_only_in_offsets() {
        let z = MultiplexMapper::from_index(4, 64, 16).unwrap();
        let zn = MultiplexMapper::from_index(5, 64, 16).unwrap();
        // Even vertical block: ZStripe has no shift, mirror variant
        // shifts by its even offset.
        assert_eq!(z.map_single_panel(0, 0), (0, 0));
        assert_eq!(zn.map_single_panel(0, 0), (0, 0));
        assert_eq!(z.map_single_panel(6, 0), (6, 0));
        assert_eq!(zn.map_single_panel(6, 0), (14, 0));
        // Odd vertical block picks up the odd offset.
        assert_eq!(z.map_single_panel(0, 4), (8, 0));
        assert_eq!(zn.map_single_panel(0, 4), (4, 0));
    }
}
