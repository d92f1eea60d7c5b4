/*
 *  net/producer.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Frame flipper: turns flip signals into vsync swaps, falls back to
 *  the status screen when the senders go quiet
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

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::matrix::RgbMatrix;
use crate::net::receiver::{FlipSignal, FrameTable};
use crate::rt;
use crate::status;

/// Senders quiet for this long means idle: show the status screen.
/// Doubles as the liveness heartbeat of the producer itself.
const FLIP_TIMEOUT: Duration = Duration::from_secs(3);

/// Producer loop. Owns the back canvas; the matrix swap is the only
/// place it crosses the refresh thread.
pub fn run(matrix: Arc<RgbMatrix>, table: Arc<FrameTable>, flip: Arc<FlipSignal>) {
    let mut canvas = matrix.create_frame_canvas();
    let mut idle_ticks = 0usize;

    while !rt::interrupt_requested() {
        match flip.wait(FLIP_TIMEOUT) {
            Some(frame) => {
                idle_ticks = 0;
                canvas.set_tile_refs(Some(table.snapshot(frame)));
                match matrix.swap_on_vsync(canvas) {
                    Some(back) => canvas = back,
                    None => break,
                }
            }
            None => {
                // No flip in time: render the idle screen. Re-rendered
                // every tick so the marching pixel shows we're alive.
                debug!("no flip within {:?}, showing status screen", FLIP_TIMEOUT);
                canvas.set_tile_refs(None);
                status::render(&mut canvas, matrix.brightness(), idle_ticks);
                idle_ticks = idle_ticks.wrapping_add(1);
                match matrix.swap_on_vsync(canvas) {
                    Some(back) => canvas = back,
                    None => break,
                }
            }
        }
    }
    info!("producer thread exiting");
}
