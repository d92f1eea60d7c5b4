/*
 *  status.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Idle status screen: gradient, liveness pixel, label and address
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

use embedded_graphics::mono_font::ascii::FONT_4X6;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;

use crate::matrix::canvas::FrameCanvas;
use crate::netinfo;

const LABEL: &str = "LED wall";

/// Advance width of the 4x6 font, for centering.
const FONT_W: usize = 4;

/// Paint the idle screen into the canvas staging image. Dim, luminance
/// corrected, with a marching pixel on the top row so a stuck refresh
/// is visible at a glance.
pub fn render(canvas: &mut FrameCanvas, brightness: u8, tick: usize) {
    let width = canvas.width();
    let height = canvas.height();

    canvas.set_brightness(30);
    canvas.set_luminance_correct(true);
    canvas.fill(1, 1, 1);

    // Faint vertical gradient, brightest at the top.
    for y in 0..height {
        let yy = (height - 1 - y) as u16;
        for x in 0..width {
            canvas.set_pixel_hdr(x, y, yy, yy / 2, yy / 4);
        }
    }

    // Liveness pixel marches along the top row.
    canvas.set_pixel_hdr(tick % width, 0, 3000, 3000, 3000);

    center_text(canvas, 1, "^^^");
    let center_row = height as i32 / 2;
    center_text(canvas, center_row - 6, LABEL);
    center_text(canvas, center_row, &format!("{}%", brightness));

    let ip = netinfo::local_ipv4().map(|a| a.to_string()).unwrap_or_default();
    center_text(canvas, height as i32 - 8, &ip);
}

fn center_text(canvas: &mut FrameCanvas, y: i32, txt: &str) {
    let style = MonoTextStyle::new(&FONT_4X6, Rgb888::new(200, 200, 200));
    let x = canvas.width().saturating_sub(txt.len() * FONT_W) as i32 / 2;
    let _ = Text::with_baseline(
        txt,
        Point::new(x, y),
        style,
        embedded_graphics::text::Baseline::Top,
    )
    .draw(canvas);
}
