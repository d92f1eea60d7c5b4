/*
 *  lib.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Library root: HUB75 matrix refresh engine and UDP tile ingest
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

pub mod config;   // option structs and init-time validation
pub mod matrix;   // framebuffer, geometry, refresh engine
pub mod net;      // UDP tile receivers and frame flipper
pub mod netinfo;  // local address lookup for the status screen
pub mod rt;       // realtime scheduling, affinity, signals
pub mod status;   // idle status screen

pub use config::{MatrixOptions, RuntimeOptions};
pub use matrix::canvas::FrameCanvas;
pub use matrix::error::MatrixError;
pub use matrix::RgbMatrix;
