/*
 *  matrix/error.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Unified error types for the matrix subsystem
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

use std::error::Error;
use std::fmt;

use crate::matrix::gpio::GpioBits;

/// Unified error type for matrix construction and GPIO bring-up.
///
/// Everything here is fatal at init; once the refresh engine runs,
/// steady-state paths never produce these.
#[derive(Debug)]
pub enum MatrixError {
    /// No hardware mapping registered under the given name
    UnknownHardwareMapping { name: String, available: Vec<&'static str> },

    /// Panel row count outside 8..=64 or odd
    InvalidRowCount(usize),

    /// Panel column count not usable (zero, or not a multiple of the tile width)
    InvalidColumnCount(usize),

    /// Requested more parallel chains than the mapping wires up
    UnsupportedParallel { mapping: &'static str, supported: usize, requested: usize },

    /// Multiplex mapper index out of range
    UnknownMultiplexMapper { index: usize, count: usize },

    /// Row address type out of range
    UnknownRowAddressType(u8),

    /// Direct row addressing cannot encode this many double-rows
    TooManyDoubleRows(usize),

    /// LED sequence string does not mention a required channel
    LedSequenceMissingChannel { sequence: String, channel: char },

    /// PWM bit depth outside 1..=kBitPlanes
    InvalidPwmBits(u8),

    /// The GPIO bank rejected bits the mapping declares
    UnsupportedGpioBits(GpioBits),

    /// Opening or mapping the GPIO device failed
    GpioInit(String),
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixError::UnknownHardwareMapping { name, available } =>
                write!(f, "there is no hardware mapping named '{}' (available: {})",
                       name, available.join(", ")),
            MatrixError::InvalidRowCount(rows) =>
                write!(f, "invalid row count {} (must be even, 8..=64)", rows),
            MatrixError::InvalidColumnCount(cols) =>
                write!(f, "invalid column count {}", cols),
            MatrixError::UnsupportedParallel { mapping, supported, requested } =>
                write!(f, "the '{}' GPIO mapping only supports {} parallel chain{}, but {} requested",
                       mapping, supported, if *supported == 1 { "" } else { "s" }, requested),
            MatrixError::UnknownMultiplexMapper { index, count } =>
                write!(f, "multiplex mapper {} out of range (0 = none, 1..={} registered)",
                       index, count),
            MatrixError::UnknownRowAddressType(t) =>
                write!(f, "unknown row address type {} (0 direct, 1 shift register, 2 direct ABCD)", t),
            MatrixError::TooManyDoubleRows(n) =>
                write!(f, "direct row addressing supports at most 32 double-rows, got {}", n),
            MatrixError::LedSequenceMissingChannel { sequence, channel } =>
                write!(f, "LED sequence '{}' does not contain any '{}'", sequence, channel),
            MatrixError::InvalidPwmBits(bits) =>
                write!(f, "pwm bits {} out of range 1..=11", bits),
            MatrixError::UnsupportedGpioBits(bits) =>
                write!(f, "GPIO bank does not support all declared bits: {:#010x} rejected", bits),
            MatrixError::GpioInit(msg) =>
                write!(f, "GPIO initialization failed: {}", msg),
        }
    }
}

impl Error for MatrixError {}

impl From<std::io::Error> for MatrixError {
    fn from(err: std::io::Error) -> Self {
        MatrixError::GpioInit(err.to_string())
    }
}
