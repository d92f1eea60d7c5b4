/*
 *  config.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Option structs filled from the command line, validated before any
 *  hardware is touched
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

use thiserror::Error;

use crate::matrix::error::MatrixError;
use crate::matrix::framebuffer::{ScanMode, BIT_PLANES};
use crate::matrix::mapping::HardwareMapping;
use crate::matrix::multiplex;
use crate::matrix::row_address::RowAddressType;

/// Error type for configuration validation. Init is strict: anything
/// wrong here aborts startup with a message listing the valid values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {option}: {reason}")]
    Invalid { option: &'static str, reason: String },
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Panel geometry and refresh behavior.
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    /// Named GPIO bit layout, e.g. "regular" or "adafruit-hat".
    pub hardware_mapping: String,
    /// Rows of one panel (8..=64, even).
    pub rows: usize,
    /// Columns of one panel.
    pub cols: usize,
    /// Panels daisy-chained per parallel line.
    pub chain_length: usize,
    /// Parallel chains, 1..=3.
    pub parallel: usize,
    /// Multiplex mapper selection; 0 disables, 1.. selects from the
    /// registered list.
    pub multiplexing: usize,
    /// Clocked color depth, 1..=11.
    pub pwm_bits: usize,
    /// Base BCM pulse width in nanoseconds.
    pub pwm_lsb_nanoseconds: u32,
    /// Low planes dithered instead of time-weighted.
    pub dither_bits: usize,
    /// 1..=100.
    pub brightness: u8,
    pub scan_mode: ScanMode,
    pub row_address_type: RowAddressType,
    /// Permutation of "RGB" describing the panel's color wiring.
    pub led_sequence: String,
    /// Bitwise NOT per channel, for common-anode panels.
    pub inverse_colors: bool,
    /// Periodically log the measured refresh rate.
    pub show_refresh_rate: bool,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        MatrixOptions {
            hardware_mapping: "regular".to_string(),
            rows: 32,
            cols: 64,
            chain_length: 1,
            parallel: 1,
            multiplexing: 0,
            pwm_bits: BIT_PLANES,
            pwm_lsb_nanoseconds: 130,
            dither_bits: 0,
            brightness: 100,
            scan_mode: ScanMode::Progressive,
            row_address_type: RowAddressType::Direct,
            led_sequence: "RGB".to_string(),
            inverse_colors: false,
            show_refresh_rate: false,
        }
    }
}

/// Process-level knobs, separate from panel geometry.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Write-pause factor for boards that outrun the panels.
    pub gpio_slowdown: u32,
    /// Drop root after the GPIO is mapped.
    pub drop_privileges: bool,
    /// Run against the simulated GPIO bank (no /dev/gpiomem).
    pub no_hardware: bool,
    /// UDP port the tile receivers bind.
    pub port: u16,
    /// Number of receiver worker threads.
    pub receivers: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            gpio_slowdown: 1,
            drop_privileges: true,
            no_hardware: false,
            port: crate::net::protocol::DEFAULT_PORT,
            receivers: 2,
        }
    }
}

impl MatrixOptions {
    /// Strict init-time validation; steady state never re-checks any
    /// of this.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Resolves the name, which also produces the list of valid
        // mappings in the error message.
        let mapping = HardwareMapping::by_name(&self.hardware_mapping)?;

        if self.rows < 8 || self.rows > 64 || self.rows % 2 != 0 {
            return Err(ConfigError::Invalid {
                option: "rows",
                reason: format!("{} (must be even, 8..=64)", self.rows),
            });
        }
        if self.cols == 0 {
            return Err(ConfigError::Invalid { option: "cols", reason: "0".to_string() });
        }
        if self.chain_length == 0 {
            return Err(ConfigError::Invalid { option: "chain", reason: "0".to_string() });
        }
        if self.parallel < 1 || self.parallel > 3 {
            return Err(ConfigError::Invalid {
                option: "parallel",
                reason: format!("{} (must be 1..=3)", self.parallel),
            });
        }
        if self.parallel > mapping.max_parallel_chains {
            return Err(ConfigError::Matrix(MatrixError::UnsupportedParallel {
                mapping: mapping.name,
                supported: mapping.max_parallel_chains,
                requested: self.parallel,
            }));
        }
        if self.multiplexing > multiplex::registered_names().len() {
            return Err(ConfigError::Invalid {
                option: "multiplexing",
                reason: format!(
                    "{} (0 = none, 1..={}: {})",
                    self.multiplexing,
                    multiplex::registered_names().len(),
                    multiplex::registered_names().join(", ")
                ),
            });
        }
        if self.pwm_bits < 1 || self.pwm_bits > BIT_PLANES {
            return Err(ConfigError::Invalid {
                option: "pwm-bits",
                reason: format!("{} (must be 1..={})", self.pwm_bits, BIT_PLANES),
            });
        }
        if self.pwm_lsb_nanoseconds == 0 {
            return Err(ConfigError::Invalid {
                option: "pwm-lsb-nanoseconds",
                reason: "0".to_string(),
            });
        }
        if self.dither_bits >= BIT_PLANES {
            return Err(ConfigError::Invalid {
                option: "dither-bits",
                reason: format!("{} (must be below {})", self.dither_bits, BIT_PLANES),
            });
        }
        if self.brightness < 1 || self.brightness > 100 {
            return Err(ConfigError::Invalid {
                option: "brightness",
                reason: format!("{} (must be 1..=100)", self.brightness),
            });
        }
        for channel in ['R', 'G', 'B'] {
            if !self.led_sequence.chars().any(|c| c.eq_ignore_ascii_case(&channel)) {
                return Err(ConfigError::Matrix(MatrixError::LedSequenceMissingChannel {
                    sequence: self.led_sequence.clone(),
                    channel,
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        MatrixOptions::default().validate().unwrap();
    }

    #[test]
    fn odd_rows_are_rejected() {
        let opts = MatrixOptions { rows: 31, ..Default::default() };
        assert!(matches!(opts.validate(), Err(ConfigError::Invalid { option: "rows", .. })));
    }

    #[test]
    fn parallel_beyond_mapping_support_is_rejected() {
        let opts = MatrixOptions {
            hardware_mapping: "adafruit-hat".to_string(),
            parallel: 2,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::Matrix(MatrixError::UnsupportedParallel { .. }))
        ));
    }

    #[test]
    fn led_sequence_needs_all_three_channels() {
        let opts = MatrixOptions { led_sequence: "RGG".to_string(), ..Default::default() };
        assert!(opts.validate().is_err());
        let opts = MatrixOptions { led_sequence: "bgr".to_string(), ..Default::default() };
        opts.validate().unwrap();
    }

    #[test]
    fn unknown_mapping_is_a_matrix_error() {
        let opts = MatrixOptions { hardware_mapping: "bogus".to_string(), ..Default::default() };
        assert!(matches!(opts.validate(), Err(ConfigError::Matrix(_))));
    }
}
