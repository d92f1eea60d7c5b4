/*
 *  matrix/pulser.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Output-enable pulse generator with binary-code-modulation timing
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

use std::time::{Duration, Instant};

use crate::matrix::framebuffer::BIT_PLANES;
use crate::matrix::gpio::{GpioBank, GpioBits};

/// Sleeping is only worth the syscall when the pulse is long enough to
/// absorb wake-up jitter; below this we spin the whole pulse.
const SLEEP_WORTHWHILE_NS: u64 = 200_000;

/// Scheduler slack subtracted from a sleep so the trailing spin still
/// hits the edge on time.
const SLEEP_SLACK_NS: u64 = 60_000;

/// How the wait in [`PinPulser::wait_pulse_finished`] burns the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PulseBackend {
    /// Busy-wait the full duration. Exact, hot.
    Spin,
    /// Sleep most of it, spin the remainder.
    SleepSpin,
}

/// Drives the output-enable line: a pulse is started non-blocking and
/// reaped later, so the caller can shift the next row in while the
/// current one is still lit.
///
/// Output-enable is active low: the pulse clears the bit, the reap
/// sets it again.
pub struct PinPulser {
    oe_mask: GpioBits,
    durations: Vec<Duration>,
    backend: PulseBackend,
    pulse_end: Option<Instant>,
}

/// Per-plane on-times: plane `b` gets `base_ns * 2^max(0, b - dither_bits)`.
/// The lowest `dither_bits` planes share the base duration; their
/// brightness contribution comes from temporal dithering instead.
pub fn bitplane_timings_ns(base_ns: u32, dither_bits: usize) -> Vec<u64> {
    let mut timings = Vec::with_capacity(BIT_PLANES);
    let mut ns = u64::from(base_ns);
    for b in 0..BIT_PLANES {
        timings.push(ns);
        if b >= dither_bits {
            ns *= 2;
        }
    }
    timings
}

impl PinPulser {
    pub fn new(oe_mask: GpioBits, timings_ns: &[u64]) -> Self {
        let longest = timings_ns.iter().copied().max().unwrap_or(0);
        let backend = if longest >= SLEEP_WORTHWHILE_NS {
            PulseBackend::SleepSpin
        } else {
            PulseBackend::Spin
        };
        PinPulser {
            oe_mask,
            durations: timings_ns.iter().map(|&ns| Duration::from_nanos(ns)).collect(),
            backend,
            pulse_end: None,
        }
    }

    /// Switch the LEDs on for the duration of `plane`. Returns
    /// immediately; pair with [`Self::wait_pulse_finished`].
    pub fn send_pulse<G: GpioBank + ?Sized>(&mut self, io: &mut G, plane: usize) {
        io.clear_bits(self.oe_mask); // active low: light on
        self.pulse_end = Some(Instant::now() + self.durations[plane]);
    }

    /// Block until the in-flight pulse has run its course, then blank
    /// the output. No-op when nothing is in flight.
    pub fn wait_pulse_finished<G: GpioBank + ?Sized>(&mut self, io: &mut G) {
        let Some(end) = self.pulse_end.take() else {
            return;
        };
        if self.backend == PulseBackend::SleepSpin {
            let now = Instant::now();
            if let Some(remaining) = end.checked_duration_since(now) {
                let slack = Duration::from_nanos(SLEEP_SLACK_NS);
                if remaining > slack {
                    nanosleep(remaining - slack);
                }
            }
        }
        while Instant::now() < end {
            std::hint::spin_loop();
        }
        io.set_bits(self.oe_mask); // blank
    }
}

fn nanosleep(d: Duration) {
    let ts = libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: libc::c_long::from(d.subsec_nanos() as i32),
    };
    unsafe {
        libc::nanosleep(&ts, std::ptr::null_mut());
    }
}
