/*
 *  matrix/mod.rs
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 *
 *  Matrix subsystem: shared geometry state, the refresh thread and
 *  the vsync-aligned double-buffer swap
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

pub mod canvas;
pub mod designator;
pub mod error;
pub mod framebuffer;
pub mod gpio;
pub mod mapping;
pub mod multiplex;
pub mod pulser;
pub mod row_address;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{MatrixOptions, RuntimeOptions};
use crate::matrix::canvas::FrameCanvas;
use crate::matrix::designator::{MatrixGeometry, PixelDesignatorMap};
use crate::matrix::error::MatrixError;
use crate::matrix::framebuffer::{CieTable, Framebuffer, ScanMode, SUB_PANELS};
use crate::matrix::gpio::GpioBank;
use crate::matrix::mapping::HardwareMapping;
use crate::matrix::multiplex::MultiplexMapper;
use crate::matrix::pulser::{bitplane_timings_ns, PinPulser};
use crate::matrix::row_address::RowAddressSetter;
use crate::rt;

/// Process-wide immutable state shared by both canvases of a matrix:
/// the hardware mapping, the (possibly multiplex-composed) designator
/// map and the luminance lookup table. Built once, never mutated.
pub struct MatrixShared {
    mapping: HardwareMapping,
    designators: PixelDesignatorMap,
    cie: CieTable,
}

impl MatrixShared {
    pub fn new(
        mapping: HardwareMapping,
        geometry: MatrixGeometry,
        led_sequence: &str,
        multiplex: Option<&MultiplexMapper>,
    ) -> Result<Arc<MatrixShared>, MatrixError> {
        let mut designators = PixelDesignatorMap::new(geometry, &mapping, led_sequence)?;
        if let Some(mapper) = multiplex {
            designators = designators.composed(mapper);
        }
        Ok(Arc::new(MatrixShared { mapping, designators, cie: CieTable::new() }))
    }

    pub fn mapping(&self) -> &HardwareMapping {
        &self.mapping
    }

    pub fn designators(&self) -> &PixelDesignatorMap {
        &self.designators
    }

    pub fn cie(&self) -> &CieTable {
        &self.cie
    }
}

/// Producer/refresh handoff point. The refresh thread owns the active
/// canvas outright; the only exchange is here, at a frame boundary.
struct SwapHub {
    state: Mutex<SwapState>,
    vsync: Condvar,
    stop: AtomicBool,
}

#[derive(Default)]
struct SwapState {
    /// Next canvas to display, parked by the producer.
    pending: Option<Box<FrameCanvas>>,
    /// Previously active canvas, parked by the refresh thread for the
    /// producer to pick up.
    retired: Option<Box<FrameCanvas>>,
    /// Set once the refresh thread has exited.
    done: bool,
}

/// Everything the refresh thread owns exclusively.
struct RefreshEngine {
    io: Box<dyn GpioBank + Send>,
    pulser: PinPulser,
    row_setter: RowAddressSetter,
    active: Box<FrameCanvas>,
}

// `engine` is always taken out of `RgbMatrix` (leaving `None`) by
// `start()` before the matrix is wrapped in `Arc` and shared across
// threads, so no other thread ever actually touches a live
// `RefreshEngine` concurrently; the refresh thread that owns it
// afterwards has exclusive access via the move into `refresh_loop`.
unsafe impl Sync for RefreshEngine {}

/// One panel matrix: geometry, the refresh thread and the canvas pair.
pub struct RgbMatrix {
    shared: Arc<MatrixShared>,
    hub: Arc<SwapHub>,
    geometry: MatrixGeometry,
    scan_mode: ScanMode,
    inverse_colors: bool,
    brightness: u8,
    pwm_bits: usize,
    show_refresh_rate: bool,
    engine: Option<RefreshEngine>,
    refresh_thread: Option<JoinHandle<()>>,
}

impl RgbMatrix {
    /// Build the matrix from validated options and a GPIO bank. Claims
    /// all pins the configuration needs; fails if the bank refuses any.
    pub fn new(
        options: &MatrixOptions,
        runtime: &RuntimeOptions,
        mut io: Box<dyn GpioBank + Send>,
    ) -> Result<RgbMatrix, MatrixError> {
        let mapping = HardwareMapping::by_name(&options.hardware_mapping)?;
        if options.parallel > mapping.max_parallel_chains {
            return Err(MatrixError::UnsupportedParallel {
                mapping: mapping.name,
                supported: mapping.max_parallel_chains,
                requested: options.parallel,
            });
        }

        let mut panel_cols = options.cols;
        let mut panel_rows = options.rows;
        let multiplex = if options.multiplexing > 0 {
            let mapper =
                MultiplexMapper::from_index(options.multiplexing, panel_cols, panel_rows)?;
            mapper.edit_cols_rows(&mut panel_cols, &mut panel_rows);
            info!(
                "multiplexing '{}': panel allocated as {}x{}",
                mapper.name(),
                panel_cols,
                panel_rows
            );
            Some(mapper)
        } else {
            None
        };

        if panel_rows < 8 || panel_rows > 64 || panel_rows % 2 != 0 {
            return Err(MatrixError::InvalidRowCount(panel_rows));
        }
        if panel_cols == 0 {
            return Err(MatrixError::InvalidColumnCount(panel_cols));
        }

        let geometry = MatrixGeometry {
            columns: panel_cols * options.chain_length,
            rows: panel_rows,
            parallel: options.parallel,
            double_rows: panel_rows / SUB_PANELS,
        };

        let shared = MatrixShared::new(
            mapping.clone(),
            geometry,
            &options.led_sequence,
            multiplex.as_ref(),
        )?;

        let mut row_setter =
            RowAddressSetter::new(options.row_address_type, geometry.double_rows, &mapping)?;

        let all_used_bits = mapping.used_bits(options.parallel) | row_setter.need_bits();
        let granted = io.init_outputs(all_used_bits);
        if granted != all_used_bits {
            return Err(MatrixError::UnsupportedGpioBits(all_used_bits & !granted));
        }
        // Panels idle dark: output-enable is active low.
        io.set_bits(mapping.output_enable);
        row_setter.set_row_address(&mut *io, 0);

        let timings = bitplane_timings_ns(options.pwm_lsb_nanoseconds, options.dither_bits);
        let pulser = PinPulser::new(mapping.output_enable, &timings);
        debug!(
            "bitplane timings: {:?} ns, slowdown {}",
            timings, runtime.gpio_slowdown
        );

        let mut matrix = RgbMatrix {
            shared,
            hub: Arc::new(SwapHub {
                state: Mutex::new(SwapState::default()),
                vsync: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            geometry,
            scan_mode: options.scan_mode,
            inverse_colors: options.inverse_colors,
            brightness: options.brightness,
            pwm_bits: options.pwm_bits,
            show_refresh_rate: options.show_refresh_rate,
            engine: None,
            refresh_thread: None,
        };

        let mut active = matrix.create_frame_canvas();
        active.framebuffer_mut().clear();
        matrix.engine = Some(RefreshEngine { io, pulser, row_setter, active });
        Ok(matrix)
    }

    /// Visible width, the dimension producers draw against.
    pub fn width(&self) -> usize {
        self.shared.designators().width()
    }

    /// Visible height.
    pub fn height(&self) -> usize {
        self.shared.designators().height()
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// A fresh canvas configured like the matrix: the producer's back
    /// buffer.
    pub fn create_frame_canvas(&self) -> Box<FrameCanvas> {
        let mut fb =
            Framebuffer::new(&self.shared, self.geometry, self.scan_mode, self.inverse_colors);
        fb.set_brightness(self.brightness);
        fb.set_pwm_bits(self.pwm_bits);
        Box::new(FrameCanvas::new(fb))
    }

    /// Spawn the refresh thread. Pinned to the last core and raised to
    /// realtime priority where the system lets us.
    pub fn start(&mut self) -> std::io::Result<()> {
        let engine = self.engine.take().expect("refresh engine already started");
        let hub = Arc::clone(&self.hub);
        let show_rate = self.show_refresh_rate;
        let handle = thread::Builder::new()
            .name("led-refresh".into())
            .spawn(move || refresh_loop(engine, hub, show_rate))?;
        self.refresh_thread = Some(handle);
        Ok(())
    }

    /// Composite and queue `canvas`, block until the refresh thread
    /// has taken it at a frame boundary, and hand back the previously
    /// active canvas for the next frame. Returns `None` when the
    /// refresh thread has shut down.
    pub fn swap_on_vsync(&self, mut canvas: Box<FrameCanvas>) -> Option<Box<FrameCanvas>> {
        canvas.prepare_dump();

        let mut state = self.hub.state.lock().expect("swap state poisoned");
        state.pending = Some(canvas);
        loop {
            if state.done {
                return state.retired.take().or_else(|| state.pending.take());
            }
            if let Some(retired) = state.retired.take() {
                return Some(retired);
            }
            let (next, _) = self
                .hub
                .vsync
                .wait_timeout(state, Duration::from_millis(250))
                .expect("swap state poisoned");
            state = next;
        }
    }
}

impl Drop for RgbMatrix {
    fn drop(&mut self) {
        self.hub.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.refresh_thread.take() {
            let _ = handle.join();
        }
    }
}

fn refresh_loop(mut engine: RefreshEngine, hub: Arc<SwapHub>, show_rate: bool) {
    if !rt::set_realtime_priority(99) {
        warn!("FYI: can't raise refresh thread to realtime priority");
    }
    if !rt::pin_to_cpu(rt::online_cpus().saturating_sub(1)) {
        warn!("FYI: couldn't pin refresh thread");
    }

    let mut frames: u32 = 0;
    let mut window_start = Instant::now();

    while !rt::interrupt_requested() && !hub.stop.load(Ordering::Relaxed) {
        engine.active.framebuffer().dump_to_matrix(
            &mut *engine.io,
            &mut engine.pulser,
            &mut engine.row_setter,
            0,
        );

        // Frame boundary: the only place the active canvas changes.
        {
            let mut state = hub.state.lock().expect("swap state poisoned");
            if let Some(pending) = state.pending.take() {
                let old = std::mem::replace(&mut engine.active, pending);
                state.retired = Some(old);
                hub.vsync.notify_all();
            }
        }

        if show_rate {
            frames += 1;
            if frames == 256 {
                let elapsed = window_start.elapsed().as_secs_f32();
                if elapsed > 0.0 {
                    debug!("refresh rate: {:.1} Hz", frames as f32 / elapsed);
                }
                frames = 0;
                window_start = Instant::now();
            }
        }
    }

    // Leave the wall dark.
    engine.pulser.wait_pulse_finished(&mut *engine.io);
    engine.active.framebuffer_mut().clear();
    engine.active.framebuffer().dump_to_matrix(
        &mut *engine.io,
        &mut engine.pulser,
        &mut engine.row_setter,
        0,
    );
    engine.pulser.wait_pulse_finished(&mut *engine.io);
    info!("refresh thread stopped, panels cleared");

    let mut state = hub.state.lock().expect("swap state poisoned");
    state.done = true;
    if let Some(pending) = state.pending.take() {
        state.retired = Some(pending);
    }
    hub.vsync.notify_all();
}
