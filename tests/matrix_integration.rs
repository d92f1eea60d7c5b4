/*
 *  tests/matrix_integration.rs
 *
 *  End-to-end scenarios for the matrix and ingest pipeline
 *
 *  ledwalld - pixels on the wall
 *  (c) 2020-26 Stuart Hunter
 */

use std::sync::Arc;
use std::time::Duration;

use ledwalld::config::{MatrixOptions, RuntimeOptions};
use ledwalld::matrix::canvas::{FrameCanvas, TILE_SIZE};
use ledwalld::matrix::designator::MatrixGeometry;
use ledwalld::matrix::framebuffer::{DitherMode, Framebuffer, ScanMode, BIT_PLANES};
use ledwalld::matrix::gpio::SimGpio;
use ledwalld::matrix::mapping::HardwareMapping;
use ledwalld::matrix::pulser::bitplane_timings_ns;
use ledwalld::matrix::{MatrixShared, RgbMatrix};
use ledwalld::net::receiver::{FlipSignal, FrameTable, Receiver};
use ledwalld::net::{open_socket, MAX_IN_FLIGHT_FRAMES};

fn single_chain_32x32() -> (Arc<MatrixShared>, Framebuffer) {
    let mapping = HardwareMapping::by_name("regular").unwrap();
    let geometry = MatrixGeometry { columns: 32, rows: 32, parallel: 1, double_rows: 16 };
    let shared = MatrixShared::new(mapping, geometry, "RGB", None).unwrap();
    let fb = Framebuffer::new(&shared, geometry, ScanMode::Progressive, false);
    (shared, fb)
}

#[test]
fn single_white_pixel_sets_all_clocked_planes_of_word_zero() {
    let (shared, mut fb) = single_chain_32x32();
    fb.set_luminance_correct(false);
    fb.set_dither_mode(DitherMode::Static);
    fb.set_pixel(0, 0, 255, 255, 255);

    let d = *shared.designators().get(0, 0).unwrap();
    let rgb = d.r_bit | d.g_bit | d.b_bit;
    for plane in BIT_PLANES - 8..BIT_PLANES {
        let word = fb.plane_word(0, plane, 0);
        assert_eq!(word & rgb, rgb, "plane {} missing color bits", plane);
    }
    // Every other column of every plane stays untouched.
    for plane in 0..BIT_PLANES {
        for col in 1..fb.columns() {
            assert_eq!(fb.plane_word(0, plane, col), 0);
        }
    }
    for double_row in 1..fb.double_rows() {
        for plane in 0..BIT_PLANES {
            for col in 0..fb.columns() {
                assert_eq!(fb.plane_word(double_row, plane, col), 0);
            }
        }
    }
}

#[test]
fn inverse_colors_clear_the_channel_bits_for_white() {
    let mapping = HardwareMapping::by_name("regular").unwrap();
    let geometry = MatrixGeometry { columns: 32, rows: 32, parallel: 1, double_rows: 16 };
    let shared = MatrixShared::new(mapping, geometry, "RGB", None).unwrap();
    let mut fb = Framebuffer::new(&shared, geometry, ScanMode::Progressive, true);
    fb.set_luminance_correct(false);
    fb.set_dither_mode(DitherMode::Static);
    assert!(fb.set_pwm_bits(BIT_PLANES));

    fb.set_pixel(0, 0, 255, 255, 255);

    let d = *shared.designators().get(0, 0).unwrap();
    let rgb = d.r_bit | d.g_bit | d.b_bit;
    for plane in 0..BIT_PLANES {
        assert_eq!(fb.plane_word(0, plane, 0) & rgb, 0, "plane {} not inverted", plane);
    }
}

#[test]
fn led_sequence_routes_red_onto_the_green_wire() {
    let mapping = HardwareMapping::by_name("regular").unwrap();
    let green_line = mapping.chains[0].g1;
    let red_line = mapping.chains[0].r1;
    let geometry = MatrixGeometry { columns: 32, rows: 32, parallel: 1, double_rows: 16 };
    let shared = MatrixShared::new(mapping, geometry, "GRB", None).unwrap();
    let mut fb = Framebuffer::new(&shared, geometry, ScanMode::Progressive, false);
    fb.set_luminance_correct(false);
    fb.set_dither_mode(DitherMode::Static);

    fb.set_pixel(0, 0, 255, 0, 0);

    let word = fb.plane_word(0, BIT_PLANES - 1, 0);
    assert_ne!(word & green_line, 0, "red input must ride the G wire under GRB");
    assert_eq!(word & red_line, 0);
}

#[test]
fn udp_tile_ingest_reaches_the_bitplanes() {
    // Receiver side: one tile at (xpos 16, ypos 32), then a flip.
    let table = FrameTable::new(4, 3);
    let flip = FlipSignal::new();
    let socket = open_socket(0).expect("ephemeral bind");
    let mut receiver = Receiver::new(0, socket, Arc::clone(&table), Arc::clone(&flip));

    let mut pkt = vec![0u8; 8 + TILE_SIZE * TILE_SIZE * 3 * 2];
    pkt[0] = 1; // tile
    pkt[1] = 9; // frame
    pkt[2..4].copy_from_slice(&16u16.to_le_bytes());
    pkt[4..6].copy_from_slice(&32u16.to_le_bytes());
    for triple in pkt[8..].chunks_exact_mut(6) {
        triple[0..2].copy_from_slice(&0x0fffu16.to_le_bytes());
    }
    receiver.handle_datagram(&pkt);
    receiver.handle_datagram(&[2, 9, 0, 0, 0, 0, 0, 0]); // flip

    let frame = flip.wait(Duration::from_millis(100)).expect("flip signalled");
    assert_eq!(frame, 9);

    // Producer side: composite the assembled frame into a canvas.
    let mapping = HardwareMapping::by_name("regular").unwrap();
    let geometry = MatrixGeometry { columns: 64, rows: 48, parallel: 1, double_rows: 24 };
    let shared = MatrixShared::new(mapping, geometry, "RGB", None).unwrap();
    let mut fb = Framebuffer::new(&shared, geometry, ScanMode::Progressive, false);
    fb.set_luminance_correct(false);
    fb.set_dither_mode(DitherMode::Static);
    let mut canvas = FrameCanvas::new(fb);
    assert_eq!((canvas.tiles_x(), canvas.tiles_y()), (4, 3));

    canvas.fill(0, 255, 0); // fallback: green
    canvas.set_tile_refs(Some(table.snapshot(frame)));
    canvas.prepare_dump();

    let expected_red = (0x0fffu16 + 16) >> 5;
    let read = |x: usize, y: usize| {
        let d = *shared.designators().get(x, y).unwrap();
        let mut rgb = (0u16, 0u16);
        for plane in 0..BIT_PLANES {
            let word = canvas.framebuffer().plane_word(y % 24, plane, x);
            if word & d.r_bit != 0 {
                rgb.0 |= 1 << plane;
            }
            if word & d.g_bit != 0 {
                rgb.1 |= 1 << plane;
            }
        }
        rgb
    };

    // Inside tile (1,2): the red payload.
    for &(x, y) in &[(16, 32), (31, 47), (20, 40)] {
        assert_eq!(read(x, y), (expected_red, 0), "pixel ({},{})", x, y);
    }
    // Outside: the green fallback.
    assert_eq!(read(0, 0), (0, 2047));
    assert_eq!(read(32, 32), (0, 2047));
}

#[test]
fn reuseport_allows_parallel_receivers_on_one_port() {
    let first = open_socket(0).expect("first bind");
    let port = first.local_addr().unwrap().port();
    let second = open_socket(port).expect("second bind on the same port");
    drop((first, second));
}

#[test]
fn stripe_multiplexing_reshapes_the_matrix() {
    let options = MatrixOptions {
        rows: 32,
        cols: 64,
        multiplexing: 1, // Stripe, stretch 2
        ..Default::default()
    };
    options.validate().unwrap();
    let runtime = RuntimeOptions { no_hardware: true, ..Default::default() };
    let matrix =
        RgbMatrix::new(&options, &runtime, Box::new(SimGpio::new())).expect("matrix init");

    // Visible geometry is what the user configured...
    assert_eq!((matrix.width(), matrix.height()), (64, 32));
    // ...while the framebuffer allocates the stretched layout.
    let canvas = matrix.create_frame_canvas();
    assert_eq!(canvas.framebuffer().columns(), 128);
    assert_eq!(canvas.framebuffer().double_rows(), 8);
}

#[test]
fn bcm_durations_are_monotonic_after_the_dither_window() {
    let plain = bitplane_timings_ns(100, 0);
    for b in 0..BIT_PLANES {
        assert_eq!(plain[b], 100u64 << b);
    }
    let dithered = bitplane_timings_ns(100, 3);
    assert_eq!(dithered[0], 100);
    assert_eq!(dithered[1], 100);
    assert_eq!(dithered[2], 100);
    for b in 4..BIT_PLANES {
        assert_eq!(dithered[b], dithered[b - 1] * 2);
    }
}

#[test]
fn vsync_swap_hands_back_the_previous_canvas() {
    let options = MatrixOptions { rows: 16, cols: 32, ..Default::default() };
    let runtime = RuntimeOptions { no_hardware: true, ..Default::default() };
    let mut matrix =
        RgbMatrix::new(&options, &runtime, Box::new(SimGpio::new())).expect("matrix init");
    matrix.start().expect("refresh thread");
    let matrix = Arc::new(matrix);

    let mut canvas = matrix.create_frame_canvas();
    for round in 0..4u8 {
        canvas.set_pixel(0, 0, round, round, round);
        canvas = matrix.swap_on_vsync(canvas).expect("refresh thread alive");
    }
    // Dropping the matrix joins the refresh thread.
    drop(matrix);
}

#[test]
fn frame_ring_wraps_at_sixteen() {
    assert_eq!(MAX_IN_FLIGHT_FRAMES, 16);
    let table = FrameTable::new(1, 1);
    let tile = Arc::new([1u16; TILE_SIZE * TILE_SIZE * 3]);
    table.store(3, 0, 0, Arc::clone(&tile));
    // Frame 19 is the same ring slot as frame 3.
    assert!(table.snapshot(19)[0].is_some());
    assert!(table.snapshot(4)[0].is_none());
}
