use clap::{Arg, ArgAction, Command};
use env_logger::Env;
use log::{debug, error, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ledwalld::config::{MatrixOptions, RuntimeOptions};
use ledwalld::matrix::framebuffer::ScanMode;
use ledwalld::matrix::gpio::{GpioBank, MemGpio, SimGpio};
use ledwalld::matrix::row_address::RowAddressType;
use ledwalld::matrix::RgbMatrix;
use ledwalld::net::{self, FlipSignal, FrameTable, Receiver};
use ledwalld::rt;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(Arg::new("debug")
        .action(ArgAction::SetTrue)
        .long("debug")
        .short('v')
        .alias("verbose")
        .help("Enable debug log level")
        .required(false))
        .arg(Arg::new("gpio-mapping")
        .long("led-gpio-mapping")
        .default_value("regular")
        .help("Name of the GPIO mapping used")
        .required(false))
        .arg(Arg::new("rows")
        .long("led-rows")
        .value_parser(clap::value_parser!(usize))
        .default_value("32")
        .help("Rows of one panel (8..64, even)")
        .required(false))
        .arg(Arg::new("cols")
        .long("led-cols")
        .value_parser(clap::value_parser!(usize))
        .default_value("64")
        .help("Columns of one panel")
        .required(false))
        .arg(Arg::new("chain")
        .long("led-chain")
        .value_parser(clap::value_parser!(usize))
        .default_value("1")
        .help("Daisy-chained panels per line")
        .required(false))
        .arg(Arg::new("parallel")
        .long("led-parallel")
        .value_parser(clap::value_parser!(usize))
        .default_value("1")
        .help("Parallel chains (1..3)")
        .required(false))
        .arg(Arg::new("multiplexing")
        .long("led-multiplexing")
        .value_parser(clap::value_parser!(usize))
        .default_value("0")
        .help("Multiplexing type, 0 = none")
        .required(false))
        .arg(Arg::new("pwm-bits")
        .long("led-pwm-bits")
        .value_parser(clap::value_parser!(usize))
        .default_value("11")
        .help("PWM bits (1..11)")
        .required(false))
        .arg(Arg::new("pwm-lsb-nanoseconds")
        .long("led-pwm-lsb-nanoseconds")
        .value_parser(clap::value_parser!(u32))
        .default_value("130")
        .help("Base time-unit for the least significant bitplane")
        .required(false))
        .arg(Arg::new("dither-bits")
        .long("led-dither-bits")
        .value_parser(clap::value_parser!(usize))
        .default_value("0")
        .help("Time-dither the lowest bits instead of weighting them")
        .required(false))
        .arg(Arg::new("brightness")
        .long("led-brightness")
        .value_parser(clap::value_parser!(u8))
        .default_value("100")
        .help("Brightness in percent (1..100)")
        .required(false))
        .arg(Arg::new("scan-mode")
        .long("led-scan-mode")
        .value_parser(["0", "1"])
        .default_value("0")
        .help("Scan mode: 0 progressive, 1 interlaced")
        .required(false))
        .arg(Arg::new("row-addr-type")
        .long("led-row-addr-type")
        .value_parser(["0", "1", "2"])
        .default_value("0")
        .help("Row addressing: 0 direct, 1 shift register, 2 direct ABCD")
        .required(false))
        .arg(Arg::new("rgb-sequence")
        .long("led-rgb-sequence")
        .default_value("RGB")
        .help("Panel color wiring as a permutation of RGB")
        .required(false))
        .arg(Arg::new("inverse")
        .long("led-inverse")
        .action(ArgAction::SetTrue)
        .help("Invert colors (common-anode panels)")
        .required(false))
        .arg(Arg::new("show-refresh")
        .long("led-show-refresh-rate")
        .action(ArgAction::SetTrue)
        .help("Periodically log the measured refresh rate")
        .required(false))
        .arg(Arg::new("slowdown")
        .long("led-slowdown-gpio")
        .value_parser(clap::value_parser!(u32))
        .default_value("1")
        .help("GPIO write-pause factor for faster boards")
        .required(false))
        .arg(Arg::new("no-drop-privs")
        .long("led-no-drop-privs")
        .action(ArgAction::SetTrue)
        .help("Keep root instead of dropping to the daemon user")
        .required(false))
        .arg(Arg::new("no-hardware")
        .long("led-no-hardware")
        .action(ArgAction::SetTrue)
        .help("Drive a simulated GPIO bank (development without panels)")
        .required(false))
        .arg(Arg::new("port")
        .long("port")
        .short('p')
        .value_parser(clap::value_parser!(u16))
        .default_value("9998")
        .help("UDP port the tile receivers listen on")
        .required(false))
        .arg(Arg::new("receivers")
        .long("receivers")
        .value_parser(clap::value_parser!(usize))
        .default_value("2")
        .help("Number of UDP receiver threads")
        .required(false))
        .after_help("ledwalld:\
            \nLED wall daemon\
            \n\n\tClocks bitplanes out of the GPIO bank and listens\
            \n\tfor tiled frames over UDP.")
        .get_matches();

    let debug_enabled = matches.get_flag("debug");

    // Initialize the logger with the appropriate level based on debug flag
    env_logger::Builder::from_env(
        Env::default().default_filter_or(if debug_enabled { "debug" } else { "info" }),
    )
    .format_timestamp_secs()
    .init();

    info!("{} v{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let options = MatrixOptions {
        hardware_mapping: matches.get_one::<String>("gpio-mapping").unwrap().clone(),
        rows: *matches.get_one::<usize>("rows").unwrap(),
        cols: *matches.get_one::<usize>("cols").unwrap(),
        chain_length: *matches.get_one::<usize>("chain").unwrap(),
        parallel: *matches.get_one::<usize>("parallel").unwrap(),
        multiplexing: *matches.get_one::<usize>("multiplexing").unwrap(),
        pwm_bits: *matches.get_one::<usize>("pwm-bits").unwrap(),
        pwm_lsb_nanoseconds: *matches.get_one::<u32>("pwm-lsb-nanoseconds").unwrap(),
        dither_bits: *matches.get_one::<usize>("dither-bits").unwrap(),
        brightness: *matches.get_one::<u8>("brightness").unwrap(),
        scan_mode: match matches.get_one::<String>("scan-mode").unwrap().as_str() {
            "1" => ScanMode::Interlaced,
            _ => ScanMode::Progressive,
        },
        row_address_type: RowAddressType::from_index(
            matches.get_one::<String>("row-addr-type").unwrap().parse::<u8>().unwrap_or(0),
        )?,
        led_sequence: matches.get_one::<String>("rgb-sequence").unwrap().clone(),
        inverse_colors: matches.get_flag("inverse"),
        show_refresh_rate: matches.get_flag("show-refresh"),
    };
    let runtime = RuntimeOptions {
        gpio_slowdown: *matches.get_one::<u32>("slowdown").unwrap(),
        drop_privileges: !matches.get_flag("no-drop-privs"),
        no_hardware: matches.get_flag("no-hardware"),
        port: *matches.get_one::<u16>("port").unwrap(),
        receivers: (*matches.get_one::<usize>("receivers").unwrap()).max(1),
    };

    if let Err(e) = options.validate() {
        error!("configuration: {}", e);
        return Err(e.into());
    }

    rt::install_signal_handlers();

    let io: Box<dyn GpioBank + Send> = if runtime.no_hardware {
        info!("running against the simulated GPIO bank");
        Box::new(SimGpio::new())
    } else {
        Box::new(MemGpio::open(runtime.gpio_slowdown)?)
    };

    let mut matrix = match RgbMatrix::new(&options, &runtime, io) {
        Ok(matrix) => matrix,
        Err(e) => {
            error!("matrix init failed: {}", e);
            return Err(e.into());
        }
    };
    info!("matrix {}x{} visible pixels", matrix.width(), matrix.height());
    matrix.start()?;

    if runtime.drop_privileges {
        rt::drop_privileges();
    }

    // Ingest pipeline: shared frame table, flip signal, one socket per
    // receiver thread on the same port.
    let tiles_x = matrix.width().div_ceil(16);
    let tiles_y = matrix.height().div_ceil(16);
    let table = FrameTable::new(tiles_x, tiles_y);
    let flip = FlipSignal::new();
    debug!("frame table {}x{} tiles", tiles_x, tiles_y);

    let matrix = Arc::new(matrix);
    let mut workers = Vec::new();

    for index in 0..runtime.receivers {
        let socket = match net::open_socket(runtime.port) {
            Ok(socket) => socket,
            Err(e) => {
                error!("binding UDP port {} failed: {}", runtime.port, e);
                return Err(e.into());
            }
        };
        let receiver = Receiver::new(index, socket, Arc::clone(&table), Arc::clone(&flip));
        workers.push(
            thread::Builder::new()
                .name(format!("udp-recv-{}", index))
                .spawn(move || receiver.run())?,
        );
    }

    {
        let matrix = Arc::clone(&matrix);
        let table = Arc::clone(&table);
        let flip = Arc::clone(&flip);
        workers.push(
            thread::Builder::new()
                .name("frame-flipper".into())
                .spawn(move || ledwalld::net::producer::run(matrix, table, flip))?,
        );
    }

    while !rt::interrupt_requested() {
        thread::sleep(Duration::from_millis(500));
    }
    info!("interrupt received, shutting down");

    // Nudge the producer out of its flip wait so it notices the flag.
    flip.signal(0);
    for worker in workers {
        let _ = worker.join();
    }
    drop(matrix); // joins the refresh thread and clears the panels

    info!("clean shutdown");
    Ok(())
}
