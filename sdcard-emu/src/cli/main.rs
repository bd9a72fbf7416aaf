use clap::{value_parser, Arg, ArgAction, ArgMatches, Command, ValueEnum};
use log::{error, info, LevelFilter};
use simplelog::{ConfigBuilder, LevelPadding};
use std::convert::Infallible;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use time::macros::format_description;

use sdcard_emu::config::{Config, DEFAULT_UIO_DEVICE};

const BACKING_FILE: &str = "BACKING_FILE";
const UIO_DEVICE: &str = "uio-device";
const BUFFER_MAP: &str = "buffer-map";
const CONTROL_MAP: &str = "control-map";
const RESET_GPIO: &str = "reset-gpio";
const RESET_ACTIVE_HIGH: &str = "reset-active-high";
const POLL_INTERVAL: &str = "poll-interval";
const BENCH_ITERATIONS: &str = "bench-iterations";
const SKIP_BENCH: &str = "skip-bench";
const CRC: &str = "crc";
const LOG_PATH: &str = "log-path";
const LOG_LEVEL: &str = "log-level";

/// The read benchmark runs this many times as many passes as the write one.
const READ_BENCH_FACTOR: u32 = 10;

/// Possible log levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
        }
    }
}

fn cli() -> Command {
    // Hack to make the build dirty when the toml changes.
    include_str!("../../Cargo.toml");

    clap::command!()
        .max_term_width(100)
        .after_help("\
This is the SD card emulation daemon. It holds the SD controller in reset, \
maps its register banks through UIO, measures bus latency, and then serves \
the controller's command queue from the given card image until killed.")
        .arg(Arg::new(BACKING_FILE)
            .help("The card image: a regular file or a block device.")
            .required(true)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new(UIO_DEVICE)
            .help("The UIO device exposing the controller.")
            .long("uio")
            .action(ArgAction::Set)
            .default_value(DEFAULT_UIO_DEVICE)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new(BUFFER_MAP)
            .help("UIO map index of the shared data buffers.")
            .long("buffer-map")
            .action(ArgAction::Set)
            .default_value("0")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new(CONTROL_MAP)
            .help("UIO map index of the control registers and command ring.")
            .long("control-map")
            .action(ArgAction::Set)
            .default_value("1")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new(RESET_GPIO)
            .help("GPIO line wired to the controller's reset input.")
            .long("reset-gpio")
            .action(ArgAction::Set)
            .default_value("0")
            .value_parser(value_parser!(u32)))
        .arg(Arg::new(RESET_ACTIVE_HIGH)
            .help("Reset is asserted by driving the line high rather than low.")
            .long("reset-active-high")
            .action(ArgAction::SetTrue))
        .arg(Arg::new(POLL_INTERVAL)
            .help("Microseconds to sleep when the command queue is empty.")
            .long("poll-interval")
            .action(ArgAction::Set)
            .default_value("1000")
            .value_parser(value_parser!(u64).range(1..)))
        .arg(Arg::new(BENCH_ITERATIONS)
            .help("Register writes in the bring-up benchmark; \
                   the read benchmark does ten times as many passes.")
            .long("bench-iterations")
            .action(ArgAction::Set)
            .default_value("100000")
            .value_parser(value_parser!(u32).range(1..)))
        .arg(Arg::new(SKIP_BENCH)
            .help("Don't run the bring-up benchmarks.")
            .long("skip-bench")
            .action(ArgAction::SetTrue))
        .arg(Arg::new(CRC)
            .help("Append a CRC-16 trailer after each sector read.")
            .long("crc")
            .action(ArgAction::SetTrue))
        .arg(Arg::new(LOG_PATH)
            .help("If set, the log is written to the given path instead of the terminal.")
            .short('l')
            .long("log")
            .action(ArgAction::Set)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new(LOG_LEVEL)
            .help("Set the log level. Case insensitive.")
            .short('L')
            .long("log-level")
            .action(ArgAction::Set)
            .default_value("info")
            .value_parser(value_parser!(LogLevel))
            .ignore_case(true))
}

/// Translate the command line into emulator settings.
fn config_from_args(args: &ArgMatches) -> Config {
    let mut config = Config::new(args.get_one::<PathBuf>(BACKING_FILE).unwrap());
    config.uio_device = args.get_one::<PathBuf>(UIO_DEVICE).unwrap().clone();
    config.buffer_map = *args.get_one(BUFFER_MAP).unwrap();
    config.control_map = *args.get_one(CONTROL_MAP).unwrap();
    config.reset_gpio = *args.get_one(RESET_GPIO).unwrap();
    config.reset_active_low = !args.get_flag(RESET_ACTIVE_HIGH);
    config.device.poll_interval =
        Duration::from_micros(*args.get_one::<u64>(POLL_INTERVAL).unwrap());
    let iterations: u32 = *args.get_one(BENCH_ITERATIONS).unwrap();
    config.bench.enabled = !args.get_flag(SKIP_BENCH);
    config.bench.write_iterations = iterations;
    config.bench.read_iterations = iterations.saturating_mul(READ_BENCH_FACTOR);
    config.backend.crc_trailer = args.get_flag(CRC);
    config
}

fn log_config() -> simplelog::Config {
    ConfigBuilder::new()
        .set_level_padding(LevelPadding::Right)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_time_format_custom(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:6]"))
        .build()
}

/// Logging setup for normal build (not testing).
#[cfg(not(test))]
fn init_logging(level: LevelFilter, logfile: Option<File>) -> Result<(), String> {
    use simplelog::{ColorChoice, TermLogger, TerminalMode, WriteLogger};

    let result = match logfile {
        Some(file) => WriteLogger::init(level, log_config(), file),
        None => TermLogger::init(level, log_config(), TerminalMode::Mixed, ColorChoice::Auto),
    };
    result.map_err(|e| format!("Failed to initialise logging: {}", e))
}

/// Logging setup for testing build (properly captures output and ignores
/// multiple invocations).
#[cfg(test)]
fn init_logging(level: LevelFilter, _logfile: Option<File>) -> Result<(), String> {
    let _ = simplelog::TestLogger::init(level, log_config());
    Ok(())
}

/// Main run function; returns an exit code. Only returns at all if startup
/// fails.
fn run(args: ArgMatches) -> u8 {
    return match _run(args) {
        Ok(never) => match never {},
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            1
        }
    };

    fn _run(args: ArgMatches) -> Result<Infallible, String> {
        // Set up logging.
        let logfile = match args.get_one::<PathBuf>(LOG_PATH) {
            Some(path) => Some(File::create(path).map_err(|e| {
                format!("Failed to create log file '{}': {}", path.display(), e)
            })?),
            None => None,
        };
        let level = *args.get_one::<LogLevel>(LOG_LEVEL).unwrap();
        init_logging(level.into(), logfile)?;

        let config = config_from_args(&args);
        info!("Emulating SD card from '{}'.", config.backing_file.display());

        let mut device = sdcard_emu::start(&config).map_err(|e| e.to_string())?;
        device.run()
    }
}

fn main() {
    let args = cli().get_matches();
    std::process::exit(run(args).into());
}
