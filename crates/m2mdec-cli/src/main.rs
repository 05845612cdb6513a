// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod decode;
mod devices;
mod error;
mod metrics;
mod utils;

use clap::Parser;
use error::{result_to_exit_code, CliError};
use m2mdec::format::{DEFAULT_EXTRA_CAPTURE_BUFFERS, DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTPUT_BUFFERS};
use m2mdec::session::DEFAULT_DRIVER;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// m2mdec - Hardware video decoding through V4L2 memory-to-memory devices
#[derive(Parser)]
#[command(name = "m2mdec")]
#[command(version)]
#[command(about = "Decode H.264/HEVC streams on a V4L2 memory-to-memory decoder")]
#[command(long_about = None)]
struct Cli {
    /// Input file: MP4 container or H.264/HEVC elementary stream
    #[arg(required_unless_present = "list_devices")]
    input: Option<PathBuf>,

    /// Driver name (substring) of the decoder device
    #[arg(short, long, default_value = DEFAULT_DRIVER)]
    driver: String,

    /// Number of OUTPUT (compressed) buffers
    #[arg(long, default_value_t = DEFAULT_OUTPUT_BUFFERS)]
    output_buffers: u32,

    /// Size in bytes of each OUTPUT buffer
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    frame_size: u32,

    /// CAPTURE buffers on top of the driver minimum
    #[arg(long, default_value_t = DEFAULT_EXTRA_CAPTURE_BUFFERS)]
    extra_capture_buffers: u32,

    /// Poll timeout (e.g. 100, 100ms, 1s)
    #[arg(long, default_value = "100ms", value_parser = utils::parse_duration)]
    timeout: Duration,

    /// Quiet period after end of stream before the drain is considered done
    #[arg(long, default_value = "500ms", value_parser = utils::parse_duration)]
    drain_timeout: Duration,

    /// How long to wait for the decoder to parse the stream header
    #[arg(long, default_value = "2s", value_parser = utils::parse_duration)]
    header_timeout: Duration,

    /// Feed and drain on separate threads
    #[arg(long)]
    threaded: bool,

    /// Set a V4L2 control before decoding (ID=VALUE, repeatable)
    #[arg(long = "control", value_name = "ID=VALUE", value_parser = utils::parse_control)]
    controls: Vec<(u32, i32)>,

    /// Stop after this many decoded frames
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Write decoded frames (all planes, back to back) to FILE
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Exit once the CAPTURE queue is streaming
    #[arg(long)]
    setup_only: bool,

    /// List V4L2 devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging (use RUST_LOG=debug for more)
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,

    /// Output metrics in JSON format
    #[arg(long)]
    json: bool,

    /// Alternate sysfs class directory
    #[arg(long, hide = true)]
    sysfs_root: Option<PathBuf>,

    /// Alternate device node directory
    #[arg(long, hide = true)]
    dev_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbose, cli.quiet);

    result_to_exit_code(run(cli))
}

fn run(cli: Cli) -> Result<(), CliError> {
    if cli.list_devices {
        return devices::execute(&cli.driver, cli.sysfs_root, cli.dev_dir, cli.json);
    }

    let input = cli
        .input
        .ok_or_else(|| CliError::InvalidArgs("missing input file".to_string()))?;

    let opts = decode::Options {
        input,
        driver: cli.driver,
        output_buffers: cli.output_buffers,
        frame_size: cli.frame_size,
        extra_capture_buffers: cli.extra_capture_buffers,
        timeout: cli.timeout,
        drain_timeout: cli.drain_timeout,
        header_timeout: cli.header_timeout,
        threaded: cli.threaded,
        controls: cli.controls,
        frames: cli.frames,
        dump: cli.dump,
        setup_only: cli.setup_only,
        sysfs_root: cli.sysfs_root,
        dev_dir: cli.dev_dir,
    };
    decode::execute(opts, cli.json)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    // Determine log level from flags or RUST_LOG environment variable
    let env = env_logger::Env::default();

    let env = if quiet {
        // Quiet mode: only show errors
        env.default_filter_or("error")
    } else if verbose {
        // Verbose mode: show debug messages
        env.default_filter_or("debug")
    } else {
        // Default: show info and above
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None) // Disable timestamps for cleaner CLI output
        .format_target(false) // Disable target (module path) for cleaner output
        .init();

    log::debug!("Logging initialized");
}
