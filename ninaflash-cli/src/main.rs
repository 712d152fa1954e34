//! ninaflash CLI - Command-line tool for flashing NINA-W10x (ESP32) modules.
//!
//! ## Features
//!
//! - Flash firmware images through the ESP32 serial boot ROM
//! - Write TLS root certificates to the certificate partition
//! - Read back flash MD5 digests
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use {
    anyhow::Result,
    clap::Parser,
    clap_complete::Shell,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod serial;

use {
    config::Config,
    serial::{SerialOptions, select_serial_port},
};

/// Default baud rate for data transfer after sync.
const DEFAULT_BAUD: u32 = 921_600;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was received.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or ambiguous environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// ninaflash - Flash NINA-W10x (ESP32) modules through the serial boot ROM.
///
/// Environment variables:
///   NINAFLASH_PORT              - Default serial port
///   NINAFLASH_BAUD              - Baud rate after sync (default: 921600)
///   NINAFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ninaflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "NINAFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for data transfer [default: 921600].
    #[arg(short, long, global = true, env = "NINAFLASH_BAUD")]
    baud: Option<u32>,

    /// Bytes per FLASH_DATA block [default: 1024].
    #[arg(long, global = true, value_parser = parse_u32)]
    chunk_size: Option<u32>,

    /// Do not toggle DTR/RTS; the module must already be in download mode.
    #[arg(long, global = true)]
    no_reset: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "NINAFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Flash a binary image.
    Flash {
        /// Path to the firmware image.
        firmware: PathBuf,

        /// Flash offset (hex with 0x prefix, or decimal).
        #[arg(short, long, default_value = "0x0", value_parser = parse_u32)]
        address: u32,

        /// Skip the MD5 comparison after writing.
        #[arg(long)]
        no_verify: bool,

        /// Stay in the boot ROM after flashing.
        #[arg(long)]
        no_reboot: bool,
    },

    /// Write a TLS root certificate bundle to the certificate partition.
    WriteCerts {
        /// Path to the DER/PEM bundle.
        file: PathBuf,

        /// Stay in the boot ROM after writing.
        #[arg(long)]
        no_reboot: bool,
    },

    /// Print the MD5 digest of a flash region.
    Md5 {
        /// Region offset (hex with 0x prefix, or decimal).
        #[arg(short, long, default_value = "0x0", value_parser = parse_u32)]
        address: u32,

        /// Region size in bytes.
        #[arg(short, long, value_parser = parse_u32)]
        size: u32,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Parse a number given in hex (`0x` prefix, underscores allowed) or decimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

/// Resolve the serial port from CLI, config, or auto-detection.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

/// Baud rate after sync: CLI, then config, then the default.
fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config
            .port
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Block size: CLI, then config, then the driver default.
fn resolve_chunk_size(cli: &Cli, config: &Config) -> u32 {
    cli.chunk_size
        .or(config
            .flash
            .chunk_size)
        .unwrap_or(ninaflash::config::DEFAULT_CHUNK_SIZE)
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<ninaflash::Error>() {
        Some(ninaflash::Error::Interrupted) => 130,
        Some(ninaflash::Error::Parameter(_)) => 2,
        _ => 1,
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            firmware,
            address,
            no_verify,
            no_reboot,
        } => commands::flash::cmd_flash(
            cli,
            config,
            firmware,
            *address,
            *no_verify,
            *no_reboot,
        ),
        Commands::WriteCerts { file, no_reboot } => {
            commands::flash::cmd_write_certs(cli, config, file, *no_reboot)
        },
        Commands::Md5 { address, size } => commands::flash::cmd_md5(cli, config, *address, *size),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "ninaflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    ninaflash::set_interrupt_checker(was_interrupted);

    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", console::style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
